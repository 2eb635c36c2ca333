// handlers/mod.rs - HTTP handlers
//
// health is public; tutorials sits behind the tenant filter (/api/*)

pub mod health;
pub mod tutorials;

pub use health::health;
