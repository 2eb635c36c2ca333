// Observer system: lifecycle hooks run on entities before they are written

pub mod context;
pub mod error;
pub mod implementations;
pub mod pipeline;
pub mod traits;

pub use context::ObserverContext;
pub use error::ObserverError;
pub use implementations::TenantAssignmentObserver;
pub use pipeline::ObserverPipeline;
pub use traits::{Observer, ObserverRing};
