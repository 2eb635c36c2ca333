// Observer implementations organized by rings

// Ring 4: Enrichment - computed fields, tenant stamping
#[path = "4/tenant_assignment.rs"]
pub mod tenant_assignment;

pub use tenant_assignment::*;
