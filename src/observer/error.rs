use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObserverError {
    #[error("No tenant in context for {operation} on '{table}'")]
    MissingTenant { operation: String, table: String },

    #[error("Timeout error: {0}")]
    TimeoutError(String),
}
