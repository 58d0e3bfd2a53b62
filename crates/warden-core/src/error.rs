use thiserror::Error;

/// Errors surfaced by external collaborators (attribute stores, zone
/// resolution). The engine maps these into its own error taxonomy;
/// display strings never carry attribute values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("attribute store error: {0}")]
    Store(String),

    #[error("no zone context available")]
    NoZoneContext,
}

pub type CoreResult<T> = Result<T, CoreError>;
