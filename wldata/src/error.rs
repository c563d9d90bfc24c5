//! Error types for loading tribe descriptions.

use thiserror::Error;

/// Errors raised while reading or validating description data.
#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("failed to read description file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed description data: {0}")]
    Json(#[from] serde_json::Error),

    /// A ware, worker or building name was used twice within one tribe.
    #[error("duplicate {kind} description '{name}'")]
    Duplicate { kind: &'static str, name: String },

    /// A description references something that the tribe does not define.
    #[error("{owner}: unknown {kind} '{name}'")]
    UnknownName {
        owner: String,
        kind: &'static str,
        name: String,
    },

    /// Every tribe needs a worker of kind `carrier` to staff its roads.
    #[error("tribe '{0}' defines no carrier")]
    MissingCarrier(String),

    /// A soldier description without combat values.
    #[error("soldier '{0}' has no soldier stats")]
    MissingSoldierStats(String),

    #[error("{owner}: invalid value for {field}: {reason}")]
    InvalidValue {
        owner: String,
        field: &'static str,
        reason: String,
    },
}
