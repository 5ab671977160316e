//! Error types for caller-contract violations.
//!
//! Normal adaptive-testing outcomes ("no next item", "unknown skill") are
//! never errors. These variants cover malformed input shapes and invalid
//! configuration, and name the offending field.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssessError {
    /// A field carries a value outside its contract (NaN, out of range, empty id).
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    /// An answer payload does not match the item's declared format.
    #[error("answer shape mismatch in `{field}`: expected {expected}, found {found}")]
    AnswerShapeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// An error-pattern regex failed to compile.
    #[error("invalid error pattern `{code}`: {reason}")]
    InvalidPattern { code: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AssessError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The field named by a contract violation, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidField { field, .. } | Self::AnswerShapeMismatch { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AssessError>;
