//! Error kinds surfaced by the answer pipeline.
//!
//! Callers branch on the kind: configuration problems prompt the user to
//! fix their settings, upstream failures name the backend that failed, and
//! storage failures carry the underlying [`anyhow::Error`].
//!
//! Insufficient evidence is deliberately *not* an error; it is reported as
//! a fallback [`Reply`](crate::answer::Reply).

use std::fmt;

use thiserror::Error;

/// External service a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Embedding,
    Generation,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Embedding => write!(f, "embedding"),
            Backend::Generation => write!(f, "generation"),
        }
    }
}

#[derive(Debug, Error)]
pub enum KbError {
    #[error("{backend} backend has no credential configured ({hint})")]
    MissingCredential { backend: Backend, hint: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{backend} backend failed: {message}")]
    Upstream { backend: Backend, message: String },

    #[error("invalid segmentation parameters: overlap {overlap} must be smaller than max_len {max_len}, and max_len must be positive")]
    InvalidSegmentation { max_len: usize, overlap: usize },

    #[error("vector index error: {0}")]
    Index(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl KbError {
    /// True for errors the user resolves by editing configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            KbError::MissingCredential { .. }
                | KbError::InvalidConfig(_)
                | KbError::InvalidSegmentation { .. }
        )
    }

    pub fn upstream(backend: Backend, message: impl Into<String>) -> Self {
        KbError::Upstream {
            backend,
            message: message.into(),
        }
    }
}

pub type Result<T, E = KbError> = std::result::Result<T, E>;
