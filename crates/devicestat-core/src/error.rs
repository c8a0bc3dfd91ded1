//! Error types for the sampling layer.
//!
//! Absent sources and unparsable values are *not* errors here: they surface as
//! [`Metric::Unknown`](crate::metric::Metric) on the affected field. The types
//! below cover the failures that are allowed to escape a sampler.

use thiserror::Error;

/// A failure while composing one response section.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("sampler panicked: {0}")]
    Panicked(String),

    #[error("failed to encode section: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// A failure of the application directory service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("package not found: {0}")]
    NotFound(String),

    #[error("application directory unavailable")]
    Unavailable,
}
