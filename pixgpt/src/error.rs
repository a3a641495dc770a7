//! Error types

use thiserror::Error;

/// Errors raised while loading data, fitting the codebook, training or rendering.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A dataset file does not follow the expected record layout
    #[error("Malformed dataset: {0}")]
    MalformedDataset(String),

    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("Invalid permutation: {0}")]
    InvalidPermutation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Plotting error: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
