//! See [`Error`].

use thiserror::Error;

/// Error types for this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("only single image batches are supported, got {0}")]
    BatchSize(usize),

    #[error("positive_weight must be negative (uniform mode) or inside (0, 1), got {0}")]
    PositiveWeight(f32),

    #[error(
        "fixed-ratio weighting needs both label classes populated \
            (positive: {num_positive}, negative: {num_negative})"
    )]
    EmptyWeightClass {
        num_positive: usize,
        num_negative: usize,
    },
}

/// Type alias for [`Result<T, Error>`].
pub type Result<T> = std::result::Result<T, Error>;
