//! Error types for tessellate

use thiserror::Error;

/// Result type alias using tessellate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the core engine
///
/// "No value" outcomes (a probe for an absent entry, a mask miss) are not
/// errors; they are reported as `Ok(None)` or `Ok(false)` by the operations
/// concerned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Operand dimensions are incompatible
    #[error("Dimension mismatch: {left} vs {right} for operation '{op}'")]
    DimensionMismatch {
        /// Left operand dimensions, formatted `rows x cols`
        left: String,
        /// Right operand dimensions (or expected dimensions)
        right: String,
        /// The operation name
        op: &'static str,
    },

    /// Row or column index outside the matrix dimensions
    #[error("Index {index} out of bounds for dimension of size {size}")]
    IndexOutOfBounds {
        /// The invalid index
        index: usize,
        /// Size of the dimension
        size: usize,
    },

    /// Operand domains or orientations are incompatible
    #[error("Domain mismatch: {0}")]
    DomainMismatch(String),

    /// An internal invariant of the container is broken; the object must not
    /// be used further
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl Error {
    /// Create a dimension mismatch error from two (rows, cols) pairs
    pub fn dims(left: (usize, usize), right: (usize, usize), op: &'static str) -> Self {
        Self::DimensionMismatch {
            left: format!("{}x{}", left.0, left.1),
            right: format!("{}x{}", right.0, right.1),
            op,
        }
    }
}
