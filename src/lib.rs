//! # Tessellate: an adaptive sparse matrix engine
//!
//! Tessellate stores sparse matrices in whichever of four layouts suits
//! their density, and moves between them automatically:
//!
//! - **Hypersparse**: only non-empty columns (or rows) are represented
//! - **Sparse**: compressed CSC/CSR with a pointer per column (or row)
//! - **Bitmap**: a dense presence byte per slot, entries in any order of
//!   arrival
//! - **Full**: every slot holds an entry, values only
//!
//! On top of the container sit the operations: semiring matrix multiply
//! with automatic method selection, element-wise multiply over the
//! pattern intersection, predicate-based selection, and transpose.
//!
//! ## Deferred updates
//!
//! Single-element updates do not eagerly rewrite compressed storage.
//! Deletions leave tombstones and insertions queue as pending tuples;
//! both are folded in by [`SparseMatrix::wait`], which every whole-matrix
//! operation applies implicitly. Updates are therefore cheap in
//! amortized terms even against compressed layouts:
//!
//! ```
//! use tessellate::{EngineConfig, SparseMatrix};
//!
//! let config = EngineConfig::default();
//! let mut m = SparseMatrix::<f64>::new(4, 4);
//! m.set_element(0, 0, 2.0, None).unwrap();
//! m.set_element(3, 1, 5.0, None).unwrap();
//! m.remove_element(0, 0).unwrap();
//! assert_eq!(m.nvals(&config), 1);
//! ```
//!
//! ## Multiplying
//!
//! [`matrix_multiply`] picks between an outer-product (Gustavson) kernel
//! and a dot-product kernel based on transpose flags, the mask, and
//! workspace estimates:
//!
//! ```
//! use tessellate::{matrix_multiply, plus_times, EngineConfig, SparseMatrix};
//!
//! let config = EngineConfig::default();
//! let a = SparseMatrix::from_tuples(
//!     2, 2, &[0, 1], &[0, 1], &[2.0, 3.0], None, &config,
//! ).unwrap();
//!
//! let (mut c, _) =
//!     matrix_multiply(None, &a, &a, false, false, &plus_times(), &config).unwrap();
//! assert_eq!(c.nvals(&config), 2);
//! ```

pub mod config;
pub mod error;
pub mod matrix;
pub mod ops;
pub(crate) mod parallel;
pub mod utils;

pub use config::{EngineConfig, MultiplyTuning, ThreadBudget};
pub use error::{Error, Result};
pub use matrix::{BinaryOp, SparseMatrix, Sparsity, SparsityControl};
pub use ops::{emult, flopcount, matrix_multiply, plus_times, select, SelectOp, Semiring};
pub use utils::{from_sprs_csc, from_sprs_csr, to_sprs_csc, to_sprs_csr};

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
