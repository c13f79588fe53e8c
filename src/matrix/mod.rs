//! The sparse matrix container and its layout machinery
//!
//! `core` holds the container itself; the sibling modules each add one
//! family of behavior to it: deferred updates (`pending`), layout
//! conversion (`convert`), the automatic layout policy (`conform`), and
//! transposition (`transpose`).

pub(crate) mod conform;
pub(crate) mod convert;
pub(crate) mod core;
pub(crate) mod pending;
pub(crate) mod transpose;

pub use self::core::{BinaryOp, SparseMatrix, Sparsity, SparsityControl};
