//! Matrix-level operations: multiply, element-wise multiply, select
//!
//! Every operation here takes operands by shared reference in any layout
//! or deferred state, produces a fresh conformed result, and never
//! mutates its inputs.

pub mod emult;
pub mod flopcount;
pub mod multiply;
pub mod select;

pub use emult::emult;
pub use flopcount::flopcount;
pub use multiply::{matrix_multiply, plus_times, Semiring};
pub use select::{select, SelectFn, SelectOp};
