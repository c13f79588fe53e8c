//! Flop estimation for C = A*B
//!
//! For every entry B(k,j) the product touches all of A(:,k), so summing
//! `nnz(A(:,k))` over B's pattern estimates the multiply-add work without
//! materializing C. The estimate is a heuristic signal for method
//! selection, not an output-size bound.

use num_traits::Num;

use crate::config::EngineConfig;
use crate::matrix::core::{prepared_sparse, SparseMatrix};

/// Estimated flop count for A*B, capped at `limit`
///
/// Returns None as soon as the running total exceeds `limit`, or if it
/// would overflow a signed 64-bit counter; adversarial patterns with huge
/// per-vector counts must fail closed rather than wrap. Requires
/// `ncols(A) == nrows(B)` in CSC terms (`a.vdim == b.vlen`).
pub fn flopcount<T>(
    a: &SparseMatrix<T>,
    b: &SparseMatrix<T>,
    limit: i64,
    config: &EngineConfig,
) -> Option<i64>
where
    T: Copy + Num + Send + Sync,
{
    let a = prepared_sparse(a, config);
    let b = prepared_sparse(b, config);
    debug_assert_eq!(a.vdim(), b.vlen());

    let mut total: i64 = 0;
    for kb in 0..b.nvec() {
        for p in b.slot_range(kb) {
            let k = b.idx_slice()[p];
            let work = a.vector_nnz(k) as i64;
            total = total.checked_add(work)?;
            if total > limit {
                return None;
            }
        }
    }
    Some(total)
}
