//! Explicit transpose and orientation alignment
//!
//! The transpose is a bucket sort: count entries per destination vector,
//! prefix-sum the counts into pointers, then scatter each entry through a
//! per-vector write cursor. The same storage permutation also serves to
//! re-orient a matrix (CSR <-> CSC): transposing the storage while
//! flipping the orientation flag leaves the logical matrix unchanged.

use std::borrow::Cow;

use num_traits::Num;

use crate::config::EngineConfig;
use crate::matrix::core::{prepared_sparse, SparseMatrix, Storage, Values};

impl<T: Copy + Num + Send + Sync> SparseMatrix<T> {
    /// Returns the transpose as a new matrix in the same orientation
    ///
    /// Accepts any layout or deferred state; the result is conformed.
    pub fn transpose(&self, config: &EngineConfig) -> SparseMatrix<T> {
        let mut t = transpose_storage(&prepared_sparse(self, config));
        t.conform(config);
        t
    }

    /// The workspace cost of materializing this matrix's transpose
    ///
    /// Entries moved plus the bucket arrays; the multiply method selector
    /// weighs this against dot-product output workspace.
    pub(crate) fn transpose_work(&self) -> usize {
        self.live_count() + self.vlen + self.vdim
    }
}

/// A view of `m` stored in the requested orientation
///
/// Borrows when the orientation already matches; otherwise transposes the
/// storage and flips the flag, which preserves the logical matrix.
pub(crate) fn oriented<'a, T>(
    m: &'a SparseMatrix<T>,
    is_csc: bool,
    config: &EngineConfig,
) -> Cow<'a, SparseMatrix<T>>
where
    T: Copy + Num + Send + Sync,
{
    if m.is_csc() == is_csc {
        prepared_sparse(m, config)
    } else {
        let mut t = transpose_storage(&prepared_sparse(m, config));
        t.is_csc = is_csc;
        Cow::Owned(t)
    }
}

/// Bucket-sort transpose of the storage arrays (orientation flag kept)
pub(crate) fn transpose_storage<T: Copy + Num>(m: &SparseMatrix<T>) -> SparseMatrix<T> {
    debug_assert!(m.is_materialized());

    let vlen = m.vlen();
    let nnz = m.nnz_held();
    let values = m.values_ref();

    // Count entries per destination vector (the old within-vector index)
    let mut counts = vec![0usize; vlen];
    for k in 0..m.nvec() {
        for p in m.slot_range(k) {
            counts[m.idx_slice()[p]] += 1;
        }
    }

    let mut vec_ptr = crate::parallel::cumsum(&counts);
    let mut idx = vec![0usize; nnz];
    let iso = values.is_iso();
    let mut vals = if iso {
        Vec::new()
    } else {
        vec![T::zero(); nnz]
    };

    // Scatter through per-vector cursors; source order is (vector, index)
    // ascending, so each destination vector fills in ascending order
    let mut cursor = vec_ptr.clone();
    for k in 0..m.nvec() {
        let j = m.vector_id(k);
        for p in m.slot_range(k) {
            let i = m.idx_slice()[p];
            let q = cursor[i];
            idx[q] = j;
            if !iso {
                vals[q] = values.get(p);
            }
            cursor[i] += 1;
        }
    }

    let new_values = match values {
        Values::Iso(v) => Values::Iso(*v),
        Values::Dense(_) => Values::Dense(vals),
    };

    let mut t = SparseMatrix::new_with(0, 0, m.is_csc());
    t.vlen = m.vdim();
    t.vdim = vlen;
    vec_ptr.truncate(vlen + 1);
    t.storage = Storage::Sparse {
        vec_ptr,
        idx,
        values: new_values,
    };
    t.invalidate_nvec_nonempty();
    t.update_nvec_nonempty();
    t
}
