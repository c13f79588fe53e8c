//! Element-wise multiply: C = A op B over the pattern intersection
//!
//! A classic two-cursor merge per vector, with two shortcuts:
//!
//! - vectors whose index ranges do not overlap at all produce nothing and
//!   are skipped outright;
//! - when one vector is more than `imbalance_ratio` (default 256) times
//!   denser than the other, the sparse side drives and the dense cursor
//!   leaps forward by binary search instead of scanning linearly.
//!
//! Union-semantics element-wise addition is a different algorithm and is
//! not provided here.

use num_traits::Num;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::matrix::core::{prepared_sparse, BinaryOp, SparseMatrix, Storage, Values};
use crate::matrix::transpose::oriented;
use crate::parallel::cumsum;

/// Computes C(i,j) = op(A(i,j), B(i,j)) wherever both entries exist
///
/// The output pattern is exactly the intersection of A's and B's
/// patterns; positions present in only one operand produce nothing.
/// Operands may be in any layout or deferred state; the result takes A's
/// orientation and is conformed.
pub fn emult<T>(
    a: &SparseMatrix<T>,
    b: &SparseMatrix<T>,
    op: BinaryOp<T>,
    config: &EngineConfig,
) -> Result<SparseMatrix<T>>
where
    T: Copy + Num + Send + Sync,
{
    if a.nrows() != b.nrows() || a.ncols() != b.ncols() {
        return Err(Error::dims(
            (a.nrows(), a.ncols()),
            (b.nrows(), b.ncols()),
            "emult",
        ));
    }

    let is_csc = a.is_csc();
    let a = prepared_sparse(a, config);
    let b = oriented(b, is_csc, config);
    let ratio = config.multiply.imbalance_ratio.max(1);

    // One task per vector of A that B also populates
    let slots: Vec<(usize, usize)> = (0..a.nvec())
        .filter_map(|ka| {
            let j = a.vector_id(ka);
            b.find_vector(j).map(|kb| (ka, kb))
        })
        .collect();

    let merge_slot = |&(ka, kb): &(usize, usize)| -> (usize, Vec<usize>, Vec<T>) {
        let j = a.vector_id(ka);
        let ra = a.slot_range(ka);
        let rb = b.slot_range(kb);
        let (idx, vals) = merge_vectors(
            &a.idx_slice()[ra.clone()],
            a.values_ref(),
            ra.start,
            &b.idx_slice()[rb.clone()],
            b.values_ref(),
            rb.start,
            op,
            ratio,
        );
        (j, idx, vals)
    };

    let work = a.nnz_held().min(b.nnz_held());
    let per_vec: Vec<(usize, Vec<usize>, Vec<T>)> =
        if config.threads.nthreads_for(work) > 1 && slots.len() > 1 {
            slots.par_iter().map(merge_slot).collect()
        } else {
            slots.iter().map(merge_slot).collect()
        };

    // Assemble the result vector by vector
    let vdim = a.vdim();
    let mut counts = vec![0usize; vdim];
    for (j, idx, _) in &per_vec {
        counts[*j] = idx.len();
    }
    let vec_ptr = cumsum(&counts);
    let nnz = vec_ptr[vdim];
    let mut idx = Vec::with_capacity(nnz);
    let mut vals = Vec::with_capacity(nnz);
    for (_, i, v) in per_vec {
        idx.extend(i);
        vals.extend(v);
    }

    let mut c = SparseMatrix::new_with(a.nrows(), a.ncols(), is_csc);
    c.storage = Storage::Sparse {
        vec_ptr,
        idx,
        values: Values::Dense(vals),
    };
    c.update_nvec_nonempty();
    c.conform(config);
    Ok(c)
}

/// Merges one pair of sorted vectors, emitting op(a, b) at shared indices
#[allow(clippy::too_many_arguments)]
fn merge_vectors<T: Copy>(
    ai: &[usize],
    av: &Values<T>,
    a_base: usize,
    bi: &[usize],
    bv: &Values<T>,
    b_base: usize,
    op: BinaryOp<T>,
    ratio: usize,
) -> (Vec<usize>, Vec<T>) {
    // Empty or entirely disjoint index ranges: nothing to emit
    if ai.is_empty() || bi.is_empty() {
        return (Vec::new(), Vec::new());
    }
    if ai[ai.len() - 1] < bi[0] || bi[bi.len() - 1] < ai[0] {
        return (Vec::new(), Vec::new());
    }

    // Intersection size is bounded by the smaller side
    let cap = ai.len().min(bi.len());
    let mut idx = Vec::with_capacity(cap);
    let mut vals = Vec::with_capacity(cap);

    if ai.len() > ratio * bi.len() {
        merge_skewed(bi, bv, b_base, ai, av, a_base, |x, y| op(y, x), &mut idx, &mut vals);
    } else if bi.len() > ratio * ai.len() {
        merge_skewed(ai, av, a_base, bi, bv, b_base, op, &mut idx, &mut vals);
    } else {
        // Comparable sizes: linear merge
        let (mut pa, mut pb) = (0, 0);
        while pa < ai.len() && pb < bi.len() {
            match ai[pa].cmp(&bi[pb]) {
                std::cmp::Ordering::Less => pa += 1,
                std::cmp::Ordering::Greater => pb += 1,
                std::cmp::Ordering::Equal => {
                    idx.push(ai[pa]);
                    vals.push(op(av.get(a_base + pa), bv.get(b_base + pb)));
                    pa += 1;
                    pb += 1;
                }
            }
        }
    }
    (idx, vals)
}

/// One-sided merge for heavily imbalanced vectors
///
/// The sparse side advances one entry at a time; the dense cursor jumps
/// forward by binary search whenever it trails the sparse index.
#[allow(clippy::too_many_arguments)]
fn merge_skewed<T: Copy>(
    si: &[usize],
    sv: &Values<T>,
    s_base: usize,
    di: &[usize],
    dv: &Values<T>,
    d_base: usize,
    op: impl Fn(T, T) -> T,
    idx: &mut Vec<usize>,
    vals: &mut Vec<T>,
) {
    let mut pd = 0;
    for (ps, &i) in si.iter().enumerate() {
        if pd >= di.len() {
            break;
        }
        if di[pd] < i {
            pd += di[pd..].partition_point(|&d| d < i);
            if pd >= di.len() {
                break;
            }
        }
        if di[pd] == i {
            idx.push(i);
            vals.push(op(sv.get(s_base + ps), dv.get(d_base + pd)));
            pd += 1;
        }
    }
}
