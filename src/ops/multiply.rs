//! Matrix multiply: C<M> = A*B over a semiring, with method selection
//!
//! Two kernels do the actual work:
//!
//! - the outer-product (Gustavson) kernel walks the columns of B and
//!   accumulates scaled columns of A, switching between a sort-based and a
//!   dense accumulator per output column;
//! - the dot-product kernel forms C(i,j) as a sorted-merge inner product
//!   of one column of each operand, and so wants both operands reachable
//!   by column.
//!
//! `matrix_multiply` picks between them per the transpose flags, the mask,
//! and workspace-cost estimates. The dot kernel is the only one that can
//! exploit a mask (it simply skips output positions outside the mask's
//! pattern); the outer kernel applies a mask as a post-filter. The
//! returned flag reports which of the two happened, so callers chaining
//! masked operations can tell whether the mask bounded the work.
//!
//! All decisions are on the storage form: operands and mask are first
//! aligned to column orientation, so "column" below always means a stored
//! vector. Transposing the storage of a column-held matrix yields its
//! rows by column, which is how the saxpy cases handle transposed
//! operands.

use num_traits::Num;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::matrix::core::{BinaryOp, SparseMatrix, Storage, Values};
use crate::matrix::transpose::{oriented, transpose_storage};
use crate::ops::emult::emult;
use crate::ops::flopcount::flopcount;
use crate::parallel::cumsum;

/// An (add, multiply) operator pair with the additive identity
///
/// `add` is assumed associative and commutative; the kernels accumulate
/// partial products in storage order.
#[derive(Clone, Copy)]
pub struct Semiring<T> {
    pub add: BinaryOp<T>,
    pub mul: BinaryOp<T>,
    pub zero: T,
}

fn add_op<T: Num>(a: T, b: T) -> T {
    a + b
}

fn mul_op<T: Num>(a: T, b: T) -> T {
    a * b
}

/// The conventional arithmetic semiring (+, *, 0)
pub fn plus_times<T: Copy + Num>() -> Semiring<T> {
    Semiring {
        add: add_op::<T>,
        mul: mul_op::<T>,
        zero: T::zero(),
    }
}

/// Computes C<M> = op(A) * op(B), choosing the kernel per the inputs
///
/// `transpose_a`/`transpose_b` apply to the logical matrices; no caller-
/// visible transpose is materialized unless the selector decides one is
/// the cheapest route. The mask, when present, is structural: C keeps
/// only positions present in M's pattern, and M must have C's dimensions.
///
/// Returns the conformed result and whether the mask bounded the
/// computation itself (true) or was applied as a post-filter (false).
pub fn matrix_multiply<T>(
    mask: Option<&SparseMatrix<T>>,
    a: &SparseMatrix<T>,
    b: &SparseMatrix<T>,
    transpose_a: bool,
    transpose_b: bool,
    semiring: &Semiring<T>,
    config: &EngineConfig,
) -> Result<(SparseMatrix<T>, bool)>
where
    T: Copy + Num + Send + Sync,
{
    let (am, an) = if transpose_a {
        (a.ncols(), a.nrows())
    } else {
        (a.nrows(), a.ncols())
    };
    let (bm, bn) = if transpose_b {
        (b.ncols(), b.nrows())
    } else {
        (b.nrows(), b.ncols())
    };
    if an != bm {
        return Err(Error::dims((am, an), (bm, bn), "multiply"));
    }
    if let Some(m) = mask {
        if m.nrows() != am || m.ncols() != bn {
            return Err(Error::dims((m.nrows(), m.ncols()), (am, bn), "multiply mask"));
        }
    }

    // Everything below works on column-held storage
    let a = oriented(a, true, config);
    let b = oriented(b, true, config);
    let mask = match mask {
        Some(m) => Some(oriented(m, true, config)),
        None => None,
    };

    let tuning = &config.multiply;
    let limit = (a.nnz_held() + b.nnz_held()) as i64;

    let (mut c, exploited) = match (transpose_a, transpose_b) {
        // C = A*B: saxpy is the natural method; a mask switches to dot
        // only when the unmasked work estimate blows past nnz(A)+nnz(B)
        (false, false) => {
            let heavy = flopcount(&a, &b, limit, config).is_none();
            match (&mask, heavy) {
                (Some(m), true) => {
                    let at = transpose_storage(&a);
                    (dot_product(Some(&**m), &at, &b, semiring, config), true)
                }
                _ => {
                    let mut c = outer_product(&a, &b, semiring, config);
                    if let Some(m) = &mask {
                        c = apply_mask(c, m, config)?;
                    }
                    (c, false)
                }
            }
        }

        // C = A'*B: both operands are already column-reachable for dot
        (true, false) => {
            if let Some(m) = &mask {
                (dot_product(Some(&**m), &a, &b, semiring, config), true)
            } else if am == 1 || bn == 1 {
                // Vector output: the dot grid degenerates to one line
                (dot_product(None, &a, &b, semiring, config), false)
            } else {
                let at_cost = a.transpose_work();
                let bt_cost = b.transpose_work();
                let small_grid = am.checked_mul(bn).is_some_and(|g| {
                    g.saturating_mul(tuning.dot_aversion) < at_cost.min(bt_cost)
                });
                if small_grid {
                    (dot_product(None, &a, &b, semiring, config), false)
                } else if at_cost <= tuning.transpose_bias.saturating_mul(bt_cost) {
                    let at = transpose_storage(&a);
                    (outer_product(&at, &b, semiring, config), false)
                } else {
                    // (A'B)' = B'A: transpose the cheaper operand instead
                    let bt = transpose_storage(&b);
                    let ct = outer_product(&bt, &a, semiring, config);
                    (transpose_storage(&ct), false)
                }
            }
        }

        // C = A*B': saxpy either way; pick which operand to transpose
        (false, true) => {
            let at_cost = a.transpose_work();
            let bt_cost = b.transpose_work();
            let mut c = if bt_cost <= tuning.transpose_bias.saturating_mul(at_cost) {
                let bt = transpose_storage(&b);
                outer_product(&a, &bt, semiring, config)
            } else {
                // (AB')' = B*A'
                let at = transpose_storage(&a);
                let ct = outer_product(&b, &at, semiring, config);
                transpose_storage(&ct)
            };
            if let Some(m) = &mask {
                c = apply_mask(c, m, config)?;
            }
            (c, false)
        }

        // C = A'*B' = (B*A)': compute the flipped product and transpose
        (true, true) => {
            let heavy = flopcount(&b, &a, limit, config).is_none();
            match (&mask, heavy) {
                (Some(m), true) => {
                    // C' = B*A under the transposed mask; dot wants B's
                    // rows by column, hence the storage transpose
                    let mt = transpose_storage(m);
                    let bt = transpose_storage(&b);
                    let ct = dot_product(Some(&mt), &bt, &a, semiring, config);
                    (transpose_storage(&ct), true)
                }
                _ => {
                    let ct = outer_product(&b, &a, semiring, config);
                    let mut c = transpose_storage(&ct);
                    if let Some(m) = &mask {
                        c = apply_mask(c, m, config)?;
                    }
                    (c, false)
                }
            }
        }
    };

    c.conform(config);
    Ok((c, exploited))
}

/// Keeps only C's entries whose position appears in the mask's pattern
fn apply_mask<T>(
    c: SparseMatrix<T>,
    mask: &SparseMatrix<T>,
    config: &EngineConfig,
) -> Result<SparseMatrix<T>>
where
    T: Copy + Num + Send + Sync,
{
    fn keep_left<T: Copy>(x: T, _m: T) -> T {
        x
    }
    emult(&c, mask, keep_left::<T>, config)
}

/// Gustavson saxpy kernel: C(:,j) = sum_k B(k,j) * A(:,k)
///
/// Both operands must be materialized column-held storage with
/// `a.vdim == b.vlen`. The result is column-held sparse, not conformed.
fn outer_product<T>(
    a: &SparseMatrix<T>,
    b: &SparseMatrix<T>,
    semiring: &Semiring<T>,
    config: &EngineConfig,
) -> SparseMatrix<T>
where
    T: Copy + Num + Send + Sync,
{
    debug_assert_eq!(a.vdim(), b.vlen());
    let vlen = a.vlen();
    let a_values = a.values_ref();
    let b_values = b.values_ref();
    let threshold = config.multiply.dense_accum_threshold;

    let compute_column = |kb: usize| -> (usize, Vec<usize>, Vec<T>) {
        let j = b.vector_id(kb);
        let range = b.slot_range(kb);

        // Work estimate for this column picks the accumulator
        let mut est = 0usize;
        for p in range.clone() {
            est = est.saturating_add(a.vector_nnz(b.idx_slice()[p]));
        }

        if est <= threshold {
            // Sort-based: gather all partial products, sort, fold runs
            let mut pairs: Vec<(usize, T)> = Vec::with_capacity(est);
            for p in range {
                let k = b.idx_slice()[p];
                let bval = b_values.get(p);
                if let Some(ka) = a.find_vector(k) {
                    for q in a.slot_range(ka) {
                        pairs.push((a.idx_slice()[q], (semiring.mul)(a_values.get(q), bval)));
                    }
                }
            }
            pairs.sort_unstable_by_key(|&(i, _)| i);
            let mut idx = Vec::with_capacity(pairs.len());
            let mut vals: Vec<T> = Vec::with_capacity(pairs.len());
            for (i, v) in pairs {
                match (idx.last(), vals.last_mut()) {
                    (Some(&last), Some(acc)) if last == i => *acc = (semiring.add)(*acc, v),
                    _ => {
                        idx.push(i);
                        vals.push(v);
                    }
                }
            }
            (j, idx, vals)
        } else {
            // Dense accumulation array with a touched-index list
            let mut acc = vec![semiring.zero; vlen];
            let mut present = vec![false; vlen];
            let mut touched = Vec::new();
            for p in range {
                let k = b.idx_slice()[p];
                let bval = b_values.get(p);
                if let Some(ka) = a.find_vector(k) {
                    for q in a.slot_range(ka) {
                        let i = a.idx_slice()[q];
                        let v = (semiring.mul)(a_values.get(q), bval);
                        if present[i] {
                            acc[i] = (semiring.add)(acc[i], v);
                        } else {
                            present[i] = true;
                            acc[i] = v;
                            touched.push(i);
                        }
                    }
                }
            }
            touched.sort_unstable();
            let vals = touched.iter().map(|&i| acc[i]).collect();
            (j, touched, vals)
        }
    };

    let work = a.nnz_held() + b.nnz_held();
    let per_col: Vec<(usize, Vec<usize>, Vec<T>)> =
        if config.threads.nthreads_for(work) > 1 && b.nvec() > 1 {
            (0..b.nvec()).into_par_iter().map(compute_column).collect()
        } else {
            (0..b.nvec()).map(compute_column).collect()
        };

    assemble(vlen, b.vdim(), per_col)
}

/// Dot-product kernel: C = A'*B with C(i,j) = A(:,i) . B(:,j)
///
/// With a mask, only the mask's positions are computed; without one, the
/// full grid of populated column pairs is. Entries whose column patterns
/// do not intersect produce nothing. The result is column-held sparse,
/// not conformed.
fn dot_product<T>(
    mask: Option<&SparseMatrix<T>>,
    a: &SparseMatrix<T>,
    b: &SparseMatrix<T>,
    semiring: &Semiring<T>,
    config: &EngineConfig,
) -> SparseMatrix<T>
where
    T: Copy + Num + Send + Sync,
{
    debug_assert_eq!(a.vlen(), b.vlen());
    let a_values = a.values_ref();
    let b_values = b.values_ref();

    let dot_pair = |ka: usize, kb: usize| -> Option<T> {
        let ra = a.slot_range(ka);
        let rb = b.slot_range(kb);
        dot_vectors(
            &a.idx_slice()[ra.clone()],
            a_values,
            ra.start,
            &b.idx_slice()[rb.clone()],
            b_values,
            rb.start,
            semiring,
        )
    };

    let per_col: Vec<(usize, Vec<usize>, Vec<T>)> = match mask {
        Some(m) => {
            debug_assert_eq!(m.vlen(), a.vdim());
            let compute = |km: usize| -> (usize, Vec<usize>, Vec<T>) {
                let j = m.vector_id(km);
                let mut idx = Vec::new();
                let mut vals = Vec::new();
                if let Some(kb) = b.find_vector(j) {
                    for p in m.slot_range(km) {
                        let i = m.idx_slice()[p];
                        if let Some(ka) = a.find_vector(i) {
                            if let Some(v) = dot_pair(ka, kb) {
                                idx.push(i);
                                vals.push(v);
                            }
                        }
                    }
                }
                (j, idx, vals)
            };
            let work = m.nnz_held();
            if config.threads.nthreads_for(work) > 1 && m.nvec() > 1 {
                (0..m.nvec()).into_par_iter().map(compute).collect()
            } else {
                (0..m.nvec()).map(compute).collect()
            }
        }
        None => {
            let compute = |kb: usize| -> (usize, Vec<usize>, Vec<T>) {
                let j = b.vector_id(kb);
                let mut idx = Vec::new();
                let mut vals = Vec::new();
                for ka in 0..a.nvec() {
                    if let Some(v) = dot_pair(ka, kb) {
                        idx.push(a.vector_id(ka));
                        vals.push(v);
                    }
                }
                (j, idx, vals)
            };
            let work = a.nnz_held() + b.nnz_held();
            if config.threads.nthreads_for(work) > 1 && b.nvec() > 1 {
                (0..b.nvec()).into_par_iter().map(compute).collect()
            } else {
                (0..b.nvec()).map(compute).collect()
            }
        }
    };

    assemble(a.vdim(), b.vdim(), per_col)
}

/// Sorted-merge inner product; None when the patterns do not intersect
fn dot_vectors<T: Copy>(
    ai: &[usize],
    av: &Values<T>,
    a_base: usize,
    bi: &[usize],
    bv: &Values<T>,
    b_base: usize,
    semiring: &Semiring<T>,
) -> Option<T> {
    let (mut pa, mut pb) = (0, 0);
    let mut acc = semiring.zero;
    let mut hit = false;
    while pa < ai.len() && pb < bi.len() {
        match ai[pa].cmp(&bi[pb]) {
            std::cmp::Ordering::Less => pa += 1,
            std::cmp::Ordering::Greater => pb += 1,
            std::cmp::Ordering::Equal => {
                let prod = (semiring.mul)(av.get(a_base + pa), bv.get(b_base + pb));
                acc = if hit { (semiring.add)(acc, prod) } else { prod };
                hit = true;
                pa += 1;
                pb += 1;
            }
        }
    }
    hit.then_some(acc)
}

/// Stitches per-column results into one column-held sparse matrix
fn assemble<T: Copy + Num>(
    vlen: usize,
    vdim: usize,
    per_col: Vec<(usize, Vec<usize>, Vec<T>)>,
) -> SparseMatrix<T> {
    let mut counts = vec![0usize; vdim];
    for (j, idx, _) in &per_col {
        counts[*j] = idx.len();
    }
    let vec_ptr = cumsum(&counts);
    let nnz = vec_ptr[vdim];
    let mut idx = Vec::with_capacity(nnz);
    let mut vals = Vec::with_capacity(nnz);
    for (_, i, v) in per_col {
        idx.extend(i);
        vals.extend(v);
    }

    let mut c = SparseMatrix::new_with(vlen, vdim, true);
    c.storage = Storage::Sparse {
        vec_ptr,
        idx,
        values: Values::Dense(vals),
    };
    c.update_nvec_nonempty();
    c
}
