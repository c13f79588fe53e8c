//! Entry filtering: T = select(A, predicate)
//!
//! Each predicate is a specialized scan over one vector at a time. The
//! positional predicates are defined on (row, col) of the logical matrix;
//! rather than physically transposing a CSR operand, the predicate itself
//! is adjusted (a lower-triangle test on columns becomes an
//! upper-triangle test on rows with the offset negated), so the scan
//! always runs over the stored vectors.
//!
//! Within a vector, indices ascend, which the triangular scans exploit:
//! a lower bound locates the first kept entry of a suffix, and a prefix
//! scan stops at the first failing entry because everything after it
//! fails too.

use num_traits::Num;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::matrix::core::{prepared_sparse, SparseMatrix, Storage, Values};
use crate::error::Result;
use crate::parallel::cumsum;

/// Per-entry predicate: f(row, col, nrows, ncols, value, thunk)
pub type SelectFn<T> = fn(usize, usize, usize, usize, &T, &T) -> bool;

/// The predicate family understood by `select`
#[derive(Clone)]
pub enum SelectOp<T> {
    /// Keep entries on or below the k-th diagonal: `col - row <= k`
    Tril(i64),
    /// Keep entries on or above the k-th diagonal: `col - row >= k`
    Triu(i64),
    /// Keep the k-th diagonal only: `col - row == k`
    Diag(i64),
    /// Drop the k-th diagonal: `col - row != k`
    Offdiag(i64),
    /// Keep entries whose value is not the additive zero
    Nonzero,
    /// User-supplied predicate with an auxiliary thunk value
    User(SelectFn<T>, T),
}

/// Filters A's entries by the predicate, producing a new matrix
///
/// The result has A's orientation and dimensions and is conformed.
pub fn select<T>(
    a: &SparseMatrix<T>,
    op: &SelectOp<T>,
    config: &EngineConfig,
) -> Result<SparseMatrix<T>>
where
    T: Copy + Num + Send + Sync,
{
    let a = prepared_sparse(a, config);
    let vlen = a.vlen();

    let scan_slot = |k: usize| -> (usize, Vec<usize>, Vec<T>) {
        let j = a.vector_id(k);
        let range = a.slot_range(k);
        let slice = &a.idx_slice()[range.clone()];
        let (idx, vals) = scan_vector(&a, op, j, slice, range.start, vlen);
        (j, idx, vals)
    };

    let per_vec: Vec<(usize, Vec<usize>, Vec<T>)> =
        if config.threads.nthreads_for(a.nnz_held()) > 1 && a.nvec() > 1 {
            (0..a.nvec()).into_par_iter().map(scan_slot).collect()
        } else {
            (0..a.nvec()).map(scan_slot).collect()
        };

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

    let mut c = SparseMatrix::new_with(a.nrows(), a.ncols(), a.is_csc());
    c.storage = Storage::Sparse {
        vec_ptr,
        idx,
        values: Values::Dense(vals),
    };
    c.update_nvec_nonempty();
    c.conform(config);
    Ok(c)
}

/// Scans one vector, appending kept entries in ascending index order
fn scan_vector<T: Copy + Num>(
    a: &SparseMatrix<T>,
    op: &SelectOp<T>,
    j: usize,
    slice: &[usize],
    base: usize,
    vlen: usize,
) -> (Vec<usize>, Vec<T>) {
    let values = a.values_ref();
    let csc = a.is_csc();
    // In storage coordinates, col - row is j - i for CSC and i - j for
    // CSR; the positional predicates fold the difference accordingly
    let diff = |i: usize| -> i64 {
        if csc {
            j as i64 - i as i64
        } else {
            i as i64 - j as i64
        }
    };

    let copy_range = |lo: usize, hi: usize| -> (Vec<usize>, Vec<T>) {
        let idx = slice[lo..hi].to_vec();
        let vals = (lo..hi).map(|p| values.get(base + p)).collect();
        (idx, vals)
    };

    match op {
        SelectOp::Tril(k) => {
            if csc {
                // col - row <= k  <=>  i >= j - k: a suffix of the vector
                let bound = j as i64 - k;
                let lo = lower_bound(slice, bound, vlen);
                copy_range(lo, slice.len())
            } else {
                // i - j <= k: a prefix; stop at the first failure
                let mut hi = 0;
                while hi < slice.len() && diff(slice[hi]) <= *k {
                    hi += 1;
                }
                copy_range(0, hi)
            }
        }
        SelectOp::Triu(k) => {
            if csc {
                // col - row >= k  <=>  i <= j - k: a prefix; entries are
                // row-sorted, so the first failure ends the vector
                let mut hi = 0;
                while hi < slice.len() && diff(slice[hi]) >= *k {
                    hi += 1;
                }
                copy_range(0, hi)
            } else {
                // i >= j + k: a suffix
                let bound = j as i64 + k;
                let lo = lower_bound(slice, bound, vlen);
                copy_range(lo, slice.len())
            }
        }
        SelectOp::Diag(k) => {
            let target = if csc { j as i64 - k } else { j as i64 + k };
            if target < 0 || target as usize >= vlen {
                return (Vec::new(), Vec::new());
            }
            let i = target as usize;
            // Fully dense vector: the entry sits at its own index
            let pos = if slice.len() == vlen {
                Some(i)
            } else {
                slice.binary_search(&i).ok()
            };
            match pos {
                Some(p) => (vec![i], vec![values.get(base + p)]),
                None => (Vec::new(), Vec::new()),
            }
        }
        SelectOp::Offdiag(k) => {
            let mut idx = Vec::with_capacity(slice.len());
            let mut vals = Vec::with_capacity(slice.len());
            for (p, &i) in slice.iter().enumerate() {
                if diff(i) != *k {
                    idx.push(i);
                    vals.push(values.get(base + p));
                }
            }
            (idx, vals)
        }
        SelectOp::Nonzero => {
            let mut idx = Vec::with_capacity(slice.len());
            let mut vals = Vec::with_capacity(slice.len());
            for (p, &i) in slice.iter().enumerate() {
                let v = values.get(base + p);
                if !v.is_zero() {
                    idx.push(i);
                    vals.push(v);
                }
            }
            (idx, vals)
        }
        SelectOp::User(f, thunk) => {
            let (nrows, ncols) = (a.nrows(), a.ncols());
            let mut idx = Vec::with_capacity(slice.len());
            let mut vals = Vec::with_capacity(slice.len());
            for (p, &i) in slice.iter().enumerate() {
                let (row, col) = if csc { (i, j) } else { (j, i) };
                let v = values.get(base + p);
                if f(row, col, nrows, ncols, &v, thunk) {
                    idx.push(i);
                    vals.push(v);
                }
            }
            (idx, vals)
        }
    }
}

/// First position in the sorted slice with index >= bound
fn lower_bound(slice: &[usize], bound: i64, vlen: usize) -> usize {
    if bound <= 0 {
        return 0;
    }
    if bound as usize >= vlen {
        return slice.len();
    }
    let b = bound as usize;
    // Dense fast path: position equals index
    if slice.len() == vlen {
        return b;
    }
    slice.partition_point(|&i| i < b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn triples_of(m: &mut SparseMatrix<i64>, config: &EngineConfig) -> Vec<(usize, usize, i64)> {
        let (rows, cols, vals) = m.extract_tuples(config);
        let mut t: Vec<_> = rows
            .into_iter()
            .zip(cols)
            .zip(vals)
            .map(|((r, c), v)| (r, c, v))
            .collect();
        t.sort();
        t
    }

    #[test]
    fn test_tril_on_full_matrix() {
        let config = config();
        let a = SparseMatrix::full_iso(3, 3, 1i64);
        let mut t = select(&a, &SelectOp::Tril(0), &config).unwrap();

        // The 6 lower-triangular entries including the diagonal
        assert_eq!(
            triples_of(&mut t, &config),
            vec![
                (0, 0, 1),
                (1, 0, 1),
                (1, 1, 1),
                (2, 0, 1),
                (2, 1, 1),
                (2, 2, 1)
            ]
        );
    }

    #[test]
    fn test_triu_with_offset() {
        let config = config();
        let a = SparseMatrix::full_iso(3, 3, 1i64);
        let mut t = select(&a, &SelectOp::Triu(1), &config).unwrap();
        assert_eq!(
            triples_of(&mut t, &config),
            vec![(0, 1, 1), (0, 2, 1), (1, 2, 1)]
        );
    }

    #[test]
    fn test_tril_matches_triu_on_reoriented_matrix() {
        let config = config();
        // Same logical pattern stored CSC and CSR must select identically
        let csc = SparseMatrix::from_tuples(
            4,
            4,
            &[0, 1, 2, 3, 0, 3],
            &[0, 1, 2, 3, 3, 0],
            &[1, 2, 3, 4, 5, 6],
            None,
            &config,
        )
        .unwrap();
        let csr = SparseMatrix::from_csr(
            4,
            4,
            vec![0, 2, 3, 4, 6],
            vec![0, 3, 1, 2, 0, 3],
            vec![1, 5, 2, 3, 6, 4],
        )
        .unwrap();

        for k in [-1i64, 0, 1] {
            let mut a = select(&csc, &SelectOp::Tril(k), &config).unwrap();
            let mut b = select(&csr, &SelectOp::Tril(k), &config).unwrap();
            assert_eq!(triples_of(&mut a, &config), triples_of(&mut b, &config));
        }
    }

    #[test]
    fn test_diag_extraction() {
        let config = config();
        let a = SparseMatrix::from_tuples(
            3,
            3,
            &[0, 1, 2, 0],
            &[0, 1, 2, 2],
            &[1, 2, 3, 9],
            None,
            &config,
        )
        .unwrap();

        let mut d = select(&a, &SelectOp::Diag(0), &config).unwrap();
        assert_eq!(
            triples_of(&mut d, &config),
            vec![(0, 0, 1), (1, 1, 2), (2, 2, 3)]
        );

        let mut d2 = select(&a, &SelectOp::Diag(2), &config).unwrap();
        assert_eq!(triples_of(&mut d2, &config), vec![(0, 2, 9)]);
    }

    #[test]
    fn test_offdiag_complements_diag() {
        let config = config();
        let a = SparseMatrix::from_tuples(
            3,
            3,
            &[0, 1, 2, 0],
            &[0, 1, 2, 2],
            &[1, 2, 3, 9],
            None,
            &config,
        )
        .unwrap();
        let mut o = select(&a, &SelectOp::Offdiag(0), &config).unwrap();
        assert_eq!(triples_of(&mut o, &config), vec![(0, 2, 9)]);
    }

    #[test]
    fn test_nonzero_drops_explicit_zeros() {
        let config = config();
        let a = SparseMatrix::from_tuples(
            2,
            2,
            &[0, 1, 0],
            &[0, 1, 1],
            &[4, 0, 0],
            None,
            &config,
        )
        .unwrap();
        let mut z = select(&a, &SelectOp::Nonzero, &config).unwrap();
        assert_eq!(triples_of(&mut z, &config), vec![(0, 0, 4)]);
    }

    #[test]
    fn test_user_predicate_sees_logical_coordinates() {
        let config = config();
        fn above_row(row: usize, _col: usize, _nr: usize, _nc: usize, _v: &i64, thunk: &i64) -> bool {
            (row as i64) < *thunk
        }

        // CSR storage: the predicate must still receive logical rows
        let a = SparseMatrix::from_csr(
            3,
            2,
            vec![0, 1, 2, 3],
            vec![0, 1, 0],
            vec![1, 2, 3],
        )
        .unwrap();
        let mut s = select(&a, &SelectOp::User(above_row, 2), &config).unwrap();
        assert_eq!(triples_of(&mut s, &config), vec![(0, 0, 1), (1, 1, 2)]);
    }
}
