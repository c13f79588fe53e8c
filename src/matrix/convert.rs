//! Pairwise conversions between the four physical layouts
//!
//! Each converter is a one-directional function; the conversion engine
//! composes them as needed (e.g. bitmap -> hypersparse goes through
//! sparse). Converters build their replacement arrays completely before
//! swapping them into the container, so a matrix is never observable in a
//! half-converted state.
//!
//! Hyper<->sparse conversions only rewrite pointer structure and tolerate
//! zombies, pending tuples, and jumbled vectors. Conversions touching the
//! dense grid (bitmap, full) require a materialized matrix.

use num_traits::Num;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::matrix::core::{SparseMatrix, Sparsity, Storage, Values};
use crate::parallel::{cumsum, exclusive_scan_tasks, partition};

impl<T: Copy + Num + Send + Sync> SparseMatrix<T> {
    /// Converts to the requested layout, composing pairwise converters
    ///
    /// Converting to Full requires every slot present; anything else is
    /// reachable from anywhere. Deferred work is flushed first when the
    /// target touches the dense grid (zombies and pending tuples only
    /// survive hyper<->sparse moves).
    pub fn convert_to(&mut self, target: Sparsity, config: &EngineConfig) -> Result<()> {
        if matches!(target, Sparsity::Bitmap | Sparsity::Full) && !self.is_materialized() {
            self.wait(config);
        }
        if target == Sparsity::Full && !self.is_all_present() {
            return Err(Error::DomainMismatch(
                "cannot convert to full: not every slot holds an entry".to_string(),
            ));
        }
        match target {
            Sparsity::Full => self.to_full(),
            Sparsity::Bitmap => self.to_bitmap(config),
            Sparsity::Sparse => self.to_sparse(config),
            Sparsity::Hypersparse => {
                self.to_sparse(config);
                self.sparse_to_hyper();
            }
        }
        Ok(())
    }

    /// Any layout -> Sparse
    pub(crate) fn to_sparse(&mut self, config: &EngineConfig) {
        match self.sparsity() {
            Sparsity::Sparse => {}
            Sparsity::Hypersparse => self.hyper_to_sparse(config),
            Sparsity::Bitmap => self.bitmap_to_sparse(config),
            Sparsity::Full => self.full_to_sparse(),
        }
    }

    /// Hypersparse -> Sparse: drop the vector id list
    ///
    /// Every vector gets a pointer slot; a vector missing from the
    /// hyperlist gets the start offset of its next present vector.
    /// Parallelized by partitioning the full vector range and binary
    /// searching the hyperlist once per task boundary.
    pub(crate) fn hyper_to_sparse(&mut self, config: &EngineConfig) {
        let (vec_ids, vec_ptr) = match &self.storage {
            Storage::Hyper {
                vec_ids, vec_ptr, ..
            } => (vec_ids, vec_ptr),
            _ => return,
        };

        let vdim = self.vdim;
        let mut full_ptr = vec![0usize; vdim + 1];
        let nnz = *vec_ptr.last().unwrap_or(&0);
        full_ptr[vdim] = nnz;

        let n_tasks = config.threads.nthreads_for(vdim);
        if n_tasks <= 1 || vec_ids.is_empty() {
            let mut k = 0;
            for (j, slot) in full_ptr.iter_mut().enumerate().take(vdim) {
                while k < vec_ids.len() && vec_ids[k] < j {
                    k += 1;
                }
                *slot = if k < vec_ids.len() {
                    vec_ptr[k]
                } else {
                    nnz
                };
            }
        } else {
            let ranges = partition(vdim, n_tasks);
            full_ptr[..vdim]
                .par_chunks_mut(ranges[0].len().max(1))
                .enumerate()
                .for_each(|(t, chunk)| {
                    let j0 = t * ranges[0].len().max(1);
                    // First populated vector at or after this task's range
                    let mut k = vec_ids.partition_point(|&v| v < j0);
                    for (dj, slot) in chunk.iter_mut().enumerate() {
                        let j = j0 + dj;
                        while k < vec_ids.len() && vec_ids[k] < j {
                            k += 1;
                        }
                        *slot = if k < vec_ids.len() { vec_ptr[k] } else { nnz };
                    }
                });
        }

        let (idx, values) = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Hyper { idx, values, .. } => (idx, values),
            _ => unreachable!(),
        };
        self.storage = Storage::Sparse {
            vec_ptr: full_ptr,
            idx,
            values,
        };
    }

    /// Sparse -> Hypersparse: keep pointer slots only for non-empty vectors
    pub(crate) fn sparse_to_hyper(&mut self) {
        // Scalars and single-vector matrices never benefit from a hyperlist
        if self.vdim <= 1 {
            return;
        }
        let vec_ptr = match &self.storage {
            Storage::Sparse { vec_ptr, .. } => vec_ptr,
            _ => return,
        };

        let mut vec_ids = Vec::new();
        let mut hyper_ptr = vec![0usize];
        for j in 0..self.vdim {
            if vec_ptr[j + 1] > vec_ptr[j] {
                vec_ids.push(j);
                hyper_ptr.push(vec_ptr[j + 1]);
            }
        }

        let (idx, values) = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Sparse { idx, values, .. } => (idx, values),
            _ => unreachable!(),
        };
        self.nvec_nonempty = vec_ids.len() as i64;
        self.storage = Storage::Hyper {
            vec_ids,
            vec_ptr: hyper_ptr,
            idx,
            values,
        };
    }

    /// Sparse/Hyper/Full -> Bitmap: scatter entries into the dense grid
    ///
    /// Iso value sets stay iso; only the presence bytes are built.
    pub(crate) fn to_bitmap(&mut self, config: &EngineConfig) {
        match self.sparsity() {
            Sparsity::Bitmap => return,
            Sparsity::Full => {
                self.full_to_bitmap();
                return;
            }
            Sparsity::Hypersparse => self.hyper_to_sparse(config),
            Sparsity::Sparse => {}
        }
        debug_assert!(self.is_materialized());

        let vlen = self.vlen;
        let vdim = self.vdim;
        let grid = vlen * vdim;

        let (vec_ptr, idx, values) = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Sparse {
                vec_ptr,
                idx,
                values,
            } => (vec_ptr, idx, values),
            _ => unreachable!(),
        };
        let nvals = idx.len();

        let mut present = vec![0u8; grid];
        let new_values = if values.is_iso() || vlen == 0 {
            // Scatter presence only
            let n_tasks = config.threads.nthreads_for(nvals);
            scatter_presence(&mut present, &vec_ptr, &idx, vlen, vdim, n_tasks);
            values
        } else {
            let mut grid_vals = vec![T::zero(); grid];
            let n_tasks = config.threads.nthreads_for(nvals);
            if n_tasks <= 1 {
                for j in 0..vdim {
                    for p in vec_ptr[j]..vec_ptr[j + 1] {
                        let q = j * vlen + idx[p];
                        present[q] = 1;
                        grid_vals[q] = values.get(p);
                    }
                }
            } else {
                present
                    .par_chunks_mut(vlen)
                    .zip(grid_vals.par_chunks_mut(vlen))
                    .enumerate()
                    .for_each(|(j, (pres, vals))| {
                        for p in vec_ptr[j]..vec_ptr[j + 1] {
                            pres[idx[p]] = 1;
                            vals[idx[p]] = values.get(p);
                        }
                    });
            }
            Values::Dense(grid_vals)
        };

        self.storage = Storage::Bitmap {
            present,
            nvals,
            values: new_values,
        };
    }

    /// Bitmap -> Sparse: two-pass count + prefix sum + gather
    ///
    /// Pass one counts set bits per vector, parallel by vector when there
    /// are enough vectors, otherwise by row block with per-task private
    /// histograms merged by an exclusive prefix sum. Pass two gathers
    /// indices (and values, unless iso) through the per-task write
    /// cursors computed by the scan.
    pub(crate) fn bitmap_to_sparse(&mut self, config: &EngineConfig) {
        let vlen = self.vlen;
        let vdim = self.vdim;
        debug_assert!(self.is_materialized());

        let (present, values) = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Bitmap {
                present, values, ..
            } => (present, values),
            _ => unreachable!(),
        };

        let n_tasks = config.threads.nthreads_for(present.len());
        let by_vector = n_tasks <= vdim;

        let (vec_ptr, idx, new_values) = if by_vector {
            // Each vector is one independent task
            let per_vec: Vec<(Vec<usize>, Vec<T>)> = if n_tasks <= 1 {
                (0..vdim)
                    .map(|j| gather_vector(&present, &values, j, vlen))
                    .collect()
            } else {
                (0..vdim)
                    .into_par_iter()
                    .map(|j| gather_vector(&present, &values, j, vlen))
                    .collect()
            };

            let counts: Vec<usize> = per_vec.iter().map(|(i, _)| i.len()).collect();
            let vec_ptr = cumsum(&counts);
            let nnz = vec_ptr[vdim];
            let mut idx = Vec::with_capacity(nnz);
            let mut vals = Vec::with_capacity(if values.is_iso() { 0 } else { nnz });
            for (i, v) in per_vec {
                idx.extend(i);
                vals.extend(v);
            }
            let new_values = if values.is_iso() {
                values
            } else {
                Values::Dense(vals)
            };
            (vec_ptr, idx, new_values)
        } else {
            // Few wide vectors: row-block tasks with private histograms
            let ranges = partition(vlen, n_tasks);
            let mut counts: Vec<Vec<usize>> = ranges
                .par_iter()
                .map(|range| {
                    let mut local = vec![0usize; vdim];
                    for j in 0..vdim {
                        let base = j * vlen;
                        for i in range.clone() {
                            local[j] += (present[base + i] != 0) as usize;
                        }
                    }
                    local
                })
                .collect();

            let totals = exclusive_scan_tasks(&mut counts, vdim);
            let vec_ptr = cumsum(&totals);
            let nnz = vec_ptr[vdim];

            let mut idx = vec![0usize; nnz];
            let iso = values.is_iso();
            let mut vals = if iso {
                Vec::new()
            } else {
                vec![T::zero(); nnz]
            };
            // Each task's output positions are disjoint by construction,
            // but they interleave within vectors; splice sequentially
            for (t, range) in ranges.iter().enumerate() {
                for j in 0..vdim {
                    let mut cursor = vec_ptr[j] + counts[t][j];
                    let base = j * vlen;
                    for i in range.clone() {
                        if present[base + i] != 0 {
                            idx[cursor] = i;
                            if !iso {
                                vals[cursor] = values.get(base + i);
                            }
                            cursor += 1;
                        }
                    }
                }
            }
            let new_values = if iso { values } else { Values::Dense(vals) };
            (vec_ptr, idx, new_values)
        };

        self.storage = Storage::Sparse {
            vec_ptr,
            idx,
            values: new_values,
        };
        self.invalidate_nvec_nonempty();
    }

    /// Full -> Sparse: the pattern is synthetic, no data inspection needed
    ///
    /// `vec_ptr[j] = j * vlen` and `idx[p] = p mod vlen`, since every slot
    /// is present.
    pub(crate) fn full_to_sparse(&mut self) {
        let vlen = self.vlen;
        let vdim = self.vdim;
        let values = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Full { values } => values,
            _ => return,
        };

        let vec_ptr: Vec<usize> = (0..=vdim).map(|j| j * vlen).collect();
        let idx: Vec<usize> = (0..vlen * vdim).map(|p| p % vlen).collect();
        self.storage = Storage::Sparse {
            vec_ptr,
            idx,
            values,
        };
    }

    /// Full -> Bitmap: every presence byte set
    pub(crate) fn full_to_bitmap(&mut self) {
        let grid = self.vlen * self.vdim;
        let values = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Full { values } => values,
            _ => return,
        };
        self.storage = Storage::Bitmap {
            present: vec![1u8; grid],
            nvals: grid,
            values,
        };
    }

    /// Any -> Full: discard index/presence arrays
    ///
    /// The caller guarantees every slot is present with no deferred work;
    /// O(1) beyond bookkeeping for bitmap, a value permutation check-free
    /// move for sparse (an all-present sorted sparse matrix stores its
    /// values in exactly dense grid order).
    pub(crate) fn to_full(&mut self) {
        debug_assert!(self.is_all_present());
        let values = match std::mem::replace(
            &mut self.storage,
            Storage::Full {
                values: Values::Dense(Vec::new()),
            },
        ) {
            Storage::Hyper { values, .. }
            | Storage::Sparse { values, .. }
            | Storage::Bitmap { values, .. }
            | Storage::Full { values } => values,
        };
        self.storage = Storage::Full { values };
        self.nvec_nonempty = if self.vlen == 0 { 0 } else { self.vdim as i64 };
    }
}

/// Gathers one bitmap vector into (indices, values); values empty when iso
fn gather_vector<T: Copy>(
    present: &[u8],
    values: &Values<T>,
    j: usize,
    vlen: usize,
) -> (Vec<usize>, Vec<T>) {
    let base = j * vlen;
    let mut idx = Vec::new();
    let mut vals = Vec::new();
    let iso = values.is_iso();
    for i in 0..vlen {
        if present[base + i] != 0 {
            idx.push(i);
            if !iso {
                vals.push(values.get(base + i));
            }
        }
    }
    (idx, vals)
}

/// Scatters presence bytes only (iso or zero-length vectors)
fn scatter_presence(
    present: &mut [u8],
    vec_ptr: &[usize],
    idx: &[usize],
    vlen: usize,
    vdim: usize,
    n_tasks: usize,
) {
    if vlen == 0 {
        return;
    }
    if n_tasks <= 1 {
        for j in 0..vdim {
            for p in vec_ptr[j]..vec_ptr[j + 1] {
                present[j * vlen + idx[p]] = 1;
            }
        }
    } else {
        present
            .par_chunks_mut(vlen)
            .enumerate()
            .for_each(|(j, chunk)| {
                for p in vec_ptr[j]..vec_ptr[j + 1] {
                    chunk[idx[p]] = 1;
                }
            });
    }
}
