//! Deferred single-element updates: zombies, pending tuples, and `wait`
//!
//! Single-element deletion and insertion never restructure the compressed
//! arrays immediately. A delete flips the entry's stored index in place
//! (making a *zombie*); an insert at a position absent from the structure
//! appends an unordered *pending tuple*. `wait` pays the amortized bill:
//! it sorts and merges the pending tuples, compacts zombies out, restores
//! within-vector ordering, and hands the result to the conversion engine.
//!
//! Bitmap and full layouts never defer: their slots toggle in O(1).

use num_traits::Num;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::matrix::core::{
    flip, is_flipped, unflip, BinaryOp, PendingTuples, SparseMatrix, Storage, Values,
};

/// Zombie-aware binary search of one vector's index slice
///
/// The slice is sorted by the un-flipped index, so zombies compare by the
/// position they occupy. Returns the offset within the slice.
fn search_vector(idx: &[usize], i: usize) -> Option<usize> {
    let mut lo = 0;
    let mut hi = idx.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if unflip(idx[mid]) < i {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo < idx.len() && unflip(idx[lo]) == i {
        Some(lo)
    } else {
        None
    }
}

impl<T: Copy + Num + Send + Sync> SparseMatrix<T> {
    /// Stores `value` at (row, col), deferring restructuring
    ///
    /// With `accum`, an existing entry at the position is combined as
    /// `accum(old, value)` instead of overwritten; an absent position gets
    /// `value` either way. All pending tuples of one matrix share one
    /// accumulator context, fixed at first use until the next `wait`;
    /// supplying a different one while tuples are buffered is a domain
    /// mismatch.
    ///
    /// Never re-sorts or re-allocates the index/value arrays: bitmap and
    /// full writes are O(1), a sparse hit (live or zombie) is an in-place
    /// write after a binary search, and a sparse miss buffers a tuple.
    pub fn set_element(
        &mut self,
        row: usize,
        col: usize,
        value: T,
        accum: Option<BinaryOp<T>>,
    ) -> Result<()> {
        self.check_bounds(row, col)?;
        let (j, i) = self.to_storage(row, col);
        let vlen = self.vlen();
        let held = self.nnz_held();

        match &mut self.storage {
            Storage::Full { values } => {
                let p = j * vlen + i;
                values.make_dense(held);
                let vals = values.as_mut_slice();
                vals[p] = match accum {
                    Some(f) => f(vals[p], value),
                    None => value,
                };
                return Ok(());
            }
            Storage::Bitmap {
                present,
                nvals,
                values,
            } => {
                let p = j * vlen + i;
                values.make_dense(present.len());
                let vals = values.as_mut_slice();
                if present[p] != 0 {
                    vals[p] = match accum {
                        Some(f) => f(vals[p], value),
                        None => value,
                    };
                } else {
                    present[p] = 1;
                    *nvals += 1;
                    vals[p] = value;
                    self.nvec_nonempty = -1;
                }
                return Ok(());
            }
            Storage::Hyper { .. } | Storage::Sparse { .. } => {}
        }

        // Compressed layouts: look for the position in the structure first.
        // A jumbled matrix cannot be searched; the position goes pending.
        let found = if self.jumbled {
            None
        } else {
            self.find_vector(j).and_then(|k| {
                let range = self.slot_range(k);
                let slice = &self.idx_slice()[range.clone()];
                // Dense-vector fast path: all positions present, the index
                // within the slice is the position itself
                let off = if slice.len() == vlen {
                    Some(i)
                } else {
                    search_vector(slice, i)
                };
                off.map(|o| range.start + o)
            })
        };

        if let Some(p) = found {
            let stored = self.idx_slice()[p];
            let zombie = is_flipped(stored);
            let (idx, values) = match &mut self.storage {
                Storage::Hyper { idx, values, .. } | Storage::Sparse { idx, values, .. } => {
                    (idx, values)
                }
                _ => unreachable!(),
            };
            values.make_dense(held);
            let vals = values.as_mut_slice();
            if zombie {
                // Un-delete in place; a zombie is logically absent, so the
                // accumulator does not apply
                idx[p] = unflip(stored);
                vals[p] = value;
                self.zombie_count -= 1;
            } else {
                vals[p] = match accum {
                    Some(f) => f(vals[p], value),
                    None => value,
                };
            }
            return Ok(());
        }

        // Not in the structure: buffer a pending tuple
        let pending = self
            .pending
            .get_or_insert_with(|| PendingTuples::new(accum));
        if pending.accum != accum && pending.len() > 0 {
            return Err(Error::DomainMismatch(
                "pending tuples already use a different accumulator".to_string(),
            ));
        }
        pending.accum = accum;
        if let (Some(&lj), Some(&li)) = (pending.vecs.last(), pending.idxs.last()) {
            if (lj, li) > (j, i) {
                pending.sorted = false;
            }
        }
        pending.vecs.push(j);
        pending.idxs.push(i);
        pending.vals.push(value);
        self.nvec_nonempty = -1;
        Ok(())
    }

    /// Deletes the entry at (row, col), deferring restructuring
    ///
    /// Returns true if a live entry (or a matching pending tuple) was
    /// removed. Removing an absent or already-deleted position is a no-op
    /// returning false. A full matrix first converts to bitmap, the
    /// cheapest layout that can represent absence.
    pub fn remove_element(&mut self, row: usize, col: usize) -> Result<bool> {
        self.check_bounds(row, col)?;
        debug_assert!(!self.jumbled, "remove_element on a jumbled matrix");

        if matches!(self.storage, Storage::Full { .. }) {
            self.full_to_bitmap();
        }

        let (j, i) = self.to_storage(row, col);
        let vlen = self.vlen();

        match &mut self.storage {
            Storage::Full { .. } => unreachable!(),
            Storage::Bitmap { present, nvals, .. } => {
                let p = j * vlen + i;
                if present[p] != 0 {
                    present[p] = 0;
                    *nvals -= 1;
                    self.nvec_nonempty = -1;
                    return Ok(true);
                }
                return Ok(false);
            }
            Storage::Hyper { .. } | Storage::Sparse { .. } => {}
        }

        let found = self.find_vector(j).and_then(|k| {
            let range = self.slot_range(k);
            let slice = &self.idx_slice()[range.clone()];
            let off = if slice.len() == vlen {
                Some(i)
            } else {
                search_vector(slice, i)
            };
            off.map(|o| range.start + o)
        });

        if let Some(p) = found {
            let stored = self.idx_slice()[p];
            if is_flipped(stored) {
                // Already a zombie: logically absent
                return Ok(false);
            }
            let idx = match &mut self.storage {
                Storage::Hyper { idx, .. } | Storage::Sparse { idx, .. } => idx,
                _ => unreachable!(),
            };
            idx[p] = flip(stored);
            self.zombie_count += 1;
            self.nvec_nonempty = -1;
            return Ok(true);
        }

        // Not in the structure: cancel any matching pending tuples,
        // preserving insertion order of the rest
        if let Some(pending) = &mut self.pending {
            let before = pending.len();
            let mut keep = vec![true; before];
            for (t, flag) in keep.iter_mut().enumerate() {
                if pending.vecs[t] == j && pending.idxs[t] == i {
                    *flag = false;
                }
            }
            if keep.iter().any(|&k| !k) {
                let mut t = 0;
                pending.vecs.retain(|_| {
                    let k = keep[t];
                    t += 1;
                    k
                });
                let mut t = 0;
                pending.idxs.retain(|_| {
                    let k = keep[t];
                    t += 1;
                    k
                });
                let mut t = 0;
                pending.vals.retain(|_| {
                    let k = keep[t];
                    t += 1;
                    k
                });
                if pending.len() == 0 {
                    self.pending = None;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reads the entry at (row, col), materializing deferred work first
    pub fn extract_element(
        &mut self,
        row: usize,
        col: usize,
        config: &EngineConfig,
    ) -> Result<Option<T>> {
        self.check_bounds(row, col)?;
        if !self.is_materialized() {
            self.wait(config);
        }
        let (j, i) = self.to_storage(row, col);
        let vlen = self.vlen();

        match &self.storage {
            Storage::Full { values } => Ok(Some(values.get(j * vlen + i))),
            Storage::Bitmap {
                present, values, ..
            } => {
                let p = j * vlen + i;
                Ok((present[p] != 0).then(|| values.get(p)))
            }
            Storage::Hyper { .. } | Storage::Sparse { .. } => {
                let found = self.find_vector(j).and_then(|k| {
                    let range = self.slot_range(k);
                    let slice = &self.idx_slice()[range.clone()];
                    search_vector(slice, i).map(|o| range.start + o)
                });
                Ok(found.map(|p| self.values_ref().get(p)))
            }
        }
    }

    /// Number of live entries; materializes deferred work first
    pub fn nvals(&mut self, config: &EngineConfig) -> usize {
        self.wait(config);
        self.live_count()
    }

    /// All entries as (rows, cols, values) triplet arrays, in storage order
    pub fn extract_tuples(&mut self, config: &EngineConfig) -> (Vec<usize>, Vec<usize>, Vec<T>) {
        self.wait(config);
        let triples = self.triples();
        let mut rows = Vec::with_capacity(triples.len());
        let mut cols = Vec::with_capacity(triples.len());
        let mut vals = Vec::with_capacity(triples.len());
        for (r, c, v) in triples {
            rows.push(r);
            cols.push(c);
            vals.push(v);
        }
        (rows, cols, vals)
    }

    /// Bulk-builds a CSC matrix from unordered triplets
    ///
    /// Duplicate positions combine via `dup` (or the last one wins when
    /// `dup` is None). Routes through the pending-tuple merge path.
    pub fn from_tuples(
        nrows: usize,
        ncols: usize,
        rows: &[usize],
        cols: &[usize],
        vals: &[T],
        dup: Option<BinaryOp<T>>,
        config: &EngineConfig,
    ) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != vals.len() {
            return Err(Error::InvalidObject(format!(
                "triplet arrays of unequal length: {} rows, {} cols, {} values",
                rows.len(),
                cols.len(),
                vals.len()
            )));
        }
        let mut m = Self::new(nrows, ncols);
        let mut pending = PendingTuples::new(dup);
        for t in 0..rows.len() {
            if rows[t] >= nrows {
                return Err(Error::IndexOutOfBounds {
                    index: rows[t],
                    size: nrows,
                });
            }
            if cols[t] >= ncols {
                return Err(Error::IndexOutOfBounds {
                    index: cols[t],
                    size: ncols,
                });
            }
            let (j, i) = m.to_storage(rows[t], cols[t]);
            if let (Some(&lj), Some(&li)) = (pending.vecs.last(), pending.idxs.last()) {
                if (lj, li) > (j, i) {
                    pending.sorted = false;
                }
            }
            pending.vecs.push(j);
            pending.idxs.push(i);
            pending.vals.push(vals[t]);
        }
        if pending.len() > 0 {
            m.pending = Some(pending);
            m.nvec_nonempty = -1;
        }
        m.wait(config);
        Ok(m)
    }

    /// Materializes all deferred work, then re-selects the layout
    ///
    /// Merges pending tuples into the structure (sorted, duplicates
    /// combined with the fixed accumulator in insertion order), compacts
    /// zombies out, restores within-vector ordering, and invokes the
    /// conversion engine. Afterward the matrix has no zombies, no pending
    /// tuples, and is not jumbled. Idempotent and cheap when nothing is
    /// deferred.
    pub fn wait(&mut self, config: &EngineConfig) {
        if self.is_materialized() {
            return;
        }
        // Bitmap and full never defer, by invariant
        debug_assert!(matches!(
            self.storage,
            Storage::Hyper { .. } | Storage::Sparse { .. }
        ));

        let vdim = self.vdim();
        let held = self.nnz_held();

        // Flatten the current structure into globally (vector, index)
        // ordered arrays, dropping zombies and sorting jumbled vectors
        let mut vec_of = Vec::with_capacity(held);
        match &self.storage {
            Storage::Hyper {
                vec_ids, vec_ptr, ..
            } => {
                for (k, &j) in vec_ids.iter().enumerate() {
                    vec_of.extend(std::iter::repeat(j).take(vec_ptr[k + 1] - vec_ptr[k]));
                }
            }
            Storage::Sparse { vec_ptr, .. } => {
                for j in 0..vdim {
                    vec_of.extend(std::iter::repeat(j).take(vec_ptr[j + 1] - vec_ptr[j]));
                }
            }
            _ => unreachable!(),
        }
        let (old_idx, old_values) = match &self.storage {
            Storage::Hyper { idx, values, .. } | Storage::Sparse { idx, values, .. } => {
                (idx, values)
            }
            _ => unreachable!(),
        };

        let mut live: Vec<(usize, usize, T)> = Vec::with_capacity(held - self.zombie_count);
        for p in 0..held {
            if !is_flipped(old_idx[p]) {
                live.push((vec_of[p], old_idx[p], old_values.get(p)));
            }
        }
        if self.jumbled {
            live.sort_unstable_by_key(|&(j, i, _)| (j, i));
        }

        // Sort the pending tuples, stably, so duplicates combine in
        // insertion order
        let pending = self.pending.take();
        let merged = match pending {
            None => live,
            Some(mut p) => {
                if !p.sorted {
                    let mut order: Vec<usize> = (0..p.len()).collect();
                    order.sort_by_key(|&t| (p.vecs[t], p.idxs[t]));
                    let vecs: Vec<usize> = order.iter().map(|&t| p.vecs[t]).collect();
                    let idxs: Vec<usize> = order.iter().map(|&t| p.idxs[t]).collect();
                    let vals: Vec<T> = order.iter().map(|&t| p.vals[t]).collect();
                    p.vecs = vecs;
                    p.idxs = idxs;
                    p.vals = vals;
                }
                merge_pending(live, &p)
            }
        };

        // Rebuild plain Sparse storage from the merged run
        let mut vec_ptr = vec![0usize; vdim + 1];
        for &(j, _, _) in &merged {
            vec_ptr[j + 1] += 1;
        }
        for j in 0..vdim {
            vec_ptr[j + 1] += vec_ptr[j];
        }
        let mut idx = Vec::with_capacity(merged.len());
        let mut vals = Vec::with_capacity(merged.len());
        for (_, i, v) in merged {
            idx.push(i);
            vals.push(v);
        }

        self.storage = Storage::Sparse {
            vec_ptr,
            idx,
            values: Values::Dense(vals),
        };
        self.zombie_count = 0;
        self.jumbled = false;
        self.update_nvec_nonempty();
        self.conform(config);
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrows() {
            return Err(Error::IndexOutOfBounds {
                index: row,
                size: self.nrows(),
            });
        }
        if col >= self.ncols() {
            return Err(Error::IndexOutOfBounds {
                index: col,
                size: self.ncols(),
            });
        }
        Ok(())
    }
}

/// Merges sorted live entries with sorted pending tuples
///
/// Both runs are (vector, index) ordered; pending duplicates (within the
/// run, or against a live entry) combine via the pending accumulator, or
/// the later value wins when there is none.
fn merge_pending<T: Copy>(
    live: Vec<(usize, usize, T)>,
    pending: &PendingTuples<T>,
) -> Vec<(usize, usize, T)> {
    let accum = pending.accum;
    let combine = |old: T, new: T| match accum {
        Some(f) => f(old, new),
        None => new,
    };

    let mut out: Vec<(usize, usize, T)> = Vec::with_capacity(live.len() + pending.len());
    let mut a = live.into_iter().peekable();
    let mut t = 0;

    while t < pending.len() {
        let key = (pending.vecs[t], pending.idxs[t]);

        // Emit live entries strictly before the next pending key
        while let Some(&(j, i, _)) = a.peek() {
            if (j, i) < key {
                out.push(a.next().unwrap());
            } else {
                break;
            }
        }

        // Fold the run of pending tuples at this key, seeding from a live
        // entry at the same position if there is one
        let mut val = match a.peek() {
            Some(&(j, i, v)) if (j, i) == key => {
                a.next();
                combine(v, pending.vals[t])
            }
            _ => pending.vals[t],
        };
        t += 1;
        while t < pending.len() && (pending.vecs[t], pending.idxs[t]) == key {
            val = combine(val, pending.vals[t]);
            t += 1;
        }
        out.push((key.0, key.1, val));
    }
    out.extend(a);
    out
}
