//! The sparse container: one matrix, four physical layouts
//!
//! A `SparseMatrix<T>` holds an `nrows x ncols` matrix of entries of one
//! element type in one of four interchangeable layouts:
//!
//! - **Hypersparse**: `vec_ids` lists which vectors are populated
//!   (strictly increasing), `vec_ptr` gives each listed vector's slice of
//!   the `idx`/`values` arrays.
//! - **Sparse**: `vec_ptr` has one slot per vector (`vdim + 1` offsets),
//!   `idx` holds sorted within-vector indices, `values` the entries.
//! - **Bitmap**: one presence byte per slot of the full `vlen * vdim`
//!   grid, plus a dense value array.
//! - **Full**: the dense value array alone; every slot is present.
//!
//! Storage is vector-oriented: a CSC matrix stores columns as vectors
//! (`vlen = nrows`, `vdim = ncols`), a CSR matrix stores rows. All
//! internal algorithms speak in (vector, index) coordinates and only the
//! public element interface translates to (row, col).
//!
//! Deferred updates ride along with the container: deleted entries stay in
//! place with a flipped index (*zombies*), insertions buffer in an
//! unordered *pending tuple* list, and a vector whose indices have lost
//! their ordering is *jumbled*. `wait()` in `pending.rs` clears all three.

use std::fmt;

use num_traits::Num;

use crate::error::{Error, Result};

/// A deferred-insertion accumulator: combines an existing entry with a new
/// one when pending tuples collide with live entries or each other
pub type BinaryOp<T> = fn(T, T) -> T;

/// The four physical layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sparsity {
    /// Only populated vectors are represented
    Hypersparse,
    /// Every vector has a pointer slot, entries are compressed
    Sparse,
    /// Dense presence bytes over the full grid
    Bitmap,
    /// Dense values, every slot present
    Full,
}

/// A bitmask of layouts the conversion engine is allowed to choose
///
/// Any non-empty subset of the four layouts is a valid control; the
/// density policy in `conform.rs` picks one member of the subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparsityControl(u8);

impl SparsityControl {
    /// Allow hypersparse
    pub const HYPERSPARSE: Self = Self(1);
    /// Allow sparse
    pub const SPARSE: Self = Self(2);
    /// Allow bitmap
    pub const BITMAP: Self = Self(4);
    /// Allow full
    pub const FULL: Self = Self(8);
    /// Allow every layout (the default)
    pub const AUTO: Self = Self(15);

    /// True if the control permits the given layout
    pub fn allows(self, s: Sparsity) -> bool {
        let bit = match s {
            Sparsity::Hypersparse => 1,
            Sparsity::Sparse => 2,
            Sparsity::Bitmap => 4,
            Sparsity::Full => 8,
        };
        self.0 & bit != 0
    }

    /// True if the control permits hypersparse or sparse
    pub fn allows_compressed(self) -> bool {
        self.0 & 3 != 0
    }
}

impl std::ops::BitOr for SparsityControl {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// Zombie encoding: a deleted entry stays in the idx array with its index
// bitwise-complemented. Indices are < vlen <= usize::MAX/2, so flipped and
// live index ranges never overlap.

/// Marks an index as a zombie (involution: flipping twice restores it)
#[inline]
pub(crate) const fn flip(i: usize) -> usize {
    !i
}

/// True if the stored index is a zombie marker
#[inline]
pub(crate) const fn is_flipped(i: usize) -> bool {
    i > (usize::MAX >> 1)
}

/// The index an entry lives at, zombie or not
#[inline]
pub(crate) const fn unflip(i: usize) -> usize {
    if is_flipped(i) {
        !i
    } else {
        i
    }
}

/// Entry values: either one shared value (iso) or a dense array
#[derive(Debug, Clone, PartialEq)]
pub enum Values<T> {
    /// Every present entry has this single value
    Iso(T),
    /// One value per held entry (or per grid slot for bitmap/full)
    Dense(Vec<T>),
}

impl<T: Copy> Values<T> {
    /// Value at position `p`
    #[inline]
    pub fn get(&self, p: usize) -> T {
        match self {
            Values::Iso(v) => *v,
            Values::Dense(vals) => vals[p],
        }
    }

    /// True for the iso (single shared value) representation
    pub fn is_iso(&self) -> bool {
        matches!(self, Values::Iso(_))
    }

    /// A dense array of length `n` with this value set expanded
    pub fn expand(&self, n: usize) -> Vec<T> {
        match self {
            Values::Iso(v) => vec![*v; n],
            Values::Dense(vals) => {
                debug_assert!(vals.len() >= n);
                vals[..n].to_vec()
            }
        }
    }

    /// Replaces an iso value set with a writable dense array of length `n`
    pub fn make_dense(&mut self, n: usize) {
        if let Values::Iso(v) = self {
            *self = Values::Dense(vec![*v; n]);
        }
    }

    /// Mutable dense slice; the caller must have called `make_dense` first
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            Values::Iso(_) => panic!("iso values must be expanded before mutation"),
            Values::Dense(vals) => vals,
        }
    }
}

/// Physical storage for one layout
#[derive(Debug, Clone)]
pub enum Storage<T> {
    /// Hypersparse: only populated vectors carry pointer slots
    Hyper {
        /// Which vectors are populated, strictly increasing
        vec_ids: Vec<usize>,
        /// Offsets into `idx`/`values`, length `vec_ids.len() + 1`
        vec_ptr: Vec<usize>,
        /// Within-vector indices, sorted per vector unless jumbled
        idx: Vec<usize>,
        /// Entry values
        values: Values<T>,
    },
    /// Sparse: one pointer slot per vector
    Sparse {
        /// Offsets into `idx`/`values`, length `vdim + 1`
        vec_ptr: Vec<usize>,
        /// Within-vector indices, sorted per vector unless jumbled
        idx: Vec<usize>,
        /// Entry values
        values: Values<T>,
    },
    /// Bitmap: presence byte + value per grid slot
    Bitmap {
        /// 0/1 per slot, laid out vector-major (`p = j * vlen + i`)
        present: Vec<u8>,
        /// Count of set presence bytes
        nvals: usize,
        /// Grid values (only present slots are meaningful)
        values: Values<T>,
    },
    /// Full: every slot present
    Full {
        /// Grid values, vector-major
        values: Values<T>,
    },
}

/// Buffered insertions awaiting a `wait()`
///
/// Tuples are stored in storage coordinates (vector, index). All tuples of
/// one matrix share one accumulator context, fixed at first use.
#[derive(Debug, Clone)]
pub struct PendingTuples<T> {
    pub(crate) vecs: Vec<usize>,
    pub(crate) idxs: Vec<usize>,
    pub(crate) vals: Vec<T>,
    pub(crate) accum: Option<BinaryOp<T>>,
    /// True while the tuples happen to be in (vector, index) order
    pub(crate) sorted: bool,
}

impl<T> PendingTuples<T> {
    pub(crate) fn new(accum: Option<BinaryOp<T>>) -> Self {
        Self {
            vecs: Vec::new(),
            idxs: Vec::new(),
            vals: Vec::new(),
            accum,
            sorted: true,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.vals.len()
    }
}

/// An m x n sparse (or dense) matrix in one of four physical layouts
///
/// See the module documentation for the representation. Mutating single
/// entries defers work (zombies, pending tuples); call `wait()` before
/// structural queries, or use the public accessors which do so themselves.
#[derive(Clone)]
pub struct SparseMatrix<T> {
    /// Length of each vector (nrows when CSC, ncols when CSR)
    pub(crate) vlen: usize,
    /// Number of vectors (ncols when CSC, nrows when CSR)
    pub(crate) vdim: usize,
    /// True: vectors are columns (CSC); false: vectors are rows (CSR)
    pub(crate) is_csc: bool,
    /// Physical layout and arrays
    pub(crate) storage: Storage<T>,
    /// Cached count of non-empty vectors, -1 when stale
    pub(crate) nvec_nonempty: i64,
    /// Entries physically present but logically deleted
    pub(crate) zombie_count: usize,
    /// Buffered insertions, if any
    pub(crate) pending: Option<PendingTuples<T>>,
    /// True if some vector's indices are unsorted
    pub(crate) jumbled: bool,
    /// Layouts the conversion engine may choose for this matrix
    pub(crate) control: SparsityControl,
    /// Per-matrix sparse->hypersparse ratio; None uses the config default
    pub(crate) hyper_ratio: Option<f64>,
    /// Per-matrix sparse->bitmap density; None uses the config table
    pub(crate) bitmap_switch: Option<f64>,
}

impl<T: Copy + Num> SparseMatrix<T> {
    /// Creates an empty CSC matrix with the given dimensions
    ///
    /// The matrix starts in Sparse form with zero capacity; all-zero
    /// dimensions are allowed.
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self::new_with(nrows, ncols, true)
    }

    /// Creates an empty matrix with the given orientation
    pub fn new_with(nrows: usize, ncols: usize, is_csc: bool) -> Self {
        let (vlen, vdim) = if is_csc { (nrows, ncols) } else { (ncols, nrows) };
        Self {
            vlen,
            vdim,
            is_csc,
            storage: Storage::Sparse {
                vec_ptr: vec![0; vdim + 1],
                idx: Vec::new(),
                values: Values::Dense(Vec::new()),
            },
            nvec_nonempty: 0,
            zombie_count: 0,
            pending: None,
            jumbled: false,
            control: SparsityControl::AUTO,
            hyper_ratio: None,
            bitmap_switch: None,
        }
    }

    /// Creates a Full CSC matrix where every slot holds `value` (iso)
    pub fn full_iso(nrows: usize, ncols: usize, value: T) -> Self {
        let mut m = Self::new(nrows, ncols);
        m.storage = Storage::Full {
            values: Values::Iso(value),
        };
        m.nvec_nonempty = if nrows == 0 { 0 } else { ncols as i64 };
        m
    }

    /// Creates a CSC matrix from raw compressed-column arrays
    ///
    /// `col_ptr` must have `ncols + 1` non-decreasing offsets starting at
    /// zero, `row_idx` sorted row indices within each column, and `values`
    /// one value per entry.
    pub fn from_csc(
        nrows: usize,
        ncols: usize,
        col_ptr: Vec<usize>,
        row_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self> {
        Self::from_compressed(nrows, ncols, col_ptr, row_idx, values, true)
    }

    /// Creates a CSR matrix from raw compressed-row arrays
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self> {
        Self::from_compressed(nrows, ncols, row_ptr, col_idx, values, false)
    }

    fn from_compressed(
        nrows: usize,
        ncols: usize,
        vec_ptr: Vec<usize>,
        idx: Vec<usize>,
        values: Vec<T>,
        is_csc: bool,
    ) -> Result<Self> {
        let (vlen, vdim) = if is_csc { (nrows, ncols) } else { (ncols, nrows) };

        if vec_ptr.len() != vdim + 1 {
            return Err(Error::InvalidObject(format!(
                "pointer array has {} slots, expected {}",
                vec_ptr.len(),
                vdim + 1
            )));
        }
        if idx.len() != values.len() {
            return Err(Error::InvalidObject(format!(
                "{} indices but {} values",
                idx.len(),
                values.len()
            )));
        }
        if vec_ptr[0] != 0 || vec_ptr[vdim] != idx.len() {
            return Err(Error::InvalidObject(
                "pointer array does not span the entry arrays".to_string(),
            ));
        }
        if vec_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidObject(
                "pointer array is not monotone".to_string(),
            ));
        }
        for &i in &idx {
            if i >= vlen {
                return Err(Error::IndexOutOfBounds {
                    index: i,
                    size: vlen,
                });
            }
        }

        let mut m = Self {
            vlen,
            vdim,
            is_csc,
            storage: Storage::Sparse {
                vec_ptr,
                idx,
                values: Values::Dense(values),
            },
            nvec_nonempty: -1,
            zombie_count: 0,
            pending: None,
            jumbled: false,
            control: SparsityControl::AUTO,
            hyper_ratio: None,
            bitmap_switch: None,
        };
        m.update_nvec_nonempty();
        Ok(m)
    }

    // ---- dimensions ----

    /// Number of rows
    pub fn nrows(&self) -> usize {
        if self.is_csc {
            self.vlen
        } else {
            self.vdim
        }
    }

    /// Number of columns
    pub fn ncols(&self) -> usize {
        if self.is_csc {
            self.vdim
        } else {
            self.vlen
        }
    }

    /// True when vectors are columns
    pub fn is_csc(&self) -> bool {
        self.is_csc
    }

    pub(crate) fn vlen(&self) -> usize {
        self.vlen
    }

    pub(crate) fn vdim(&self) -> usize {
        self.vdim
    }

    /// Translates user (row, col) to storage (vector, index)
    #[inline]
    pub(crate) fn to_storage(&self, row: usize, col: usize) -> (usize, usize) {
        if self.is_csc {
            (col, row)
        } else {
            (row, col)
        }
    }

    // ---- layout and state queries ----

    /// The current physical layout
    pub fn sparsity(&self) -> Sparsity {
        match &self.storage {
            Storage::Hyper { .. } => Sparsity::Hypersparse,
            Storage::Sparse { .. } => Sparsity::Sparse,
            Storage::Bitmap { .. } => Sparsity::Bitmap,
            Storage::Full { .. } => Sparsity::Full,
        }
    }

    /// Entries physically held, zombies included, pending tuples excluded
    pub(crate) fn nnz_held(&self) -> usize {
        match &self.storage {
            Storage::Hyper { idx, .. } | Storage::Sparse { idx, .. } => idx.len(),
            Storage::Bitmap { nvals, .. } => *nvals,
            Storage::Full { .. } => self.vlen * self.vdim,
        }
    }

    /// Live entries: held minus zombies (pending tuples not counted)
    pub(crate) fn live_count(&self) -> usize {
        self.nnz_held() - self.zombie_count
    }

    /// Number of logically deleted entries awaiting compaction
    pub fn zombie_count(&self) -> usize {
        self.zombie_count
    }

    /// Number of buffered insertions awaiting a merge
    pub fn pending_count(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.len())
    }

    /// True if some vector's indices are not sorted ascending
    pub fn is_jumbled(&self) -> bool {
        self.jumbled
    }

    /// True when no deferred work remains
    pub fn is_materialized(&self) -> bool {
        self.zombie_count == 0 && self.pending.is_none() && !self.jumbled
    }

    /// True when every slot of the grid holds a live entry and no work is
    /// deferred
    pub(crate) fn is_all_present(&self) -> bool {
        match self.vlen.checked_mul(self.vdim) {
            Some(grid) => self.is_materialized() && self.nnz_held() == grid,
            // Grid too large to even index densely
            None => false,
        }
    }

    /// Restricts which layouts the conversion engine may pick
    ///
    /// Takes effect at the next `conform` or `wait`.
    pub fn set_sparsity_control(&mut self, control: SparsityControl) {
        self.control = control;
    }

    /// The current layout restriction
    pub fn sparsity_control(&self) -> SparsityControl {
        self.control
    }

    /// Overrides the sparse->hypersparse ratio for this matrix
    pub fn set_hyper_ratio(&mut self, ratio: f64) {
        self.hyper_ratio = Some(ratio);
    }

    /// Overrides the sparse->bitmap density threshold for this matrix
    pub fn set_bitmap_switch(&mut self, density: f64) {
        self.bitmap_switch = Some(density);
    }

    // ---- vector accessors (Hyper/Sparse only) ----

    /// Number of vectors carrying pointer slots
    pub(crate) fn nvec(&self) -> usize {
        match &self.storage {
            Storage::Hyper { vec_ids, .. } => vec_ids.len(),
            _ => self.vdim,
        }
    }

    /// The vector index of pointer slot `k`
    #[inline]
    pub(crate) fn vector_id(&self, k: usize) -> usize {
        match &self.storage {
            Storage::Hyper { vec_ids, .. } => vec_ids[k],
            _ => k,
        }
    }

    /// The entry range of pointer slot `k`
    #[inline]
    pub(crate) fn slot_range(&self, k: usize) -> std::ops::Range<usize> {
        match &self.storage {
            Storage::Hyper { vec_ptr, .. } | Storage::Sparse { vec_ptr, .. } => {
                vec_ptr[k]..vec_ptr[k + 1]
            }
            _ => panic!("slot_range on uncompressed storage"),
        }
    }

    /// Locates the pointer slot of vector `j`, if populated
    ///
    /// Sparse: identity. Hypersparse: binary search of the vector id list.
    pub(crate) fn find_vector(&self, j: usize) -> Option<usize> {
        match &self.storage {
            Storage::Hyper { vec_ids, .. } => vec_ids.binary_search(&j).ok(),
            Storage::Sparse { .. } => {
                if j < self.vdim {
                    Some(j)
                } else {
                    None
                }
            }
            _ => panic!("find_vector on uncompressed storage"),
        }
    }

    /// Entries held in vector `j` (zombies included); zero for layouts
    /// without compressed pointers is a caller error
    pub(crate) fn vector_nnz(&self, j: usize) -> usize {
        match self.find_vector(j) {
            Some(k) => self.slot_range(k).len(),
            None => 0,
        }
    }

    /// The shared index array (Hyper/Sparse only)
    pub(crate) fn idx_slice(&self) -> &[usize] {
        match &self.storage {
            Storage::Hyper { idx, .. } | Storage::Sparse { idx, .. } => idx,
            _ => panic!("idx_slice on uncompressed storage"),
        }
    }

    /// The value set of any layout
    pub(crate) fn values_ref(&self) -> &Values<T> {
        match &self.storage {
            Storage::Hyper { values, .. }
            | Storage::Sparse { values, .. }
            | Storage::Bitmap { values, .. }
            | Storage::Full { values } => values,
        }
    }

    // ---- non-empty vector cache ----

    /// Count of vectors holding at least one entry (zombies count as held)
    pub(crate) fn compute_nvec_nonempty(&self) -> usize {
        match &self.storage {
            Storage::Hyper { vec_ptr, .. } | Storage::Sparse { vec_ptr, .. } => vec_ptr
                .windows(2)
                .filter(|w| w[1] > w[0])
                .count(),
            Storage::Bitmap { present, .. } => {
                if self.vlen == 0 {
                    0
                } else {
                    (0..self.vdim)
                        .filter(|&j| {
                            present[j * self.vlen..(j + 1) * self.vlen]
                                .iter()
                                .any(|&b| b != 0)
                        })
                        .count()
                }
            }
            Storage::Full { .. } => {
                if self.vlen == 0 {
                    0
                } else {
                    self.vdim
                }
            }
        }
    }

    /// Refreshes the cached non-empty vector count
    pub(crate) fn update_nvec_nonempty(&mut self) {
        self.nvec_nonempty = self.compute_nvec_nonempty() as i64;
    }

    /// Cached non-empty vector count, recomputed if stale
    pub(crate) fn nvec_nonempty(&self) -> usize {
        if self.nvec_nonempty >= 0 {
            self.nvec_nonempty as usize
        } else {
            self.compute_nvec_nonempty()
        }
    }

    /// Marks the cache stale
    pub(crate) fn invalidate_nvec_nonempty(&mut self) {
        self.nvec_nonempty = -1;
    }

    // ---- consistency checker ----

    /// Validates every structural invariant of the container
    ///
    /// Returns `InvalidObject` if any is broken; the matrix must not be
    /// used further in that case.
    pub fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidObject(msg));

        match &self.storage {
            Storage::Hyper {
                vec_ids,
                vec_ptr,
                idx,
                values,
            } => {
                if vec_ptr.len() != vec_ids.len() + 1 {
                    return fail("hyper pointer/id length mismatch".into());
                }
                if !vec_ids.windows(2).all(|w| w[0] < w[1]) {
                    return fail("hyper vector ids not strictly increasing".into());
                }
                if vec_ids.last().is_some_and(|&j| j >= self.vdim) {
                    return fail("hyper vector id out of range".into());
                }
                self.check_compressed(vec_ptr, idx, values)?;
            }
            Storage::Sparse {
                vec_ptr,
                idx,
                values,
            } => {
                if vec_ptr.len() != self.vdim + 1 {
                    return fail("sparse pointer length mismatch".into());
                }
                self.check_compressed(vec_ptr, idx, values)?;
            }
            Storage::Bitmap {
                present,
                nvals,
                values,
            } => {
                let grid = self.vlen * self.vdim;
                if present.len() != grid {
                    return fail("bitmap presence length mismatch".into());
                }
                let actual = present.iter().filter(|&&b| b != 0).count();
                if actual != *nvals {
                    return fail(format!("bitmap nvals {} but {} bits set", nvals, actual));
                }
                if let Values::Dense(v) = values {
                    if v.len() != grid {
                        return fail("bitmap value length mismatch".into());
                    }
                }
                if self.zombie_count != 0 || self.pending.is_some() || self.jumbled {
                    return fail("bitmap matrix carries deferred work".into());
                }
            }
            Storage::Full { values } => {
                let grid = self.vlen * self.vdim;
                if let Values::Dense(v) = values {
                    if v.len() != grid {
                        return fail("full value length mismatch".into());
                    }
                }
                if self.zombie_count != 0 || self.pending.is_some() || self.jumbled {
                    return fail("full matrix carries deferred work".into());
                }
            }
        }

        if self.zombie_count > self.nnz_held() {
            return fail(format!(
                "zombie count {} exceeds held entries {}",
                self.zombie_count,
                self.nnz_held()
            ));
        }
        if self.nvec_nonempty >= 0 && self.nvec_nonempty as usize != self.compute_nvec_nonempty() {
            return fail("stale non-empty vector cache marked fresh".into());
        }
        Ok(())
    }

    fn check_compressed(&self, vec_ptr: &[usize], idx: &[usize], values: &Values<T>) -> Result<()> {
        let fail = |msg: &str| Err(Error::InvalidObject(msg.to_string()));

        if vec_ptr.first() != Some(&0) {
            return fail("pointer array does not start at zero");
        }
        if vec_ptr.windows(2).any(|w| w[0] > w[1]) {
            return fail("pointer array is not monotone");
        }
        if *vec_ptr.last().unwrap() != idx.len() {
            return fail("pointer array does not span the entry arrays");
        }
        if let Values::Dense(v) = values {
            if v.len() != idx.len() {
                return fail("index/value length mismatch");
            }
        }

        let mut zombies = 0;
        for w in vec_ptr.windows(2) {
            let slice = &idx[w[0]..w[1]];
            for &i in slice {
                if is_flipped(i) {
                    zombies += 1;
                }
                if unflip(i) >= self.vlen {
                    return fail("entry index out of range");
                }
            }
            if !self.jumbled && !slice.windows(2).all(|p| unflip(p[0]) < unflip(p[1])) {
                return fail("vector indices unsorted in non-jumbled matrix");
            }
        }
        if zombies != self.zombie_count {
            return fail("zombie count does not match flipped entries");
        }
        Ok(())
    }

    /// Drops all entries and deferred work, returning to empty Sparse form
    pub fn clear(&mut self) {
        self.storage = Storage::Sparse {
            vec_ptr: vec![0; self.vdim + 1],
            idx: Vec::new(),
            values: Values::Dense(Vec::new()),
        };
        self.zombie_count = 0;
        self.pending = None;
        self.jumbled = false;
        self.nvec_nonempty = 0;
    }

    /// All live (row, col, value) triples, in storage order
    ///
    /// Internal: assumes a materialized matrix (no zombies, no pending,
    /// not jumbled). The public `extract_tuples` materializes first.
    pub(crate) fn triples(&self) -> Vec<(usize, usize, T)> {
        debug_assert!(self.is_materialized());
        let mut out = Vec::with_capacity(self.live_count());
        match &self.storage {
            Storage::Hyper { .. } | Storage::Sparse { .. } => {
                let idx = self.idx_slice();
                let values = self.values_ref();
                for k in 0..self.nvec() {
                    let j = self.vector_id(k);
                    for p in self.slot_range(k) {
                        let (row, col) = self.to_user(idx[p], j);
                        out.push((row, col, values.get(p)));
                    }
                }
            }
            Storage::Bitmap {
                present, values, ..
            } => {
                for j in 0..self.vdim {
                    for i in 0..self.vlen {
                        let p = j * self.vlen + i;
                        if present[p] != 0 {
                            let (row, col) = self.to_user(i, j);
                            out.push((row, col, values.get(p)));
                        }
                    }
                }
            }
            Storage::Full { values } => {
                for j in 0..self.vdim {
                    for i in 0..self.vlen {
                        let p = j * self.vlen + i;
                        let (row, col) = self.to_user(i, j);
                        out.push((row, col, values.get(p)));
                    }
                }
            }
        }
        out
    }

    /// Translates storage (index, vector) to user (row, col)
    #[inline]
    pub(crate) fn to_user(&self, i: usize, j: usize) -> (usize, usize) {
        if self.is_csc {
            (i, j)
        } else {
            (j, i)
        }
    }
}

/// A materialized sparse/hypersparse view of any matrix
///
/// Borrows when the matrix is already compressed with no deferred work;
/// otherwise clones, waits, and converts. Kernels consume this so public
/// operations accept matrices in any state without `&mut` access.
pub(crate) fn prepared_sparse<'a, T>(
    m: &'a SparseMatrix<T>,
    config: &crate::config::EngineConfig,
) -> std::borrow::Cow<'a, SparseMatrix<T>>
where
    T: Copy + Num + Send + Sync,
{
    use std::borrow::Cow;
    if m.is_materialized()
        && matches!(m.storage, Storage::Hyper { .. } | Storage::Sparse { .. })
    {
        Cow::Borrowed(m)
    } else {
        let mut owned = m.clone();
        owned.wait(config);
        owned.to_sparse(config);
        Cow::Owned(owned)
    }
}

impl<T: fmt::Debug + Copy + Num> fmt::Debug for SparseMatrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SparseMatrix {{")?;
        writeln!(f, "  dimensions: {} x {}", self.nrows(), self.ncols())?;
        writeln!(f, "  layout: {:?} ({})", self.sparsity(), if self.is_csc { "CSC" } else { "CSR" })?;
        writeln!(f, "  held: {}", self.nnz_held())?;
        if self.zombie_count > 0 {
            writeln!(f, "  zombies: {}", self.zombie_count)?;
        }
        if let Some(pending) = &self.pending {
            writeln!(f, "  pending: {}", pending.len())?;
        }
        if self.jumbled {
            writeln!(f, "  jumbled")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zombie_flip_is_involution() {
        for i in [0usize, 1, 7, 1000, usize::MAX >> 1] {
            assert!(!is_flipped(i));
            let z = flip(i);
            assert!(is_flipped(z));
            assert_eq!(unflip(z), i);
            assert_eq!(flip(z), i);
        }
    }

    #[test]
    fn test_new_matrix_is_empty_sparse() {
        let m = SparseMatrix::<f64>::new(4, 5);
        assert_eq!(m.nrows(), 4);
        assert_eq!(m.ncols(), 5);
        assert_eq!(m.sparsity(), Sparsity::Sparse);
        assert_eq!(m.nnz_held(), 0);
        assert!(m.is_materialized());
        m.check().unwrap();
    }

    #[test]
    fn test_zero_dimension_matrix() {
        let m = SparseMatrix::<i32>::new(0, 0);
        assert_eq!(m.nnz_held(), 0);
        m.check().unwrap();
    }

    #[test]
    fn test_from_csc_valid() {
        // [1 0; 2 3] by columns
        let m = SparseMatrix::from_csc(2, 2, vec![0, 2, 3], vec![0, 1, 1], vec![1, 2, 3]).unwrap();
        assert_eq!(m.nnz_held(), 3);
        assert_eq!(m.nvec_nonempty(), 2);
        m.check().unwrap();

        let triples = m.triples();
        assert_eq!(triples, vec![(0, 0, 1), (1, 0, 2), (1, 1, 3)]);
    }

    #[test]
    fn test_from_csr_orientation() {
        // [1 2; 0 3] by rows
        let m = SparseMatrix::from_csr(2, 2, vec![0, 2, 3], vec![0, 1, 1], vec![1, 2, 3]).unwrap();
        assert!(!m.is_csc());
        let triples = m.triples();
        assert_eq!(triples, vec![(0, 0, 1), (0, 1, 2), (1, 1, 3)]);
    }

    #[test]
    fn test_from_csc_rejects_bad_pointers() {
        let err = SparseMatrix::from_csc(2, 2, vec![0, 2], vec![0, 1], vec![1, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidObject(_)));

        let err =
            SparseMatrix::from_csc(2, 2, vec![0, 2, 1], vec![0], vec![1]).unwrap_err();
        assert!(matches!(err, Error::InvalidObject(_)));
    }

    #[test]
    fn test_from_csc_rejects_out_of_range_index() {
        let err = SparseMatrix::from_csc(2, 2, vec![0, 1, 1], vec![5], vec![1]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { index: 5, size: 2 }));
    }

    #[test]
    fn test_sparsity_control_mask() {
        let c = SparsityControl::SPARSE | SparsityControl::BITMAP;
        assert!(c.allows(Sparsity::Sparse));
        assert!(c.allows(Sparsity::Bitmap));
        assert!(!c.allows(Sparsity::Full));
        assert!(!c.allows(Sparsity::Hypersparse));
        assert!(c.allows_compressed());

        assert!(!SparsityControl::FULL.allows_compressed());
        for s in [
            Sparsity::Hypersparse,
            Sparsity::Sparse,
            Sparsity::Bitmap,
            Sparsity::Full,
        ] {
            assert!(SparsityControl::AUTO.allows(s));
        }
    }

    #[test]
    fn test_full_iso() {
        let m = SparseMatrix::full_iso(3, 3, 1.5);
        assert_eq!(m.sparsity(), Sparsity::Full);
        assert_eq!(m.nnz_held(), 9);
        assert!(m.values_ref().is_iso());
        assert!(m.is_all_present());
        m.check().unwrap();
    }

    #[test]
    fn test_check_catches_zombie_mismatch() {
        let mut m =
            SparseMatrix::from_csc(2, 2, vec![0, 2, 3], vec![0, 1, 1], vec![1, 2, 3]).unwrap();
        // Flip an index without bumping the zombie count
        if let Storage::Sparse { idx, .. } = &mut m.storage {
            idx[0] = flip(idx[0]);
        }
        assert!(m.check().is_err());
    }
}
