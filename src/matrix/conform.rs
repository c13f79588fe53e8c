//! Layout selection: the density-driven conversion policy
//!
//! After any operation that changes a matrix's density, `conform` picks
//! the physical layout from the matrix's sparsity control (a bitmask of
//! allowed layouts) using three tests:
//!
//! 1. *Full test*: every slot present, nothing deferred -> Full.
//! 2. *Bitmap tests*: entry density against a size-bucketed threshold
//!    table, with the reverse (bitmap -> compressed) threshold at half the
//!    forward one so repeated single-element updates at the boundary never
//!    oscillate between layouts.
//! 3. *Hyper test*: within the compressed family, hypersparse when the
//!    non-empty vector count k satisfies `k <= hyper_ratio * vdim`, except
//!    that single-vector matrices are always plain sparse.
//!
//! All 15 non-empty control subsets reduce to combinations of these tests;
//! when the control excludes every layout the density policy would pick,
//! the nearest representable one is used (Full for a non-dense matrix
//! degrades to Bitmap, Bitmap for a matrix carrying deferred work degrades
//! to the compressed family).

use num_traits::Num;

use crate::config::EngineConfig;
use crate::matrix::core::{SparseMatrix, Sparsity, SparsityControl, Storage};

impl<T: Copy + Num + Send + Sync> SparseMatrix<T> {
    /// Re-selects the physical layout using this matrix's sparsity control
    pub fn conform(&mut self, config: &EngineConfig) {
        self.conform_to(self.control, config);
    }

    /// Re-selects the physical layout using an explicit control
    ///
    /// Never fails: an unreachable target (e.g. Full requested for a
    /// non-dense matrix) degrades along Full -> Bitmap -> Sparse.
    pub fn conform_to(&mut self, control: SparsityControl, config: &EngineConfig) {
        let target = self.pick_layout(control, config);
        match target {
            Sparsity::Full => {
                if self.is_all_present() {
                    self.to_full();
                }
            }
            Sparsity::Bitmap => {
                if self.is_materialized() {
                    self.to_bitmap(config);
                }
            }
            Sparsity::Sparse => self.to_sparse_keep_deferred(config),
            Sparsity::Hypersparse => {
                self.to_sparse_keep_deferred(config);
                self.sparse_to_hyper();
            }
        }
    }

    /// Sparse target, preserving zombies/pending (hyper<->sparse moves
    /// tolerate them; bitmap/full sources never carry them)
    fn to_sparse_keep_deferred(&mut self, config: &EngineConfig) {
        match self.sparsity() {
            Sparsity::Sparse => {}
            Sparsity::Hypersparse => self.hyper_to_sparse(config),
            Sparsity::Bitmap => self.bitmap_to_sparse(config),
            Sparsity::Full => self.full_to_sparse(),
        }
    }

    /// The layout the density policy selects under the given control
    fn pick_layout(&self, control: SparsityControl, config: &EngineConfig) -> Sparsity {
        // Deferred work lives only in the compressed family; keep the
        // matrix there until the next wait materializes it
        if !self.is_materialized() {
            return self.pick_compressed(control, config);
        }

        let grid = self.vlen.checked_mul(self.vdim);
        let all_present = self.is_all_present();

        if all_present && control.allows(Sparsity::Full) {
            return Sparsity::Full;
        }

        // Bitmap vs compressed, with hysteresis
        let bitmap_ok = control.allows(Sparsity::Bitmap) && grid.is_some();
        let compressed_ok = control.allows_compressed();

        if bitmap_ok {
            let density = match grid {
                Some(0) | None => 0.0,
                Some(g) => self.live_count() as f64 / g as f64,
            };
            let stay_bitmap = if !compressed_ok {
                true
            } else if matches!(self.storage, Storage::Bitmap { .. } | Storage::Full { .. }) {
                // Reverse test: leave bitmap only when density drops well
                // below the forward threshold
                let reverse = match self.bitmap_switch {
                    Some(s) => s / 2.0,
                    None => config.sparse_switch_for(self.vlen, self.vdim),
                };
                density >= reverse
            } else {
                let switch = self
                    .bitmap_switch
                    .unwrap_or_else(|| config.bitmap_switch_for(self.vlen, self.vdim));
                density > switch
            };
            if stay_bitmap {
                // All-present but Full excluded: Bitmap is the nearest
                return Sparsity::Bitmap;
            }
        } else if !compressed_ok {
            // Control allows Full alone but the matrix is not dense:
            // degrade to bitmap, the nearest layout that can represent it
            return if all_present { Sparsity::Full } else { Sparsity::Bitmap };
        }

        self.pick_compressed(control, config)
    }

    /// Sparse vs hypersparse within the compressed family
    fn pick_compressed(&self, control: SparsityControl, config: &EngineConfig) -> Sparsity {
        let hyper_ok = control.allows(Sparsity::Hypersparse) && self.vdim > 1;
        let sparse_ok = control.allows(Sparsity::Sparse);

        if !hyper_ok {
            return Sparsity::Sparse;
        }
        if !sparse_ok {
            return Sparsity::Hypersparse;
        }

        let ratio = self.hyper_ratio.unwrap_or(config.hyper_ratio);
        let k = self.nvec_nonempty() as f64;
        if k <= ratio * self.vdim as f64 {
            Sparsity::Hypersparse
        } else {
            Sparsity::Sparse
        }
    }
}
