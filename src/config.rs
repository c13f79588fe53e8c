//! Configuration and tuning parameters for the engine
//!
//! Every heuristic threshold the engine consults lives here: the thread
//! budget, the density thresholds that drive layout conversion, and the
//! workspace-cost constants used by the multiply method selector. All of
//! them are empirically tuned policy, not mathematical necessity, so they
//! are fields rather than hard constants.

/// Thread budget for a single operation
///
/// Each operation computes its own worker count once from the problem size
/// and this budget; there is no persistent worker pool across operations.
#[derive(Debug, Clone)]
pub struct ThreadBudget {
    /// Maximum number of threads any one operation may use
    pub nthreads_max: usize,
    /// Minimum amount of work (entries touched) per thread; operations
    /// smaller than one chunk run serially
    pub chunk: usize,
}

impl Default for ThreadBudget {
    fn default() -> Self {
        Self {
            nthreads_max: num_cpus::get(),
            chunk: 64 * 1024,
        }
    }
}

impl ThreadBudget {
    /// Number of threads to use for an operation touching `work` entries
    pub fn nthreads_for(&self, work: usize) -> usize {
        if self.chunk == 0 {
            return self.nthreads_max.max(1);
        }
        let by_work = work / self.chunk + if work % self.chunk != 0 { 1 } else { 0 };
        by_work.clamp(1, self.nthreads_max.max(1))
    }
}

/// Tuning constants for the multiply method selector
///
/// See `ops::multiply` for where each constant enters the decision tree.
#[derive(Debug, Clone)]
pub struct MultiplyTuning {
    /// Element-wise merge switches to one-sided binary-search skipping when
    /// one vector has more than this many times the entries of the other
    pub imbalance_ratio: usize,
    /// Unmasked dot product is chosen only when its dense output workspace
    /// is smaller than the cheaper transpose workspace divided by this
    /// factor (dot product has worse asymptotics without a mask)
    pub dot_aversion: usize,
    /// Weighting asymmetry when choosing which operand to transpose for the
    /// outer-product method: one side's transpose cost must exceed the
    /// other's by this factor before the preference switches
    pub transpose_bias: usize,
    /// Threshold on the per-vector intermediate product size below which
    /// the outer product uses the sort-based accumulator instead of a
    /// dense accumulation array
    pub dense_accum_threshold: usize,
}

impl Default for MultiplyTuning {
    fn default() -> Self {
        Self {
            imbalance_ratio: 256,
            dot_aversion: 10,
            transpose_bias: 4,
            dense_accum_threshold: 256,
        }
    }
}

/// Default ratio of non-empty vectors to vector dimension below which a
/// sparse matrix converts to hypersparse
pub const DEFAULT_HYPER_RATIO: f64 = 0.0625;

/// Default sparse<->bitmap switch table, largest-dimension bucket first
///
/// `bitmap_switch_for` indexes this by log2 of the smaller matrix
/// dimension: large matrices switch to bitmap at 4% density, tiny ones not
/// until 40%.
pub const DEFAULT_BITMAP_SWITCH: [f64; 8] = [0.04, 0.05, 0.06, 0.08, 0.10, 0.20, 0.30, 0.40];

/// Configuration for the sparse engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Thread budget shared by all operations
    pub threads: ThreadBudget,
    /// Sparse->hypersparse conversion ratio used for matrices that do not
    /// carry their own
    pub hyper_ratio: f64,
    /// Sparse->bitmap density thresholds, bucketed by log2(min dimension);
    /// the reverse bitmap->sparse threshold is half of each entry
    /// (hysteresis against oscillation)
    pub bitmap_switch: [f64; 8],
    /// Multiply method-selection constants
    pub multiply: MultiplyTuning,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: ThreadBudget::default(),
            hyper_ratio: DEFAULT_HYPER_RATIO,
            bitmap_switch: DEFAULT_BITMAP_SWITCH,
            multiply: MultiplyTuning::default(),
        }
    }
}

impl EngineConfig {
    /// Density above which a sparse matrix of the given dimensions should
    /// switch to bitmap
    ///
    /// Larger matrices tolerate a lower density before switching: the
    /// bucket is log2 of the smaller dimension, saturating at the table
    /// ends.
    pub fn bitmap_switch_for(&self, vlen: usize, vdim: usize) -> f64 {
        let min_dim = vlen.min(vdim).max(1);
        // floor(log2(min_dim)), capped at the last bucket
        let bucket = (usize::BITS - 1 - min_dim.leading_zeros()) as usize;
        let bucket = bucket.min(self.bitmap_switch.len() - 1);
        // table is stored largest-dimension-first
        self.bitmap_switch[self.bitmap_switch.len() - 1 - bucket]
    }

    /// Density below which a bitmap matrix should switch back to sparse
    ///
    /// Half the forward threshold, so that single-entry updates at the
    /// boundary never oscillate between the two layouts.
    pub fn sparse_switch_for(&self, vlen: usize, vdim: usize) -> f64 {
        self.bitmap_switch_for(vlen, vdim) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_budget_scales_with_work() {
        let budget = ThreadBudget {
            nthreads_max: 8,
            chunk: 100,
        };

        assert_eq!(budget.nthreads_for(0), 1);
        assert_eq!(budget.nthreads_for(50), 1);
        assert_eq!(budget.nthreads_for(250), 3);
        // Never exceeds the maximum
        assert_eq!(budget.nthreads_for(1_000_000), 8);
    }

    #[test]
    fn test_bitmap_switch_buckets() {
        let config = EngineConfig::default();

        // Tiny matrices need high density before bitmap pays off
        assert_eq!(config.bitmap_switch_for(1, 1), 0.40);
        assert_eq!(config.bitmap_switch_for(2, 2), 0.30);

        // Large matrices switch at 4%
        assert_eq!(config.bitmap_switch_for(1000, 1000), 0.04);

        // Bucket follows the smaller dimension
        assert_eq!(
            config.bitmap_switch_for(1, 1_000_000),
            config.bitmap_switch_for(1, 1)
        );
    }

    #[test]
    fn test_hysteresis_gap() {
        let config = EngineConfig::default();

        // The reverse threshold is strictly below the forward one at every
        // size, so boundary updates cannot oscillate
        for log_dim in 0..12 {
            let dim = 1usize << log_dim;
            assert!(config.sparse_switch_for(dim, dim) < config.bitmap_switch_for(dim, dim));
        }
    }
}
