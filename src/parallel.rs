//! Fork-join partitioning helpers
//!
//! Every parallel region in the engine is a flat rayon parallel-for over
//! disjoint partitions computed up front, in one of two shapes:
//!
//! - *By-vector*: one task per vector (or block of vectors), used whenever
//!   the task count fits under the vector count; tasks are fully
//!   independent and need no shared workspace.
//! - *By-row-block*: used when there are fewer vectors than useful tasks
//!   (e.g. gathering a wide bitmap with few columns but many rows). Each
//!   task histograms its row range over all vectors, then an exclusive
//!   prefix sum across tasks per vector gives every task a disjoint write
//!   cursor for the gather pass.
//!
//! Partition boundaries are computed before any task writes, so output
//! ranges are disjoint by construction and no synchronization is needed.

use std::ops::Range;

/// Splits `0..n_items` into `n_tasks` contiguous ranges of near-equal size
///
/// The first `n_items % n_tasks` ranges get one extra item. Empty ranges
/// are produced when `n_tasks > n_items`.
pub fn partition(n_items: usize, n_tasks: usize) -> Vec<Range<usize>> {
    let n_tasks = n_tasks.max(1);
    let base = n_items / n_tasks;
    let extra = n_items % n_tasks;

    let mut ranges = Vec::with_capacity(n_tasks);
    let mut start = 0;
    for t in 0..n_tasks {
        let len = base + if t < extra { 1 } else { 0 };
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Exclusive prefix sum across tasks, per vector
///
/// `counts` is an `n_tasks x n_vecs` histogram: `counts[t][j]` is the
/// number of entries task `t` found in vector `j`. On return,
/// `counts[t][j]` is the write offset of task `t` within vector `j`'s
/// output slice, and the returned vector holds the total per-vector counts.
pub fn exclusive_scan_tasks(counts: &mut [Vec<usize>], n_vecs: usize) -> Vec<usize> {
    let mut totals = vec![0usize; n_vecs];
    for j in 0..n_vecs {
        let mut sum = 0;
        for task in counts.iter_mut() {
            let c = task[j];
            task[j] = sum;
            sum += c;
        }
        totals[j] = sum;
    }
    totals
}

/// Cumulative sum of per-vector counts into a pointer array
///
/// `counts[j]` entries in vector `j` become the slice `ptr[j]..ptr[j + 1]`.
pub fn cumsum(counts: &[usize]) -> Vec<usize> {
    let mut ptr = Vec::with_capacity(counts.len() + 1);
    let mut sum = 0;
    ptr.push(0);
    for &c in counts {
        sum += c;
        ptr.push(sum);
    }
    ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_even() {
        let ranges = partition(12, 4);
        assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..12]);
    }

    #[test]
    fn test_partition_uneven() {
        let ranges = partition(10, 4);
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);

        // Ranges cover everything exactly once
        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn test_partition_more_tasks_than_items() {
        let ranges = partition(2, 5);
        assert_eq!(ranges.len(), 5);
        let total: usize = ranges.iter().map(|r| r.len()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_exclusive_scan_tasks() {
        // 3 tasks, 2 vectors
        let mut counts = vec![vec![2, 0], vec![1, 3], vec![4, 1]];
        let totals = exclusive_scan_tasks(&mut counts, 2);

        assert_eq!(totals, vec![7, 4]);
        assert_eq!(counts[0], vec![0, 0]);
        assert_eq!(counts[1], vec![2, 0]);
        assert_eq!(counts[2], vec![3, 3]);
    }

    #[test]
    fn test_cumsum() {
        assert_eq!(cumsum(&[2, 0, 3]), vec![0, 2, 2, 5]);
        assert_eq!(cumsum(&[]), vec![0]);
    }
}
