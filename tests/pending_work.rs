//! Deferred updates: pending insertions, tombstoned deletions, and wait

use tessellate::{EngineConfig, Error, SparseMatrix, Sparsity};

fn add(a: i64, b: i64) -> i64 {
    a + b
}

fn max(a: i64, b: i64) -> i64 {
    a.max(b)
}

fn compressed_fixture(config: &EngineConfig) -> SparseMatrix<i64> {
    let mut m = SparseMatrix::from_tuples(
        10,
        10,
        &[0, 2, 4, 6, 8],
        &[0, 2, 4, 6, 8],
        &[1, 2, 3, 4, 5],
        None,
        config,
    )
    .unwrap();
    m.convert_to(Sparsity::Sparse, config).unwrap();
    m
}

#[test]
fn test_insertion_into_compressed_is_deferred() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    m.set_element(1, 1, 100, None).unwrap();
    m.set_element(3, 3, 200, None).unwrap();
    assert_eq!(m.pending_count(), 2);

    // wait folds the queue in
    m.wait(&config);
    assert_eq!(m.pending_count(), 0);
    assert_eq!(m.extract_element(1, 1, &config).unwrap(), Some(100));
    assert_eq!(m.extract_element(3, 3, &config).unwrap(), Some(200));
    m.check().unwrap();
}

#[test]
fn test_deletion_from_compressed_leaves_tombstone() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    assert!(m.remove_element(2, 2).unwrap());
    assert_eq!(m.zombie_count(), 1);
    // The tombstone hides the entry before any flush
    assert_eq!(m.extract_element(2, 2, &config).unwrap(), None);
    assert_eq!(m.zombie_count(), 0);

    // Deleting the same position again finds nothing
    assert!(!m.remove_element(2, 2).unwrap());
}

#[test]
fn test_overwrite_of_tombstone_revives_in_place() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    assert!(m.remove_element(4, 4).unwrap());
    assert_eq!(m.zombie_count(), 1);
    m.set_element(4, 4, 33, None).unwrap();
    // The slot is reused: no pending tuple, no tombstone
    assert_eq!(m.zombie_count(), 0);
    assert_eq!(m.pending_count(), 0);
    assert_eq!(m.extract_element(4, 4, &config).unwrap(), Some(33));
}

#[test]
fn test_mixed_deferred_work_flush_count() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);
    assert_eq!(m.nvals(&config), 5);

    // Two deletions and three insertions, then one flush
    m.remove_element(0, 0).unwrap();
    m.remove_element(6, 6).unwrap();
    m.set_element(1, 0, 10, None).unwrap();
    m.set_element(5, 5, 11, None).unwrap();
    m.set_element(9, 9, 12, None).unwrap();

    assert_eq!(m.nvals(&config), 5 - 2 + 3);
    m.check().unwrap();
}

#[test]
fn test_pending_accumulator_applied_on_flush() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    // (2,2) holds 2; two accumulated updates fold into it
    m.set_element(2, 2, 5, Some(add)).unwrap();
    m.set_element(2, 2, 7, Some(add)).unwrap();
    assert_eq!(m.extract_element(2, 2, &config).unwrap(), Some(14));
}

#[test]
fn test_pending_accumulator_must_be_consistent() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    m.set_element(1, 1, 5, Some(add)).unwrap();
    // A different accumulator on the same queue is refused
    assert!(matches!(
        m.set_element(3, 3, 5, Some(max)),
        Err(Error::DomainMismatch(_))
    ));
    // The same accumulator is fine
    m.set_element(3, 3, 5, Some(add)).unwrap();
    assert_eq!(m.nvals(&config), 7);
}

#[test]
fn test_pending_without_accumulator_last_wins() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    m.set_element(7, 7, 1, None).unwrap();
    m.set_element(7, 7, 2, None).unwrap();
    m.set_element(7, 7, 3, None).unwrap();
    assert_eq!(m.extract_element(7, 7, &config).unwrap(), Some(3));
}

#[test]
fn test_remove_cancels_pending_insertion() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);

    m.set_element(5, 5, 50, None).unwrap();
    assert_eq!(m.pending_count(), 1);
    assert!(m.remove_element(5, 5).unwrap());
    assert_eq!(m.pending_count(), 0);
    assert_eq!(m.extract_element(5, 5, &config).unwrap(), None);
}

#[test]
fn test_wait_is_idempotent() {
    let config = EngineConfig::default();
    let mut m = compressed_fixture(&config);
    m.set_element(1, 1, 1, None).unwrap();
    m.remove_element(0, 0).unwrap();

    m.wait(&config);
    let first: usize = m.nvals(&config);
    m.wait(&config);
    assert_eq!(m.nvals(&config), first);
    m.check().unwrap();
}

#[test]
fn test_bitmap_updates_are_immediate() {
    let config = EngineConfig::default();
    let mut m = SparseMatrix::full_iso(4, 4, 1i64);
    // Deleting from a dense layout degrades it, never tombstones
    assert!(m.remove_element(1, 1).unwrap());
    assert_eq!(m.zombie_count(), 0);
    assert_eq!(m.pending_count(), 0);
    assert_eq!(m.nvals(&config), 15);

    m.set_element(1, 1, 2, None).unwrap();
    assert_eq!(m.pending_count(), 0);
    assert_eq!(m.extract_element(1, 1, &config).unwrap(), Some(2));
}
