//! The automatic layout policy: density thresholds and sparsity control

use tessellate::{EngineConfig, SparseMatrix, Sparsity, SparsityControl};

#[test]
fn test_single_column_of_large_matrix_goes_hypersparse() {
    let config = EngineConfig::default();
    // 1000x1000 with 5 entries in one column: 1 non-empty vector out of
    // 1000 is well under the hypersparse ratio
    let mut m = SparseMatrix::from_tuples(
        1000,
        1000,
        &[0, 200, 400, 600, 800],
        &[3, 3, 3, 3, 3],
        &[1i64, 2, 3, 4, 5],
        None,
        &config,
    )
    .unwrap();
    m.conform_to(SparsityControl::AUTO, &config);
    assert_eq!(m.sparsity(), Sparsity::Hypersparse);
    assert_eq!(m.nvals(&config), 5);
}

#[test]
fn test_all_present_goes_full() {
    let config = EngineConfig::default();
    let rows: Vec<usize> = (0..16).map(|p| p / 4).collect();
    let cols: Vec<usize> = (0..16).map(|p| p % 4).collect();
    let vals: Vec<i64> = (0..16).collect();
    let m = SparseMatrix::from_tuples(4, 4, &rows, &cols, &vals, None, &config).unwrap();
    assert_eq!(m.sparsity(), Sparsity::Full);
}

#[test]
fn test_dense_but_incomplete_goes_bitmap() {
    let config = EngineConfig::default();
    // 8x8 at 25% density: above the 10% switch for this size, not full
    let rows: Vec<usize> = (0..16).map(|p| (p * 3) % 8).collect();
    let cols: Vec<usize> = (0..16).map(|p| (p * 3) / 8).collect();
    let vals: Vec<i64> = (0..16).collect();
    let m = SparseMatrix::from_tuples(8, 8, &rows, &cols, &vals, None, &config).unwrap();
    assert_eq!(m.sparsity(), Sparsity::Bitmap);
}

#[test]
fn test_low_density_stays_sparse() {
    let config = EngineConfig::default();
    // 100x100, 20 entries spread over 20 columns: 2e-3 density, and a
    // fifth of the vectors non-empty, so neither bitmap nor hypersparse
    let rows: Vec<usize> = (0..20).collect();
    let cols: Vec<usize> = (0..20).collect();
    let vals: Vec<i64> = (0..20).collect();
    let m = SparseMatrix::from_tuples(100, 100, &rows, &cols, &vals, None, &config).unwrap();
    assert_eq!(m.sparsity(), Sparsity::Sparse);
}

#[test]
fn test_control_restricts_layout() {
    let config = EngineConfig::default();
    let mut m = SparseMatrix::full_iso(4, 4, 1i64);
    assert_eq!(m.sparsity(), Sparsity::Full);

    // Dense data forced into the sparse layout
    m.set_sparsity_control(SparsityControl::SPARSE);
    m.conform_to(SparsityControl::SPARSE, &config);
    assert_eq!(m.sparsity(), Sparsity::Sparse);
    m.check().unwrap();

    m.conform_to(SparsityControl::HYPERSPARSE, &config);
    assert_eq!(m.sparsity(), Sparsity::Hypersparse);
    m.check().unwrap();
}

#[test]
fn test_full_only_control_degrades_to_bitmap() {
    let config = EngineConfig::default();
    // One missing entry: full is impossible, so a full-only control
    // falls back to the nearest representable layout
    let rows: Vec<usize> = (0..15).map(|p| p / 4).collect();
    let cols: Vec<usize> = (0..15).map(|p| p % 4).collect();
    let vals: Vec<i64> = (0..15).collect();
    let mut m = SparseMatrix::from_tuples(4, 4, &rows, &cols, &vals, None, &config).unwrap();

    m.conform_to(SparsityControl::FULL, &config);
    assert_eq!(m.sparsity(), Sparsity::Bitmap);
    assert_eq!(m.nvals(&config), 15);
}

#[test]
fn test_combined_control_mask() {
    let config = EngineConfig::default();
    let mut m = SparseMatrix::from_tuples(
        1000,
        1000,
        &[0, 1, 2],
        &[5, 5, 5],
        &[1i64, 2, 3],
        None,
        &config,
    )
    .unwrap();

    // Hypersparse excluded: the single-column matrix settles on sparse
    m.conform_to(SparsityControl::SPARSE | SparsityControl::BITMAP, &config);
    assert_eq!(m.sparsity(), Sparsity::Sparse);
}

#[test]
fn test_deletion_below_threshold_leaves_bitmap_family() {
    let config = EngineConfig::default();
    // Start dense, delete down to 1 of 16 entries, then reconform
    let mut m = SparseMatrix::full_iso(4, 4, 1i64);
    for r in 0..4 {
        for c in 0..4 {
            if !(r == 0 && c == 0) {
                m.remove_element(r, c).unwrap();
            }
        }
    }
    assert_eq!(m.nvals(&config), 1);
    m.conform_to(SparsityControl::AUTO, &config);
    // 6.25% density on a 4x4 is below the 10% reverse threshold
    assert_ne!(m.sparsity(), Sparsity::Bitmap);
    assert_ne!(m.sparsity(), Sparsity::Full);
    m.check().unwrap();
}

#[test]
fn test_per_matrix_thresholds_override_config() {
    let config = EngineConfig::default();
    let mut m = SparseMatrix::from_tuples(
        100,
        100,
        &[0, 1, 2],
        &[0, 1, 2],
        &[1i64, 2, 3],
        None,
        &config,
    )
    .unwrap();
    assert_eq!(m.sparsity(), Sparsity::Sparse);

    // A zero bitmap threshold makes any occupancy dense enough
    m.set_bitmap_switch(0.0);
    m.conform_to(SparsityControl::AUTO, &config);
    assert_eq!(m.sparsity(), Sparsity::Bitmap);
}
