//! The acceptance scenarios, run through the public API end to end

use tessellate::{
    emult, matrix_multiply, plus_times, select, EngineConfig, SelectOp, SparseMatrix, Sparsity,
    SparsityControl,
};

fn sorted_triples(m: &mut SparseMatrix<i64>, config: &EngineConfig) -> Vec<(usize, usize, i64)> {
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
fn test_scenario_set_remove_flush() {
    let config = EngineConfig::default();
    let mut m = SparseMatrix::<i64>::new(4, 4);
    m.set_element(1, 1, 5, None).unwrap();
    m.set_element(2, 2, 7, None).unwrap();
    m.remove_element(1, 1).unwrap();
    m.wait(&config);

    assert_eq!(m.nvals(&config), 1);
    assert_eq!(sorted_triples(&mut m, &config), vec![(2, 2, 7)]);
    m.check().unwrap();
}

#[test]
fn test_scenario_emult_times() {
    let config = EngineConfig::default();
    let a = SparseMatrix::from_tuples(
        3,
        3,
        &[0, 1, 2],
        &[0, 1, 2],
        &[1, 2, 3],
        None,
        &config,
    )
    .unwrap();
    let b = SparseMatrix::from_tuples(
        3,
        3,
        &[0, 2, 2],
        &[0, 2, 1],
        &[10, 30, 99],
        None,
        &config,
    )
    .unwrap();

    fn times(a: i64, b: i64) -> i64 {
        a * b
    }
    let mut c = emult(&a, &b, times, &config).unwrap();
    assert_eq!(
        sorted_triples(&mut c, &config),
        vec![(0, 0, 10), (2, 2, 90)]
    );
}

#[test]
fn test_scenario_conform_to_hypersparse() {
    let config = EngineConfig::default();
    let mut m = SparseMatrix::from_tuples(
        1000,
        1000,
        &[10, 20, 30, 40, 50],
        &[500, 500, 500, 500, 500],
        &[1i64, 2, 3, 4, 5],
        None,
        &config,
    )
    .unwrap();
    m.conform_to(SparsityControl::AUTO, &config);
    assert_eq!(m.sparsity(), Sparsity::Hypersparse);
}

#[test]
fn test_scenario_select_tril() {
    let config = EngineConfig::default();
    let a = SparseMatrix::full_iso(3, 3, 1i64);
    let mut t = select(&a, &SelectOp::Tril(0), &config).unwrap();
    let triples = sorted_triples(&mut t, &config);
    assert_eq!(triples.len(), 6);
    assert!(triples.iter().all(|&(r, c, v)| c <= r && v == 1));
}

#[test]
fn test_build_operate_extract_pipeline() {
    let config = EngineConfig::default();
    let semiring = plus_times::<i64>();

    // Adjacency matrix of a 6-cycle, built incrementally
    let n = 6;
    let mut adj = SparseMatrix::<i64>::new(n, n);
    for v in 0..n {
        adj.set_element(v, (v + 1) % n, 1, None).unwrap();
        adj.set_element((v + 1) % n, v, 1, None).unwrap();
    }

    // Two-hop reachability: the square of the adjacency matrix
    let (mut two_hop, _) =
        matrix_multiply(None, &adj, &adj, false, false, &semiring, &config).unwrap();
    // On a cycle every vertex reaches itself (two ways) and both
    // distance-2 neighbors (one way each)
    for (r, c, v) in sorted_triples(&mut two_hop, &config) {
        if r == c {
            assert_eq!(v, 2);
        } else {
            assert_eq!(v, 1);
            assert!((r + 2) % n == c || (c + 2) % n == r);
        }
    }

    // Dropping the diagonal leaves only the genuine two-hop pairs
    let mut strict = select(&two_hop, &SelectOp::Offdiag(0), &config).unwrap();
    assert_eq!(strict.nvals(&config), n * 2);

    // The cycle is symmetric, so A' * A = A * A
    let (mut ata, _) =
        matrix_multiply(None, &adj, &adj, true, false, &semiring, &config).unwrap();
    assert_eq!(
        sorted_triples(&mut ata, &config),
        sorted_triples(&mut two_hop, &config)
    );
}

#[test]
fn test_updates_between_operations() {
    let config = EngineConfig::default();
    let semiring = plus_times::<i64>();

    let mut a = SparseMatrix::from_tuples(
        4,
        4,
        &[0, 1, 2, 3],
        &[0, 1, 2, 3],
        &[1, 2, 3, 4],
        None,
        &config,
    )
    .unwrap();

    // Mutate, multiply, mutate again, re-multiply
    a.set_element(0, 3, 5, None).unwrap();
    let (mut sq1, _) = matrix_multiply(None, &a, &a, false, false, &semiring, &config).unwrap();
    // (0,3) of A^2: A(0,0)*A(0,3) + A(0,3)*A(3,3) = 1*5 + 5*4
    assert_eq!(
        sorted_triples(&mut sq1, &config)
            .into_iter()
            .find(|&(r, c, _)| r == 0 && c == 3),
        Some((0, 3, 25))
    );

    a.remove_element(0, 3).unwrap();
    let (mut sq2, _) = matrix_multiply(None, &a, &a, false, false, &semiring, &config).unwrap();
    assert_eq!(
        sorted_triples(&mut sq2, &config),
        vec![(0, 0, 1), (1, 1, 4), (2, 2, 9), (3, 3, 16)]
    );
    a.check().unwrap();
}
