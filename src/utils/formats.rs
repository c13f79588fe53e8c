//! Conversions between our matrix container and sprs CsMat
//!
//! Outbound conversions accept a matrix in any layout or deferred state
//! and go through the triplet form, so they never assume a particular
//! storage. Inbound conversions take sprs's raw compressed arrays
//! directly.

use num_traits::Num;
use sprs::{CsMat, TriMat};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::matrix::core::prepared_sparse;
use crate::matrix::SparseMatrix;

/// Converts a matrix to sprs CsMat in CSR format
pub fn to_sprs_csr<T>(matrix: &SparseMatrix<T>, config: &EngineConfig) -> CsMat<T>
where
    T: Copy + Num + Default + Send + Sync,
{
    triplet_form(matrix, config).to_csr()
}

/// Converts a matrix to sprs CsMat in CSC format
pub fn to_sprs_csc<T>(matrix: &SparseMatrix<T>, config: &EngineConfig) -> CsMat<T>
where
    T: Copy + Num + Default + Send + Sync,
{
    triplet_form(matrix, config).to_csc()
}

fn triplet_form<T>(matrix: &SparseMatrix<T>, config: &EngineConfig) -> TriMat<T>
where
    T: Copy + Num + Default + Send + Sync,
{
    let m = prepared_sparse(matrix, config);
    let mut tri = TriMat::with_capacity((m.nrows(), m.ncols()), m.live_count());
    for (row, col, val) in m.triples() {
        tri.add_triplet(row, col, val);
    }
    tri
}

/// Builds a row-oriented matrix from a sprs CsMat
pub fn from_sprs_csr<T>(matrix: CsMat<T>) -> Result<SparseMatrix<T>>
where
    T: Copy + Num + Default + Send + Sync,
{
    let matrix = if matrix.is_csr() {
        matrix
    } else {
        matrix.to_csr()
    };
    let (nrows, ncols) = matrix.shape();
    let (indptr, indices, data) = matrix.into_raw_storage();
    SparseMatrix::from_csr(nrows, ncols, indptr, indices, data)
}

/// Builds a column-oriented matrix from a sprs CsMat
pub fn from_sprs_csc<T>(matrix: CsMat<T>) -> Result<SparseMatrix<T>>
where
    T: Copy + Num + Default + Send + Sync,
{
    let matrix = if matrix.is_csc() {
        matrix
    } else {
        matrix.to_csc()
    };
    let (nrows, ncols) = matrix.shape();
    let (indptr, indices, data) = matrix.into_raw_storage();
    SparseMatrix::from_csc(nrows, ncols, indptr, indices, data)
}
