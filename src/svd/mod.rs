//! # Singular Value Decomposition
//!
//! Truncated SVD of dense matrices. The randomized solver ([`ApproxSVD`]) is the entry point;
//! [`exact`] holds the small dense factorizations it delegates to and [`parallel`] the tiled
//! matrix products it runs on.
//!
//! Matrices are `ndarray` arrays with rows as samples and columns as features.

use std::fmt;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

use crate::dense::DenseMatrixExt;

pub mod exact;
pub mod parallel;
pub mod randomized;

pub use randomized::{
    approx_svd, approx_svd_seeded, ApproxSVD, ApproxSVDBuilder, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_SVD_ITERATIONS, DEFAULT_OVERSAMPLES,
};

/// Result type alias for the SVD routines.
pub type SvdResult<T> = std::result::Result<T, SvdError>;

/// The step of the randomized solver a numerical failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Orthonormalizing the first sketch `A·Ω`.
    RangeSketch,
    /// Orthonormalizing `Aᵀ·Q` in the given power iteration (1-based).
    CorangeIteration(usize),
    /// Orthonormalizing `A·Q'` in the given power iteration (1-based).
    RangeIteration(usize),
    /// Forming the projected matrix `B = Qᵀ·A`.
    Projection,
    /// Exact SVD of the projected matrix.
    SmallSvd,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::RangeSketch => write!(f, "QR of initial sketch"),
            Stage::CorangeIteration(i) => write!(f, "QR of A^T*Q in power iteration {}", i),
            Stage::RangeIteration(i) => write!(f, "QR of A*Q in power iteration {}", i),
            Stage::Projection => write!(f, "projection B = Q^T*A"),
            Stage::SmallSvd => write!(f, "dense SVD of projected matrix"),
        }
    }
}

/// Why a dense factorization did not produce a usable result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactorizationFailure {
    #[error("non-finite values in {rows}x{cols} factor")]
    NonFinite { rows: usize, cols: usize },

    #[error("dense SVD did not converge within {max_iterations} iterations")]
    NotConverged { max_iterations: usize },

    #[error("dense SVD returned no singular vectors")]
    MissingVectors,

    #[error("cannot orthonormalize {rows}x{cols} block with more columns than rows")]
    WideInput { rows: usize, cols: usize },
}

/// Errors surfaced by the SVD routines. No partial result accompanies any of them.
#[derive(Debug, Error)]
pub enum SvdError {
    /// Malformed shape, out-of-range rank or non-finite input. Detected before any computation.
    #[error("invalid argument for {rows}x{cols} input: {reason}")]
    InvalidArgument {
        rows: usize,
        cols: usize,
        reason: String,
    },

    /// A factorization step failed. A fresh random sketch may avoid it.
    #[error(
        "numerical failure in {stage} for {rows}x{cols} input \
         (sketch width {sketch_width}, after {attempts} attempt(s)): {cause}"
    )]
    NumericalFailure {
        stage: Stage,
        rows: usize,
        cols: usize,
        sketch_width: usize,
        attempts: usize,
        #[source]
        cause: FactorizationFailure,
    },

    /// A working buffer could not be allocated.
    #[error("cannot allocate {rows}x{cols} buffer for {buffer}")]
    ResourceExhaustion {
        buffer: &'static str,
        rows: usize,
        cols: usize,
    },
}

impl SvdError {
    /// Only numerical failures are worth retrying with a new sketch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SvdError::NumericalFailure { .. })
    }
}

/// Allocates a zeroed `rows x cols` matrix, reporting overflow or allocation failure
/// instead of aborting.
pub(crate) fn try_zeros(buffer: &'static str, rows: usize, cols: usize) -> SvdResult<Array2<f64>> {
    let exhausted = || SvdError::ResourceExhaustion { buffer, rows, cols };
    let len = rows.checked_mul(cols).ok_or_else(exhausted)?;

    let mut data: Vec<f64> = Vec::new();
    data.try_reserve_exact(len).map_err(|_| exhausted())?;
    data.resize(len, 0.0);

    Array2::from_shape_vec((rows, cols), data).map_err(|_| exhausted())
}

/// Rank-k singular triplets `A ≈ U·diag(S)·Vᵀ`.
///
/// - `u`: n × k, orthonormal columns
/// - `s`: k non-negative values, non-increasing
/// - `v`: d × k, orthonormal columns; the basis used for projection (`Vᵀ·x`) and
///   reconstruction (`V·z`)
#[derive(Debug, Clone, PartialEq)]
pub struct TruncatedSVD {
    u: Array2<f64>,
    s: Array1<f64>,
    v: Array2<f64>,
}

impl TruncatedSVD {
    pub(crate) fn new(u: Array2<f64>, s: Array1<f64>, v: Array2<f64>) -> Self {
        debug_assert_eq!(u.ncols(), s.len());
        debug_assert_eq!(v.ncols(), s.len());
        TruncatedSVD { u, s, v }
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn v(&self) -> &Array2<f64> {
        &self.v
    }

    /// `Vᵀ` as a view, k × d.
    pub fn vt(&self) -> ArrayView2<'_, f64> {
        self.v.t()
    }

    pub fn rank(&self) -> usize {
        self.s.len()
    }

    pub fn into_parts(self) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
        (self.u, self.s, self.v)
    }

    // U * diag(S) * V^T
    pub fn reconstruct(&self) -> Array2<f64> {
        let scaled_u = &self.u * &self.s;
        scaled_u.dot(&self.v.t())
    }

    /// Frobenius norm of `A − U·diag(S)·Vᵀ`.
    pub fn residual_norm(&self, a: ArrayView2<f64>) -> SvdResult<f64> {
        if a.dim() != (self.u.nrows(), self.v.nrows()) {
            return Err(SvdError::InvalidArgument {
                rows: a.nrows(),
                cols: a.ncols(),
                reason: format!(
                    "expected a {}x{} matrix to compare against",
                    self.u.nrows(),
                    self.v.nrows()
                ),
            });
        }
        Ok((&a - &self.reconstruct()).frobenius_norm())
    }

    /// Maps a d-length sample into the reduced space: `Vᵀ·x`.
    pub fn project(&self, x: ArrayView1<f64>) -> SvdResult<Array1<f64>> {
        if x.len() != self.v.nrows() {
            return Err(SvdError::InvalidArgument {
                rows: 1,
                cols: x.len(),
                reason: format!("sample has {} features, basis expects {}", x.len(), self.v.nrows()),
            });
        }
        Ok(self.v.t().dot(&x))
    }

    /// Maps a k-length representation back to feature space: `V·z`.
    pub fn reconstruct_sample(&self, z: ArrayView1<f64>) -> SvdResult<Array1<f64>> {
        if z.len() != self.rank() {
            return Err(SvdError::InvalidArgument {
                rows: 1,
                cols: z.len(),
                reason: format!("representation has {} entries, rank is {}", z.len(), self.rank()),
            });
        }
        Ok(self.v.dot(&z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_try_zeros_overflow_is_resource_exhaustion() {
        let err = try_zeros("scratch", usize::MAX / 2, 4).unwrap_err();
        assert!(matches!(err, SvdError::ResourceExhaustion { buffer: "scratch", .. }));
        assert!(!err.is_retryable());

        // fits in usize but not in the address space
        let err = try_zeros("scratch", 1 << 40, 1 << 20).unwrap_err();
        assert!(matches!(err, SvdError::ResourceExhaustion { .. }));
    }

    #[test]
    fn test_try_zeros_shape() {
        let z = try_zeros("scratch", 3, 2).unwrap();
        assert_eq!(z.dim(), (3, 2));
        assert!(z.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_error_messages_carry_shape_and_stage() {
        let err = SvdError::NumericalFailure {
            stage: Stage::RangeIteration(2),
            rows: 40,
            cols: 30,
            sketch_width: 12,
            attempts: 4,
            cause: FactorizationFailure::NonFinite { rows: 40, cols: 12 },
        };
        let msg = err.to_string();
        assert!(msg.contains("40x30"));
        assert!(msg.contains("power iteration 2"));
        assert!(msg.contains("4 attempt"));
        assert!(err.is_retryable());

        let err = SvdError::InvalidArgument {
            rows: 5,
            cols: 5,
            reason: "rank must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("5x5"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_truncated_svd_reconstruct_and_project() {
        // A = 2 * e1 e1^T + 1 * e2 e2^T embedded in 3x3
        let u = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let s = array![2.0, 1.0];
        let v = array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        let svd = TruncatedSVD::new(u, s, v);

        let a = svd.reconstruct();
        assert_abs_diff_eq!(a[[0, 0]], 2.0);
        assert_abs_diff_eq!(a[[1, 1]], 1.0);
        assert_abs_diff_eq!(a[[2, 2]], 0.0);
        assert_abs_diff_eq!(svd.residual_norm(a.view()).unwrap(), 0.0);

        let z = svd.project(array![3.0, 4.0, 5.0].view()).unwrap();
        assert_eq!(z, array![3.0, 4.0]);
        let x = svd.reconstruct_sample(z.view()).unwrap();
        assert_eq!(x, array![3.0, 4.0, 0.0]);

        assert!(svd.project(array![1.0, 2.0].view()).is_err());
        assert!(svd.reconstruct_sample(array![1.0].view()).is_err());
        assert!(svd.residual_norm(Array2::zeros((2, 2)).view()).is_err());
    }
}
