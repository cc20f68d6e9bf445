//! Exact dense factorizations for the small matrices the randomized solver produces.
//! Both are delegated to `nalgebra`.

use log::trace;
use ndarray::{Array1, Array2, Axis};
use nshare::{IntoNalgebra, IntoNdarray2};

use crate::dense::DenseMatrixExt;
use crate::svd::FactorizationFailure;

/// Exact SVD `x = U·diag(s)·Vᵀ` with singular values sorted in descending order.
pub struct SVD {
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
}

impl SVD {
    /// Factorizes `x`, giving up after `max_iterations` bidiagonal QR sweeps (0 means no bound).
    pub fn compute(x: Array2<f64>, max_iterations: usize) -> Result<Self, FactorizationFailure> {
        let matrix = x.into_nalgebra();

        let svd = nalgebra::SVD::try_new(matrix, true, true, f64::EPSILON, max_iterations)
            .ok_or(FactorizationFailure::NotConverged { max_iterations })?;

        let u = svd.u.ok_or(FactorizationFailure::MissingVectors)?;
        let vt = svd.v_t.ok_or(FactorizationFailure::MissingVectors)?;

        let mut out = SVD {
            u: u.into_ndarray2(),
            s: Array1::from_iter(svd.singular_values.iter().cloned()),
            vt: vt.into_ndarray2(),
        };
        out.reorder_descending();

        for factor in [&out.u, &out.vt] {
            if !factor.is_finite() {
                return Err(FactorizationFailure::NonFinite {
                    rows: factor.nrows(),
                    cols: factor.ncols(),
                });
            }
        }
        if out.s.iter().any(|v| !v.is_finite()) {
            return Err(FactorizationFailure::NonFinite {
                rows: out.s.len(),
                cols: 1,
            });
        }

        Ok(out)
    }

    fn reorder_descending(&mut self) {
        let mut order: Vec<usize> = (0..self.s.len()).collect();
        order.sort_by(|&i, &j| self.s[j].total_cmp(&self.s[i]));
        if order.iter().enumerate().all(|(pos, &idx)| pos == idx) {
            return;
        }

        self.s = self.s.select(Axis(0), &order);
        self.u = self.u.select(Axis(1), &order);
        self.vt = self.vt.select(Axis(0), &order);
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn vt(&self) -> &Array2<f64> {
        &self.vt
    }

    // Reconstruct the original matrix
    pub fn reconstruct(&self) -> Array2<f64> {
        let s_diag = Array2::from_diag(&self.s);
        self.u.dot(&s_diag).dot(&self.vt)
    }
}

/// Orthonormal basis of the column space of `y` via Householder QR.
///
/// The result has the same shape as `y`. A wide `y` has no such basis and is rejected with
/// [`FactorizationFailure::WideInput`].
pub fn orthonormalize(y: Array2<f64>) -> Result<Array2<f64>, FactorizationFailure> {
    let (rows, cols) = y.dim();
    if rows < cols {
        return Err(FactorizationFailure::WideInput { rows, cols });
    }

    let qr = y.into_nalgebra().qr();

    if log::log_enabled!(log::Level::Trace) {
        let r = qr.r();
        let diag = r.diagonal();
        let largest = diag.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        let cutoff = largest * f64::EPSILON * rows.max(cols) as f64;
        let numerical_rank = diag.iter().filter(|v| v.abs() > cutoff).count();
        trace!("QR of {}x{} block: numerical rank {}", rows, cols, numerical_rank);
    }

    let q = qr.q().into_ndarray2();
    if !q.is_finite() {
        return Err(FactorizationFailure::NonFinite { rows, cols });
    }
    Ok(q)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn test_simple_svd() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let svd = SVD::compute(a.clone(), 0).unwrap();
        let s = svd.s();
        let vt = svd.vt();
        let u = svd.u();
        // Check dimensions
        assert_eq!(u.shape(), &[2, 2]);
        assert_eq!(s.len(), 2);
        assert_eq!(vt.shape(), &[2, 2]);

        // Check singular values (pre-computed)
        assert_abs_diff_eq!(s[0], 5.4649857, epsilon = 1e-6);
        assert_abs_diff_eq!(s[1], 0.3659662, epsilon = 1e-6);

        // Check reconstruction
        let reconstructed = svd.reconstruct();
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(reconstructed[[i, j]], a[[i, j]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_values_descending() {
        let a = array![[1.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 2.0]];
        let svd = SVD::compute(a.clone(), 0).unwrap();

        assert_abs_diff_eq!(svd.s()[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(svd.s()[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(svd.s()[2], 1.0, epsilon = 1e-12);

        let reconstructed = svd.reconstruct();
        assert_abs_diff_eq!((&reconstructed - &a).frobenius_norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_wide_matrix_shapes() {
        let a = array![[1.0, 2.0, 3.0, 4.0], [2.0, 0.0, 1.0, -1.0]];
        let svd = SVD::compute(a.clone(), 0).unwrap();
        assert_eq!(svd.u().dim(), (2, 2));
        assert_eq!(svd.vt().dim(), (2, 4));
        assert!(svd.vt().t().orthonormality_error() < 1e-12);
        assert_abs_diff_eq!((&svd.reconstruct() - &a).frobenius_norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_orthonormalize_spans_input() {
        let y = array![[1.0, 1.0], [1.0, 2.0], [1.0, 3.0], [1.0, 4.0]];
        let q = orthonormalize(y.clone()).unwrap();

        assert_eq!(q.dim(), (4, 2));
        assert!(q.orthonormality_error() < 1e-12);

        // Q Q^T y == y when Q spans the columns of y
        let projected = q.dot(&q.t().dot(&y));
        assert_abs_diff_eq!((&projected - &y).frobenius_norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_orthonormalize_rank_deficient() {
        // second column is a multiple of the first
        let y = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let q = orthonormalize(y).unwrap();
        assert_eq!(q.dim(), (3, 2));
        assert!(q.orthonormality_error() < 1e-12);
    }

    #[test]
    fn test_orthonormalize_rejects_wide_input() {
        let y = array![[1.0, 0.0, 2.0], [0.0, 1.0, 3.0]];
        let err = orthonormalize(y).unwrap_err();
        assert_eq!(err, FactorizationFailure::WideInput { rows: 2, cols: 3 });
        assert!(err.to_string().contains("2x3"));
    }
}
