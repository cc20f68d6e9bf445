use ndarray::{Array2, ArrayBase, Axis, Data, Ix2};
use rayon::prelude::*;

/// Numerical checks on dense `f64` matrices.
pub trait DenseMatrixExt {
    fn frobenius_norm(&self) -> f64;

    /// Position of the first NaN or infinite entry in row-major order.
    fn first_non_finite(&self) -> Option<(usize, usize)>;

    fn is_finite(&self) -> bool {
        self.first_non_finite().is_none()
    }

    /// `‖XᵀX − I‖_F`; zero when the columns are orthonormal.
    fn orthonormality_error(&self) -> f64;
}

impl<S> DenseMatrixExt for ArrayBase<S, Ix2>
where
    S: Data<Elem = f64> + Sync,
{
    fn frobenius_norm(&self) -> f64 {
        self.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    fn first_non_finite(&self) -> Option<(usize, usize)> {
        self.axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .find_map_first(|(i, row)| {
                row.iter().position(|v| !v.is_finite()).map(|j| (i, j))
            })
    }

    fn orthonormality_error(&self) -> f64 {
        let gram = self.t().dot(self);
        let eye = Array2::<f64>::eye(gram.nrows());
        (&gram - &eye).frobenius_norm()
    }
}
