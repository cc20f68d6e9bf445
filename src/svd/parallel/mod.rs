//! Tiled dense products evaluated with rayon.
//!
//! `A·X` is split over row blocks of `A`, `Aᵀ·X` over column blocks of `A`. Each tile writes a
//! disjoint block of the output, so the result does not depend on scheduling.

use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::svd::{try_zeros, SvdError, SvdResult};

pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// Runs `op` inside `pool` when one is given, otherwise on the current (global) pool.
pub(crate) fn install<OP, R>(pool: Option<&ThreadPool>, op: OP) -> R
where
    OP: FnOnce() -> R + Send,
    R: Send,
{
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// `out = a · x`, tiled over row blocks of `a`.
///
/// # Panics
/// If `a.ncols() != x.nrows()` or `out` is not `a.nrows() × x.ncols()`.
pub fn mat_mul_into(
    a: ArrayView2<f64>,
    x: ArrayView2<f64>,
    mut out: ArrayViewMut2<f64>,
    block_size: usize,
) {
    assert_eq!(a.ncols(), x.nrows(), "inner dimensions differ");
    assert_eq!(out.dim(), (a.nrows(), x.ncols()), "output shape mismatch");
    let block_size = block_size.max(1);

    out.axis_chunks_iter_mut(Axis(0), block_size)
        .into_par_iter()
        .zip(a.axis_chunks_iter(Axis(0), block_size).into_par_iter())
        .for_each(|(mut out_block, a_block)| {
            general_mat_mul(1.0, &a_block, &x, 0.0, &mut out_block);
        });
}

/// `out = aᵀ · x`, tiled over column blocks of `a`.
///
/// # Panics
/// If `a.nrows() != x.nrows()` or `out` is not `a.ncols() × x.ncols()`.
pub fn mat_t_mul_into(
    a: ArrayView2<f64>,
    x: ArrayView2<f64>,
    mut out: ArrayViewMut2<f64>,
    block_size: usize,
) {
    assert_eq!(a.nrows(), x.nrows(), "inner dimensions differ");
    assert_eq!(out.dim(), (a.ncols(), x.ncols()), "output shape mismatch");
    let block_size = block_size.max(1);

    out.axis_chunks_iter_mut(Axis(0), block_size)
        .into_par_iter()
        .zip(a.axis_chunks_iter(Axis(1), block_size).into_par_iter())
        .for_each(|(mut out_block, a_block)| {
            general_mat_mul(1.0, &a_block.t(), &x, 0.0, &mut out_block);
        });
}

/// Allocating form of [`mat_mul_into`]. Mismatched shapes give [`SvdError::InvalidArgument`].
pub fn mat_mul(
    buffer: &'static str,
    a: ArrayView2<f64>,
    x: ArrayView2<f64>,
    block_size: usize,
    pool: Option<&ThreadPool>,
) -> SvdResult<Array2<f64>> {
    check_inner(buffer, a, a.ncols(), x.nrows())?;
    let mut out = try_zeros(buffer, a.nrows(), x.ncols())?;
    install(pool, || mat_mul_into(a, x, out.view_mut(), block_size));
    Ok(out)
}

/// Allocating form of [`mat_t_mul_into`]. Mismatched shapes give [`SvdError::InvalidArgument`].
pub fn mat_t_mul(
    buffer: &'static str,
    a: ArrayView2<f64>,
    x: ArrayView2<f64>,
    block_size: usize,
    pool: Option<&ThreadPool>,
) -> SvdResult<Array2<f64>> {
    check_inner(buffer, a, a.nrows(), x.nrows())?;
    let mut out = try_zeros(buffer, a.ncols(), x.ncols())?;
    install(pool, || mat_t_mul_into(a, x, out.view_mut(), block_size));
    Ok(out)
}

fn check_inner(buffer: &str, a: ArrayView2<f64>, left: usize, right: usize) -> SvdResult<()> {
    if left != right {
        return Err(SvdError::InvalidArgument {
            rows: a.nrows(),
            cols: a.ncols(),
            reason: format!("{buffer}: inner dimensions differ ({left} vs {right})"),
        });
    }
    Ok(())
}
