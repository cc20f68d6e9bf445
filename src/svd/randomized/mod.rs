//! # Randomized SVD
//!
//! Rank-k truncated SVD by random range finding with power iterations
//! (Halko, Martinsson & Tropp, <https://arxiv.org/abs/0909.4061>, algorithms 4.4 and 5.1).
//!
//! With sketch width `l = min(k + p, n, d)`:
//! 1. draw Ω (d × l) with standard-normal entries and form `Y = A·Ω`
//! 2. `Q = qr(Y)`
//! 3. `q` times: `Q' = qr(Aᵀ·Q)`, `Q = qr(A·Q')`
//! 4. `B = Qᵀ·A`, exact SVD `B = Û·Ŝ·V̂ᵀ`
//! 5. `U = Q·Û`, keep the first k triplets
//!
//! Every product with `A` or `Aᵀ` is re-orthonormalized, not just the last one. Without it
//! the power iterations collapse the sketch onto the leading direction in floating point.
//! Each extra iteration costs two passes over `A` and sharpens the subspace by a factor of
//! `(σ_{l+1} / σ_k)²`.

use std::sync::Arc;

use log::{debug, trace, warn};
use ndarray::{s, Array2, ArrayView2};
use rand::Rng;
use rayon::ThreadPool;

use crate::dense::DenseMatrixExt;
use crate::sketch::{gaussian_sketch, SharedSketchRng, SketchSeed};
use crate::svd::exact::{self, orthonormalize};
use crate::svd::parallel::{self, DEFAULT_BLOCK_SIZE};
use crate::svd::{FactorizationFailure, Stage, SvdError, SvdResult, TruncatedSVD};

pub const DEFAULT_OVERSAMPLES: usize = 10;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_MAX_SVD_ITERATIONS: usize = 10_000;
pub const DEFAULT_POWER_ITERATIONS: usize = 2;

/// Approximates the top `rank` singular triplets of `a` with `n_power_iterations` refinement
/// passes, using the default oversampling and retry policy.
///
/// The sketch is drawn from `rng`; pass a seeded generator for reproducible output.
pub fn approx_svd<R: Rng + ?Sized>(
    a: ArrayView2<f64>,
    rank: usize,
    n_power_iterations: usize,
    rng: &mut R,
) -> SvdResult<TruncatedSVD> {
    ApproxSVD::new(rank, n_power_iterations).compute(a, rng)
}

/// [`approx_svd`] with a `ChaCha8Rng` seeded from `seed`.
pub fn approx_svd_seeded(
    a: ArrayView2<f64>,
    rank: usize,
    n_power_iterations: usize,
    seed: u64,
) -> SvdResult<TruncatedSVD> {
    ApproxSVD::new(rank, n_power_iterations).compute_seeded(a, SketchSeed::Fixed(seed))
}

/// Randomized truncated SVD solver.
///
/// Holds configuration only; every call to [`compute`](ApproxSVD::compute) is independent.
#[derive(Debug, Clone)]
pub struct ApproxSVD {
    rank: usize,
    n_power_iterations: usize,
    n_oversamples: usize,
    max_retries: usize,
    max_svd_iterations: usize,
    block_size: usize,
    thread_pool: Option<Arc<ThreadPool>>,
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    rows: usize,
    cols: usize,
    sketch_width: usize,
    number: usize,
}

impl Attempt {
    fn failed(self, stage: Stage) -> impl FnOnce(FactorizationFailure) -> SvdError {
        move |cause| SvdError::NumericalFailure {
            stage,
            rows: self.rows,
            cols: self.cols,
            sketch_width: self.sketch_width,
            attempts: self.number,
            cause,
        }
    }
}

impl ApproxSVD {
    /// Solver with default oversampling, retries and tiling.
    pub fn new(rank: usize, n_power_iterations: usize) -> Self {
        ApproxSVDBuilder::new()
            .rank(rank)
            .n_power_iterations(n_power_iterations)
            .build()
    }

    pub fn builder() -> ApproxSVDBuilder {
        ApproxSVDBuilder::new()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_power_iterations(&self) -> usize {
        self.n_power_iterations
    }

    pub fn n_oversamples(&self) -> usize {
        self.n_oversamples
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Number of sketch columns used for an `rows x cols` input.
    pub fn sketch_width(&self, rows: usize, cols: usize) -> usize {
        self.rank
            .saturating_add(self.n_oversamples)
            .min(rows.min(cols))
    }

    /// Computes the truncated SVD of `a`, drawing sketches from `rng`.
    ///
    /// # Errors
    /// - [`SvdError::InvalidArgument`]: empty input, `rank` outside `1..=min(n, d)`, or a
    ///   NaN/infinite entry
    /// - [`SvdError::NumericalFailure`]: a factorization failed on every one of the
    ///   `1 + max_retries` sketches
    /// - [`SvdError::ResourceExhaustion`]: a working buffer could not be allocated
    pub fn compute<R: Rng + ?Sized>(
        &self,
        a: ArrayView2<f64>,
        rng: &mut R,
    ) -> SvdResult<TruncatedSVD> {
        self.validate(a)?;

        let (rows, cols) = a.dim();
        let sketch_width = self.sketch_width(rows, cols);
        debug!(
            "Randomized SVD: {}x{} input, rank {}, sketch width {}, {} power iterations",
            rows, cols, self.rank, sketch_width, self.n_power_iterations
        );

        let mut number = 0;
        loop {
            number += 1;
            let attempt = Attempt {
                rows,
                cols,
                sketch_width,
                number,
            };

            match self.solve(a, attempt, &mut *rng) {
                Ok(svd) => {
                    debug!(
                        "Randomized SVD done after {} attempt(s), leading singular value {:.6e}",
                        number,
                        svd.s().get(0).copied().unwrap_or(0.0)
                    );
                    return Ok(svd);
                }
                Err(err) if err.is_retryable() && number <= self.max_retries => {
                    warn!("{}; retrying with a fresh sketch", err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// [`compute`](ApproxSVD::compute) with a generator built from `seed`.
    pub fn compute_seeded(
        &self,
        a: ArrayView2<f64>,
        seed: SketchSeed,
    ) -> SvdResult<TruncatedSVD> {
        let mut rng = seed.rng();
        self.compute(a, &mut rng)
    }

    /// [`compute`](ApproxSVD::compute) with a child generator forked from a shared source.
    pub fn compute_shared(
        &self,
        a: ArrayView2<f64>,
        shared: &SharedSketchRng,
    ) -> SvdResult<TruncatedSVD> {
        let mut rng = shared.fork();
        self.compute(a, &mut rng)
    }

    fn validate(&self, a: ArrayView2<f64>) -> SvdResult<()> {
        let (rows, cols) = a.dim();
        let invalid = |reason: String| SvdError::InvalidArgument { rows, cols, reason };

        if rows == 0 || cols == 0 {
            return Err(invalid("input matrix is empty".to_string()));
        }
        if self.rank == 0 {
            return Err(invalid("rank must be at least 1".to_string()));
        }
        if self.rank > rows.min(cols) {
            return Err(invalid(format!(
                "rank {} exceeds min(rows, cols) = {}",
                self.rank,
                rows.min(cols)
            )));
        }
        if let Some((i, j)) = a.first_non_finite() {
            return Err(invalid(format!(
                "non-finite value {} at ({}, {})",
                a[[i, j]],
                i,
                j
            )));
        }
        Ok(())
    }

    fn solve<R: Rng + ?Sized>(
        &self,
        a: ArrayView2<f64>,
        attempt: Attempt,
        rng: &mut R,
    ) -> SvdResult<TruncatedSVD> {
        let pool = self.thread_pool.as_deref();
        let bs = self.block_size;
        let k = self.rank;

        let omega = gaussian_sketch(rng, attempt.cols, attempt.sketch_width)?;
        let y = parallel::mat_mul("range sketch", a, omega.view(), bs, pool)?;
        let mut q = orthonormalize(y).map_err(attempt.failed(Stage::RangeSketch))?;

        for i in 1..=self.n_power_iterations {
            let z = parallel::mat_t_mul("corange sketch", a, q.view(), bs, pool)?;
            let q_co = orthonormalize(z).map_err(attempt.failed(Stage::CorangeIteration(i)))?;

            let y = parallel::mat_mul("range sketch", a, q_co.view(), bs, pool)?;
            q = orthonormalize(y).map_err(attempt.failed(Stage::RangeIteration(i)))?;
            trace!("power iteration {}/{} done", i, self.n_power_iterations);
        }

        // B = Q^T A, formed as (A^T Q)^T so the product tiles like the others
        let b = parallel::mat_t_mul("projected matrix", a, q.view(), bs, pool)?.reversed_axes();
        if !b.is_finite() {
            return Err(attempt.failed(Stage::Projection)(FactorizationFailure::NonFinite {
                rows: b.nrows(),
                cols: b.ncols(),
            }));
        }

        let small = exact::SVD::compute(b, self.max_svd_iterations)
            .map_err(attempt.failed(Stage::SmallSvd))?;

        let u = q.dot(&small.u().slice(s![.., ..k]));
        let singular_values = small.s().slice(s![..k]).mapv(|v| v.max(0.0));
        let v = small.vt().slice(s![..k, ..]).t().to_owned();
        let (u, v) = flip_signs(u, v);

        Ok(TruncatedSVD::new(u, singular_values, v))
    }
}

/// Flips each singular pair so the largest-magnitude entry of the `u` column is positive.
fn flip_signs(mut u: Array2<f64>, mut v: Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    for j in 0..u.ncols() {
        let (pivot, _) = u
            .column(j)
            .iter()
            .enumerate()
            .fold((0, 0.0f64), |best, (i, &x)| {
                if x.abs() > best.1 {
                    (i, x.abs())
                } else {
                    best
                }
            });

        if u[[pivot, j]] < 0.0 {
            u.column_mut(j).mapv_inplace(|x| -x);
            v.column_mut(j).mapv_inplace(|x| -x);
        }
    }
    (u, v)
}

/// Builder for [`ApproxSVD`].
///
/// # Example Usage
/// ```ignore
/// let solver = ApproxSVDBuilder::new()
///     .rank(300)
///     .n_power_iterations(2)
///     .n_oversamples(10)
///     .build();
/// let svd = solver.compute_seeded(faces.view(), SketchSeed::Fixed(42))?;
/// ```
#[derive(Debug, Clone)]
pub struct ApproxSVDBuilder {
    rank: usize,
    n_power_iterations: usize,
    n_oversamples: usize,
    max_retries: usize,
    max_svd_iterations: usize,
    block_size: usize,
    thread_pool: Option<Arc<ThreadPool>>,
}

impl Default for ApproxSVDBuilder {
    fn default() -> Self {
        Self {
            rank: 1,
            n_power_iterations: DEFAULT_POWER_ITERATIONS,
            n_oversamples: DEFAULT_OVERSAMPLES,
            max_retries: DEFAULT_MAX_RETRIES,
            max_svd_iterations: DEFAULT_MAX_SVD_ITERATIONS,
            block_size: DEFAULT_BLOCK_SIZE,
            thread_pool: None,
        }
    }
}

impl ApproxSVDBuilder {
    /// Creates a new builder with default parameters.
    ///
    /// Default values:
    /// - `rank`: 1
    /// - `n_power_iterations`: 2
    /// - `n_oversamples`: 10
    /// - `max_retries`: 3
    /// - `max_svd_iterations`: 10 000
    /// - `block_size`: 256 rows/columns per tile
    /// - `thread_pool`: none (rayon's global pool)
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of singular triplets to keep. Must not exceed `min(n, d)` of the input.
    pub fn rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    /// Refinement passes; 0 is a single random projection.
    pub fn n_power_iterations(mut self, n_power_iterations: usize) -> Self {
        self.n_power_iterations = n_power_iterations;
        self
    }

    /// Extra sketch columns beyond the rank, discarded before returning.
    pub fn n_oversamples(mut self, n_oversamples: usize) -> Self {
        self.n_oversamples = n_oversamples;
        self
    }

    /// Fresh sketches to try after a numerical failure before giving up.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_svd_iterations(mut self, max_svd_iterations: usize) -> Self {
        self.max_svd_iterations = max_svd_iterations;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Runs all parallel products inside `pool` instead of the global pool.
    pub fn thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    pub fn build(self) -> ApproxSVD {
        ApproxSVD {
            rank: self.rank,
            n_power_iterations: self.n_power_iterations,
            n_oversamples: self.n_oversamples,
            max_retries: self.max_retries,
            max_svd_iterations: self.max_svd_iterations,
            block_size: self.block_size,
            thread_pool: self.thread_pool,
        }
    }
}
