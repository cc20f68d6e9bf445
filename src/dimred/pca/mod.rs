//! # Principal Component Analysis
//!
//! PCA for dense matrices on top of the randomized SVD. The fitted basis `V` (features ×
//! components) maps a sample `x` to its representation `Vᵀ·(x − mean)` and back with
//! `V·z + mean`. Without centering the mean is zero and this is the plain projection onto the
//! top right singular vectors.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::dense::DenseMatrixExt;
use crate::sketch::SketchSeed;
use crate::svd::randomized::DEFAULT_POWER_ITERATIONS;
use crate::svd::{ApproxSVD, ApproxSVDBuilder, DEFAULT_OVERSAMPLES};

/// PCA fitted with [`ApproxSVD`].
///
/// # Features
/// - Optional column centering
/// - Batch and single-sample projection / reconstruction
/// - Explained variance analysis
#[derive(Debug)]
pub struct Pca {
    solver: ApproxSVD,
    center: bool,
    seed: SketchSeed,
    verbose: bool,
    basis: Option<Array2<f64>>,
    singular_values: Option<Array1<f64>>,
    mean: Option<Array1<f64>>,
    explained_variance: Option<Array1<f64>>,
    total_variance: Option<f64>,
}

impl Pca {
    /// Fits the basis to `x` (samples × features).
    ///
    /// # Side Effects
    /// - Stores the basis, singular values and explained variance
    /// - Stores column means (zeros when centering is disabled)
    pub fn fit(&mut self, x: ArrayView2<f64>) -> anyhow::Result<&mut Self> {
        let (n_samples, n_features) = x.dim();

        let mean = if self.center {
            x.mean_axis(Axis(0))
                .ok_or_else(|| anyhow!("Cannot fit PCA on an empty matrix"))?
        } else {
            Array1::zeros(n_features)
        };
        let x_centered = self.preprocess(x, &mean);

        let svd = self
            .solver
            .compute_seeded(x_centered.view(), self.seed)
            .with_context(|| {
                format!(
                    "Randomized SVD failed for {} samples × {} features",
                    n_samples, n_features
                )
            })?;

        let dof = n_samples.saturating_sub(1).max(1) as f64;
        let total_variance = x_centered.iter().map(|v| v * v).sum::<f64>() / dof;
        let (_, s, v) = svd.into_parts();
        let explained_variance = s.mapv(|sv| sv * sv / dof);

        let summary = format!(
            "PCA: {} samples × {} features reduced to {} components ({:.2}% of features), \
             {} power iterations, {:.2}% of variance retained",
            n_samples,
            n_features,
            s.len(),
            (s.len() as f64 / n_features as f64) * 100.0,
            self.solver.n_power_iterations(),
            if total_variance > 0.0 {
                explained_variance.sum() / total_variance * 100.0
            } else {
                0.0
            }
        );
        if self.verbose {
            info!("{}", summary);
        } else {
            debug!("{}", summary);
        }

        self.basis = Some(v);
        self.singular_values = Some(s);
        self.mean = Some(mean);
        self.explained_variance = Some(explained_variance);
        self.total_variance = Some(total_variance);

        Ok(self)
    }

    fn preprocess(&self, x: ArrayView2<f64>, mean: &Array1<f64>) -> Array2<f64> {
        let mut x_preprocessed = x.to_owned();
        if self.center {
            x_preprocessed
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    row -= mean;
                });
        }
        x_preprocessed
    }

    fn fitted(&self) -> anyhow::Result<(&Array2<f64>, &Array1<f64>)> {
        match (&self.basis, &self.mean) {
            (Some(basis), Some(mean)) => Ok((basis, mean)),
            _ => Err(anyhow!("PCA has not been fitted yet")),
        }
    }

    /// Projects samples (samples × features) to the reduced space (samples × components).
    pub fn transform(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        let (basis, mean) = self.fitted()?;
        if x.ncols() != basis.nrows() {
            bail!(
                "Input has {} features, model was fitted on {}",
                x.ncols(),
                basis.nrows()
            );
        }
        let x_preprocessed = self.preprocess(x, mean);
        Ok(x_preprocessed.dot(basis))
    }

    /// Maps representations (samples × components) back to feature space.
    pub fn inverse_transform(&self, z: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        let (basis, mean) = self.fitted()?;
        if z.ncols() != basis.ncols() {
            bail!(
                "Input has {} components, model has {}",
                z.ncols(),
                basis.ncols()
            );
        }
        let mut reconstruction = z.dot(&basis.t());
        if self.center {
            reconstruction += mean;
        }
        Ok(reconstruction)
    }

    /// Representation of a single sample: `Vᵀ·(x − mean)`.
    pub fn project(&self, sample: ArrayView1<f64>) -> anyhow::Result<Array1<f64>> {
        let (basis, mean) = self.fitted()?;
        if sample.len() != basis.nrows() {
            bail!(
                "Sample has {} features, model was fitted on {}",
                sample.len(),
                basis.nrows()
            );
        }
        Ok(basis.t().dot(&(&sample - mean)))
    }

    /// Reconstruction of a single representation: `V·z + mean`.
    pub fn reconstruct(&self, representation: ArrayView1<f64>) -> anyhow::Result<Array1<f64>> {
        let (basis, mean) = self.fitted()?;
        if representation.len() != basis.ncols() {
            bail!(
                "Representation has {} entries, model has {} components",
                representation.len(),
                basis.ncols()
            );
        }
        Ok(basis.dot(&representation) + mean)
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    /// Basis `V`, features × components.
    pub fn basis(&self) -> Option<&Array2<f64>> {
        self.basis.as_ref()
    }

    /// Principal axes as rows, components × features.
    pub fn components(&self) -> Option<ArrayView2<'_, f64>> {
        self.basis.as_ref().map(|b| b.t())
    }

    pub fn singular_values(&self) -> Option<&Array1<f64>> {
        self.singular_values.as_ref()
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    /// Variance captured by each component, `s² / (n − 1)`.
    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance.as_ref()
    }

    /// Total variance of the (centered) training data.
    pub fn total_variance(&self) -> Option<f64> {
        self.total_variance
    }

    /// Share of the total variance captured by each component.
    ///
    /// # Returns
    /// - `Ok(Array1<f64>)`: ratios, summing to at most 1.0 up to rounding
    /// - `Err`: model not fitted, or the training data had zero variance
    pub fn explained_variance_ratio(&self) -> anyhow::Result<Array1<f64>> {
        let (explained_variance, total_variance) =
            match (&self.explained_variance, self.total_variance) {
                (Some(ev), Some(total)) => (ev, total),
                _ => bail!("Model must be fitted first!"),
            };
        if total_variance <= 0.0 {
            bail!("Training data has zero variance");
        }
        Ok(explained_variance.mapv(|v| v / total_variance))
    }

    /// Running sum of [`explained_variance_ratio`](Pca::explained_variance_ratio).
    pub fn cumulative_explained_variance_ratio(&self) -> anyhow::Result<Array1<f64>> {
        let ratios = self.explained_variance_ratio()?;
        let mut cumulative = Array1::zeros(ratios.len());
        let mut sum = 0.0;
        for (i, &ratio) in ratios.iter().enumerate() {
            sum += ratio;
            cumulative[i] = sum;
        }
        Ok(cumulative)
    }

    /// Reconstruction error `‖X − inverse_transform(transform(X))‖_F`.
    pub fn reconstruction_error(&self, x: ArrayView2<f64>) -> anyhow::Result<f64> {
        let z = self.transform(x)?;
        let reconstruction = self.inverse_transform(z.view())?;
        Ok((&x - &reconstruction).frobenius_norm())
    }
}

/// Builder for configuring and creating [`Pca`] instances.
///
/// # Example Usage
/// ```ignore
/// let mut pca = PcaBuilder::new()
///     .n_components(300)
///     .n_power_iterations(2)
///     .random_seed(42)
///     .build();
/// pca.fit(training_faces.view())?;
/// let representation = pca.project(face.view())?;
/// ```
pub struct PcaBuilder {
    n_components: usize,
    n_power_iterations: usize,
    n_oversamples: usize,
    seed: SketchSeed,
    center: bool,
    verbose: bool,
    thread_pool: Option<Arc<ThreadPool>>,
}

impl Default for PcaBuilder {
    fn default() -> Self {
        Self {
            n_components: 50,
            n_power_iterations: DEFAULT_POWER_ITERATIONS,
            n_oversamples: DEFAULT_OVERSAMPLES,
            seed: SketchSeed::Entropy,
            center: false,
            verbose: false,
            thread_pool: None,
        }
    }
}

impl PcaBuilder {
    /// Creates a new builder with default parameters.
    ///
    /// Default values:
    /// - `n_components`: 50
    /// - `n_power_iterations`: 2
    /// - `n_oversamples`: 10
    /// - `seed`: entropy (non-reproducible)
    /// - `center`: false
    /// - `verbose`: false
    pub fn new() -> Self {
        Self::default()
    }

    /// Should not exceed min(n_samples, n_features) of the data passed to `fit`.
    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn n_power_iterations(mut self, n_power_iterations: usize) -> Self {
        self.n_power_iterations = n_power_iterations;
        self
    }

    pub fn n_oversamples(mut self, n_oversamples: usize) -> Self {
        self.n_oversamples = n_oversamples;
        self
    }

    /// Fixes the sketch generator so that fitting is reproducible.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.seed = SketchSeed::Fixed(seed);
        self
    }

    pub fn seed(mut self, seed: SketchSeed) -> Self {
        self.seed = seed;
        self
    }

    /// Sets whether to subtract column means before fitting.
    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    /// Logs the fit summary at info level instead of debug.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    pub fn build(self) -> Pca {
        let mut solver = ApproxSVDBuilder::new()
            .rank(self.n_components)
            .n_power_iterations(self.n_power_iterations)
            .n_oversamples(self.n_oversamples);
        if let Some(pool) = self.thread_pool {
            solver = solver.thread_pool(pool);
        }

        Pca {
            solver: solver.build(),
            center: self.center,
            seed: self.seed,
            verbose: self.verbose,
            basis: None,
            singular_values: None,
            mean: None,
            explained_variance: None,
            total_variance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};

    use super::*;
    use crate::sketch::gaussian_sketch;
    use crate::svd::SvdError;

    fn low_rank_with_offset(rows: usize, cols: usize, rank: usize, seed: u64) -> Array2<f64> {
        let mut rng = SketchSeed::Fixed(seed).rng();
        let l = gaussian_sketch(&mut rng, rows, rank).unwrap();
        let r = gaussian_sketch(&mut rng, rank, cols).unwrap();
        let offset = Array1::linspace(-2.0, 2.0, cols);
        l.dot(&r) + &offset
    }

    #[test]
    fn test_centered_round_trip() {
        let _ = env_logger::builder().is_test(true).try_init();
        // rank 4 around a non-zero mean: centered data is exactly rank 4
        let x = low_rank_with_offset(60, 25, 4, 1);
        let mut pca = PcaBuilder::new()
            .n_components(4)
            .n_power_iterations(3)
            .center(true)
            .random_seed(42)
            .verbose(true)
            .build();

        let z = pca.fit_transform(x.view()).unwrap();
        assert_eq!(z.dim(), (60, 4));

        let back = pca.inverse_transform(z.view()).unwrap();
        assert_abs_diff_eq!((&back - &x).frobenius_norm(), 0.0, epsilon = 1e-8);
        assert!(pca.reconstruction_error(x.view()).unwrap() < 1e-8);

        let ratio_sum = pca.explained_variance_ratio().unwrap().sum();
        assert_abs_diff_eq!(ratio_sum, 1.0, epsilon = 1e-10);

        let cumulative = pca.cumulative_explained_variance_ratio().unwrap();
        assert_abs_diff_eq!(cumulative[3], ratio_sum, epsilon = 1e-12);
        for w in cumulative.windows(2) {
            assert!(w[0] <= w[1]);
        }

        assert_eq!(pca.components().unwrap().dim(), (4, 25));
        assert!(pca.basis().unwrap().orthonormality_error() < 1e-10);
    }

    #[test]
    fn test_project_matches_transform_row() {
        let x = low_rank_with_offset(40, 15, 3, 2);
        let mut pca = PcaBuilder::new()
            .n_components(3)
            .center(true)
            .random_seed(7)
            .build();
        let z = pca.fit_transform(x.view()).unwrap();

        for i in [0, 17, 39] {
            let single = pca.project(x.row(i)).unwrap();
            assert_abs_diff_eq!((&single - &z.row(i)).mapv(f64::abs).sum(), 0.0, epsilon = 1e-10);

            let restored = pca.reconstruct(single.view()).unwrap();
            assert_abs_diff_eq!((&restored - &x.row(i)).mapv(f64::abs).sum(), 0.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_uncentered_basis_reconstructs_row_space() {
        // samples live in span{e0 + e1, e2}; without centering the basis is that span
        let x = array![
            [1.0, 1.0, 0.0, 0.0],
            [2.0, 2.0, 1.0, 0.0],
            [0.0, 0.0, 3.0, 0.0],
            [1.0, 1.0, -1.0, 0.0],
            [4.0, 4.0, 2.0, 0.0]
        ];
        let mut pca = PcaBuilder::new()
            .n_components(2)
            .n_power_iterations(2)
            .random_seed(3)
            .build();
        pca.fit(x.view()).unwrap();

        assert!(pca.mean().unwrap().iter().all(|&m| m == 0.0));

        let sample = array![5.0, 5.0, -2.0, 0.0];
        let representation = pca.project(sample.view()).unwrap();
        let reconstruction = pca.reconstruct(representation.view()).unwrap();
        assert_abs_diff_eq!((&reconstruction - &sample).mapv(f64::abs).sum(), 0.0, epsilon = 1e-10);

        // outside the row space only the in-span part survives
        let off = array![0.0, 0.0, 0.0, 1.0];
        let z = pca.project(off.view()).unwrap();
        assert_abs_diff_eq!(z.mapv(f64::abs).sum(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_not_fitted_errors() {
        let pca = PcaBuilder::new().n_components(2).build();
        let x = Array2::<f64>::zeros((3, 3));

        let err = pca.transform(x.view()).unwrap_err();
        assert!(err.to_string().contains("not been fitted"));
        assert!(pca.project(x.row(0)).is_err());
        assert!(pca.explained_variance_ratio().is_err());
    }

    #[test]
    fn test_shape_mismatch_and_invalid_rank() {
        let x = low_rank_with_offset(20, 6, 2, 4);
        let mut pca = PcaBuilder::new().n_components(2).random_seed(1).build();
        pca.fit(x.view()).unwrap();

        assert!(pca.transform(Array2::<f64>::zeros((2, 5)).view()).is_err());
        assert!(pca.inverse_transform(Array2::<f64>::zeros((2, 3)).view()).is_err());
        assert!(pca.reconstruct(array![1.0].view()).is_err());

        let mut too_many = PcaBuilder::new().n_components(7).random_seed(1).build();
        let err = too_many.fit(x.view()).unwrap_err();
        let root = err.downcast_ref::<SvdError>().expect("SvdError source");
        assert!(matches!(root, SvdError::InvalidArgument { rows: 20, cols: 6, .. }));
    }
}
