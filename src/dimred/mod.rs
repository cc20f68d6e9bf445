//! # Dimensionality Reduction
//!
//! Compresses dense sample matrices into a small orthonormal basis and maps samples into and
//! out of the reduced space.
//!
//! ## Currently Available
//! - **PCA** ([`pca`]): principal components from the randomized SVD, with projection
//!   (`Vᵀ·x`) and reconstruction (`V·z`)
//!
//! ## Algorithm Selection Guide
//! - Raise `n_power_iterations` when the spectrum decays slowly; each pass costs two sweeps
//!   over the data
//! - Leave centering off when the basis should describe raw samples, as when reconstructing
//!   images directly from their representation

pub mod pca;
