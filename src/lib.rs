pub mod dense;
pub mod dimred;
pub mod sketch;
pub mod svd;

pub use dense::DenseMatrixExt;
pub use dimred::pca::{Pca, PcaBuilder};
pub use sketch::{SharedSketchRng, SketchSeed};
pub use svd::{
    approx_svd, approx_svd_seeded, ApproxSVD, ApproxSVDBuilder, SvdError, SvdResult,
    TruncatedSVD,
};
