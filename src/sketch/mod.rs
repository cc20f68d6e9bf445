//! # Random Sketches
//!
//! The randomized solver never owns global random state. Callers pass a generator explicitly,
//! or pick one through [`SketchSeed`]:
//! - [`SketchSeed::Fixed`] builds a `ChaCha8Rng` from a `u64` seed; identical inputs give
//!   bit-identical outputs. Use it for tests and reproducible pipelines.
//! - [`SketchSeed::Entropy`] seeds from the thread-local OS-seeded generator; use it in
//!   production.
//!
//! [`SharedSketchRng`] is for one seeded source shared across threads.

use ndarray::Array2;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::svd::{try_zeros, SvdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SketchSeed {
    Fixed(u64),
    #[default]
    Entropy,
}

impl SketchSeed {
    pub fn rng(self) -> ChaCha8Rng {
        match self {
            SketchSeed::Fixed(seed) => ChaCha8Rng::seed_from_u64(seed),
            SketchSeed::Entropy => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, SketchSeed::Fixed(_))
    }
}

impl From<u64> for SketchSeed {
    fn from(seed: u64) -> Self {
        SketchSeed::Fixed(seed)
    }
}

/// Draws a `rows x cols` matrix of independent standard-normal entries, row by row.
pub fn gaussian_sketch<R: Rng + ?Sized>(
    rng: &mut R,
    rows: usize,
    cols: usize,
) -> SvdResult<Array2<f64>> {
    let mut omega = try_zeros("gaussian sketch", rows, cols)?;
    for value in omega.iter_mut() {
        *value = rng.sample(StandardNormal);
    }
    Ok(omega)
}

/// A seeded generator behind a lock, for sharing one source between concurrent solves.
///
/// Each solve takes the lock once and forks a thread-confined child generator from it, so
/// draws of different solves never interleave. With a fixed seed the set of children is
/// reproducible; which solve gets which child follows lock acquisition order.
#[derive(Debug)]
pub struct SharedSketchRng {
    inner: Mutex<ChaCha8Rng>,
}

impl SharedSketchRng {
    pub fn new(seed: SketchSeed) -> Self {
        SharedSketchRng {
            inner: Mutex::new(seed.rng()),
        }
    }

    pub fn fork(&self) -> ChaCha8Rng {
        let mut parent = self.inner.lock();
        ChaCha8Rng::from_rng(&mut *parent)
    }
}
