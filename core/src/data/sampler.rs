//! Strategies for ordering a dataset.
//!
//! The prefetcher keeps the video records and their shot lists in two parallel vectors. Both are
//! reordered with the *same* permutation drawn from a [`Sampler`], so `records[i]` and
//! `shot_lists[i]` always describe the same video.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// A trait for determining the order of data access.
pub trait Sampler: Send {
    /// Returns a permutation of `0..len`.
    fn sample(&mut self, len: usize) -> Vec<usize>;
}

/// Samples elements sequentially, always in the same order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn sample(&mut self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

/// Samples elements randomly (without replacement) from its own generator.
#[derive(Debug, Clone)]
pub struct ShuffleSampler {
    rng: StdRng,
}

impl ShuffleSampler {
    /// A sampler with a reproducible stream when `seed` is given, OS entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self { rng }
    }
}

impl Sampler for ShuffleSampler {
    fn sample(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut self.rng);
        indices
    }
}

/// Reorders `items` so that `items[i]` becomes the old `items[order[i]]`.
///
/// `order` must be a permutation of `0..items.len()`.
pub fn apply_permutation<T>(items: &mut Vec<T>, order: &[usize]) {
    debug_assert_eq!(items.len(), order.len());
    let mut slots: Vec<Option<T>> = items.drain(..).map(Some).collect();
    items.extend(order.iter().filter_map(|&idx| slots[idx].take()));
}
