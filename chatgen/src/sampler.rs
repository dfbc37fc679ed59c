//! Temperature / top-k / top-p sampling over a score vector.
//!
//! Order of operations: temperature scaling, stable softmax, stable ranking,
//! top-k cut, nucleus cut, weighted draw over the kept mass.

use crate::tokenizer::TokenId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Floor applied to the temperature before dividing.
pub const MIN_TEMPERATURE: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    /// 0 disables top-k.
    pub top_k: usize,
    /// Values outside `(0, 1)` disable the nucleus cut.
    pub top_p: f32,
}

impl SamplingParams {
    /// Always picks the highest-scoring id.
    pub fn greedy() -> Self {
        Self {
            temperature: 1.0,
            top_k: 1,
            top_p: 1.0,
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
        }
    }
}

/// Sampler owning its random source.
#[derive(Clone, Debug)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    /// Deterministic sampler for a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    pub fn sample(&mut self, scores: &[f32], params: &SamplingParams) -> Option<TokenId> {
        sample(scores, params, &mut self.rng)
    }
}

/// Pick one id from `scores`. Returns None only when `scores` is empty.
pub fn sample<R: Rng + ?Sized>(
    scores: &[f32],
    params: &SamplingParams,
    rng: &mut R,
) -> Option<TokenId> {
    if scores.is_empty() {
        return None;
    }

    let probs = softmax(scores, params.temperature);
    let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
    // sort_by is stable: equal probabilities keep index order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    if params.top_k > 0 {
        ranked.truncate(params.top_k.min(ranked.len()));
    }

    if params.top_p > 0.0 && params.top_p < 1.0 {
        let mut cumulative = 0.0f32;
        if let Some(cut) = ranked.iter().position(|&(_, p)| {
            cumulative += p;
            cumulative >= params.top_p
        }) {
            ranked.truncate(cut + 1);
        }
    }

    let kept_mass: f32 = ranked.iter().map(|&(_, p)| p).sum();
    let fallback = ranked[0].0 as TokenId;
    if kept_mass <= 0.0 || !kept_mass.is_finite() {
        return Some(fallback);
    }

    let draw = rng.gen::<f32>() * kept_mass;
    let mut cumulative = 0.0f32;
    for &(id, p) in &ranked {
        cumulative += p;
        if cumulative >= draw {
            return Some(id as TokenId);
        }
    }
    Some(fallback)
}

/// Temperature-scaled, max-shifted softmax. NaN scores count as `-inf`.
fn softmax(scores: &[f32], temperature: f32) -> Vec<f32> {
    let inv_t = 1.0 / temperature.max(MIN_TEMPERATURE);
    let scaled: Vec<f32> = scores
        .iter()
        .map(|&s| {
            if s.is_nan() {
                f32::NEG_INFINITY
            } else {
                s * inv_t
            }
        })
        .collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    if max == f32::INFINITY {
        // infinite scores split the whole mass
        let hits = scaled.iter().filter(|&&s| s == f32::INFINITY).count() as f32;
        return scaled
            .iter()
            .map(|&s| if s == f32::INFINITY { 1.0 / hits } else { 0.0 })
            .collect();
    }
    if max == f32::NEG_INFINITY {
        return vec![0.0; scaled.len()];
    }

    let mut probs: Vec<f32> = scaled.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
    probs
}
