//! # arbor-sampling
//!
//! Near-miss sampling for arbor.
//!
//! Every step produces a small ranked list instead of a single token:
//! - Temperature scaling and softmax over the raw scores
//! - A probability floor (`min_prob`) that zeroes the long tail
//! - `k` weighted draws without replacement from what survives
//! - The first draw is the committed token; the other draws are the alternatives a
//!   user can pick from, sorted by descending probability
//! - Deterministic seeded RNG for reproducible generation

/// Sampling error type.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingError {
    InvalidScores,
    InvalidTemperature,
    InvalidMinProb,
    InvalidTopK,
    EmptyDistribution,
}

impl std::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingError::InvalidScores => write!(f, "Invalid score array"),
            SamplingError::InvalidTemperature => write!(f, "Temperature must be > 0"),
            SamplingError::InvalidMinProb => write!(f, "min_prob must be in [0, 1)"),
            SamplingError::InvalidTopK => write!(f, "k must be at least 1"),
            SamplingError::EmptyDistribution => {
                write!(f, "No probability mass left after min_prob filtering")
            }
        }
    }
}

impl std::error::Error for SamplingError {}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Deterministic RNG for reproducible sampling.
///
/// Uses a simple xorshift64 algorithm for fast, reproducible random numbers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generate next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// One drawn vocabulary index and its filtered probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub probability: f32,
}

/// Sampling configuration and strategy.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Temperature for softmax scaling. > 1.0 = more random, < 1.0 = more deterministic.
    pub temperature: f32,

    /// Number of distinct candidates drawn per step.
    pub k: usize,

    /// Probabilities at or below this floor are never drawn.
    pub min_prob: f32,

    /// RNG state for reproducible sampling. Mutated on each call.
    rng: SeededRng,
}

impl Sampler {
    /// Create a sampler with the defaults used by interactive sessions.
    pub fn new() -> Self {
        Self {
            temperature: 1.0,
            k: 10,
            min_prob: 0.001,
            rng: SeededRng::new(42),
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_min_prob(mut self, min_prob: f32) -> Self {
        self.min_prob = min_prob;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SeededRng::new(seed);
        self
    }

    /// Rank up to `k` candidates for the next step.
    ///
    /// The first candidate is the committed draw. The rest are sorted by
    /// descending probability. Fewer than `k` candidates come back when fewer
    /// than `k` indices survive the `min_prob` floor.
    pub fn sample(&mut self, scores: &[f32]) -> SamplingResult<Vec<Candidate>> {
        self.validate(scores)?;

        let mut work = scores.to_vec();
        if (self.temperature - 1.0).abs() > 1e-6 {
            for score in &mut work {
                *score /= self.temperature;
            }
        }

        let probs = Self::apply_min_prob(&Self::softmax(&work), self.min_prob);
        let total: f32 = probs.iter().sum();
        if total.is_nan() || total <= 0.0 {
            return Err(SamplingError::EmptyDistribution);
        }

        let drawn = self.draw_without_replacement(&probs, self.k);
        let (committed, rest) = drawn
            .split_first()
            .ok_or(SamplingError::EmptyDistribution)?;

        let mut rest: Vec<Candidate> = rest
            .iter()
            .filter(|c| c.probability > 0.0)
            .copied()
            .collect();
        rest.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut ranked = Vec::with_capacity(rest.len() + 1);
        ranked.push(*committed);
        ranked.extend(rest);
        Ok(ranked)
    }

    fn validate(&self, scores: &[f32]) -> SamplingResult<()> {
        if scores.is_empty() {
            return Err(SamplingError::InvalidScores);
        }
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(SamplingError::InvalidTemperature);
        }
        if !(0.0..1.0).contains(&self.min_prob) {
            return Err(SamplingError::InvalidMinProb);
        }
        if self.k == 0 {
            return Err(SamplingError::InvalidTopK);
        }
        Ok(())
    }

    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();

        if sum > 0.0 {
            exps.iter().map(|&e| e / sum).collect()
        } else {
            vec![1.0 / logits.len() as f32; logits.len()]
        }
    }

    fn apply_min_prob(probs: &[f32], min_prob: f32) -> Vec<f32> {
        probs
            .iter()
            .map(|&p| if p > min_prob { p } else { 0.0 })
            .collect()
    }

    /// Weighted draws without replacement. Each drawn index leaves the pool, so
    /// the loop ends early once the positive support is exhausted.
    fn draw_without_replacement(&mut self, probs: &[f32], k: usize) -> Vec<Candidate> {
        let mut weights = probs.to_vec();
        let mut drawn = Vec::with_capacity(k.min(probs.len()));

        for _ in 0..k {
            let remaining: f32 = weights.iter().sum();
            if remaining.is_nan() || remaining <= 0.0 {
                break;
            }
            let Some(index) = self.draw_index(&weights, remaining) else {
                break;
            };
            drawn.push(Candidate {
                index,
                probability: probs[index],
            });
            weights[index] = 0.0;
        }

        drawn
    }

    fn draw_index(&mut self, weights: &[f32], remaining: f32) -> Option<usize> {
        let r = self.rng.next_f32() * remaining;
        let mut cumsum = 0.0;

        for (i, &w) in weights.iter().enumerate() {
            if w <= 0.0 {
                continue;
            }
            cumsum += w;
            if r < cumsum {
                return Some(i);
            }
        }

        // Rounding can leave r just past the final bucket
        weights.iter().rposition(|&w| w > 0.0)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}
