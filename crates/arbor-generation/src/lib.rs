//! # arbor-generation
//!
//! The autoregressive loop: encode prompt → score → sample → feed the committed
//! token back → repeat.
//!
//! [`GenerationStream`] is a lazy, finite iterator over [`StepResult`]s. It stops on
//! the model's end marker, on budget exhaustion, on a passed deadline or when its
//! [`CancellationToken`] fires. Cancellation is cooperative: the token is polled
//! around every model call, never preempting one.
//!
//! The only blocking point is [`LanguageModel::next_scores`]; run the stream on a
//! blocking thread when driving it from async code.

use std::time::{Duration, Instant};

use arbor_engine::{
    EngineError, LanguageModel, ModelHandle, RankedAlternative, StepResult, TokenId,
};
use arbor_sampling::{Candidate, Sampler, SamplingError};
use tokio_util::sync::CancellationToken;

/// Errors that end a generation abnormally.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model error: {0}")]
    Model(#[from] EngineError),
    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Why a stream stopped producing steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The committed token was the model's end marker.
    EndMarker,
    /// The step budget ran out.
    BudgetExhausted,
    /// The cancellation token fired.
    Cancelled,
    /// The per-turn deadline passed.
    DeadlineExceeded,
    /// A model or sampler error ended the stream.
    Failed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndMarker => "end_marker",
            StopReason::BudgetExhausted => "budget_exhausted",
            StopReason::Cancelled => "cancelled",
            StopReason::DeadlineExceeded => "deadline_exceeded",
            StopReason::Failed => "failed",
        }
    }
}

/// How long a stream may run.
#[derive(Debug, Clone, Default)]
pub struct GenerationBudget {
    /// Maximum number of steps when no `max_length` is set.
    pub max_new_tokens: usize,
    /// Total sequence length cap. Overrides `max_new_tokens` with
    /// `max_length - prompt_len` when set.
    pub max_length: Option<usize>,
    /// Wall-clock limit for the whole stream.
    pub turn_timeout: Option<Duration>,
}

impl GenerationBudget {
    pub fn new(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            ..Self::default()
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    /// Number of steps allowed for a prompt of `prompt_len` tokens.
    pub fn max_steps(&self, prompt_len: usize) -> usize {
        match self.max_length {
            Some(max_length) => max_length.saturating_sub(prompt_len),
            None => self.max_new_tokens,
        }
    }
}

/// Lazy sequence of ranked steps. Fused: once it stops it yields `None` forever.
pub struct GenerationStream {
    model: ModelHandle,
    sampler: Sampler,
    tokens: Vec<TokenId>,
    max_steps: usize,
    steps: usize,
    deadline: Option<Instant>,
    cancel: CancellationToken,
    stop: Option<StopReason>,
}

impl GenerationStream {
    /// Encode `prompt` and prepare a stream over its continuation.
    pub fn new(
        model: ModelHandle,
        prompt: &str,
        budget: &GenerationBudget,
        sampler: Sampler,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let tokens = model.tokenize(prompt)?;
        Ok(Self::from_tokens(model, tokens, budget, sampler, cancel))
    }

    /// Prepare a stream over an already encoded prompt.
    pub fn from_tokens(
        model: ModelHandle,
        tokens: Vec<TokenId>,
        budget: &GenerationBudget,
        sampler: Sampler,
        cancel: CancellationToken,
    ) -> Self {
        let max_steps = budget.max_steps(tokens.len());
        tracing::debug!(
            prompt_tokens = tokens.len(),
            max_steps,
            "generation stream prepared"
        );
        Self {
            model,
            sampler,
            tokens,
            max_steps,
            steps: 0,
            deadline: budget.turn_timeout.map(|t| Instant::now() + t),
            cancel,
            stop: None,
        }
    }

    /// Why the stream stopped, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// True only when the model itself ended the sequence.
    pub fn ended_with_end_marker(&self) -> bool {
        self.stop == Some(StopReason::EndMarker)
    }

    /// Number of steps yielded so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// The full token sequence: prompt plus every committed token.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Recover the sampler (and its advanced RNG state) for the next turn.
    pub fn into_sampler(self) -> Sampler {
        self.sampler
    }

    fn finish(&mut self, reason: StopReason) {
        tracing::debug!(steps = self.steps, reason = reason.as_str(), "generation stopped");
        self.stop = Some(reason);
    }

    fn step(&mut self) -> Result<Option<StepResult>> {
        let scores = self.model.next_scores(&self.tokens)?;

        // The call cannot be interrupted; drop its result if we were cancelled meanwhile.
        if self.cancel.is_cancelled() {
            self.finish(StopReason::Cancelled);
            return Ok(None);
        }

        let ranked = self.sampler.sample(&scores)?;
        let committed = ranked[0].index as TokenId;
        if committed == self.model.end_marker() {
            self.finish(StopReason::EndMarker);
            return Ok(None);
        }

        let step = decode_candidates(self.model.as_ref(), &ranked)?;
        self.tokens.push(committed);
        self.steps += 1;
        Ok(Some(step))
    }
}

impl Iterator for GenerationStream {
    type Item = Result<StepResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish(StopReason::Cancelled);
            return None;
        }
        if self.steps >= self.max_steps {
            self.finish(StopReason::BudgetExhausted);
            return None;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.finish(StopReason::DeadlineExceeded);
            return None;
        }

        match self.step() {
            Ok(Some(step)) => Some(Ok(step)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "generation step failed");
                self.finish(StopReason::Failed);
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for GenerationStream {}

/// Run one sampling step over `prompt` without committing anything.
///
/// Unlike the stream this does not treat the end marker specially: a preview shows
/// whatever the model ranks, the end marker's decoded text included.
pub fn preview_step(
    model: &dyn LanguageModel,
    prompt: &str,
    sampler: &mut Sampler,
) -> Result<StepResult> {
    let tokens = model.tokenize(prompt)?;
    let scores = model.next_scores(&tokens)?;
    let ranked = sampler.sample(&scores)?;
    decode_candidates(model, &ranked)
}

fn decode_candidates(model: &dyn LanguageModel, ranked: &[Candidate]) -> Result<StepResult> {
    let alternatives = ranked
        .iter()
        .map(|c| {
            let text = model.detokenize(&[c.index as TokenId])?;
            Ok(RankedAlternative::new(text, c.probability))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StepResult::new(alternatives))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_prefers_max_length() {
        let budget = GenerationBudget::new(50).with_max_length(20);
        assert_eq!(budget.max_steps(12), 8);
        assert_eq!(budget.max_steps(30), 0);
        assert_eq!(GenerationBudget::new(50).max_steps(1000), 50);
    }

    #[test]
    fn stop_reason_names() {
        assert_eq!(StopReason::EndMarker.as_str(), "end_marker");
        assert_eq!(StopReason::Cancelled.as_str(), "cancelled");
    }
}
