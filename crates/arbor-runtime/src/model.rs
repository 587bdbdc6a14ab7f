//! Deterministic word-level reference model.
//!
//! Scores depend only on the last two tokens of the sequence, hashed through an
//! xorshift mix, so the same context always produces the same distribution. The
//! end marker becomes more likely as the sequence grows, so generations finish on
//! their own well before any realistic budget.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use arbor_engine::{EngineError, LanguageModel, ModelInfo, Result, TokenId};

pub const END_MARKER: &str = "</s>";
pub const UNKNOWN: &str = "<unk>";

const END_MARKER_ID: TokenId = 0;
const UNKNOWN_ID: TokenId = 1;

const WORDS: &[&str] = &[
    "the", "a", "cat", "dog", "bird", "sat", "ran", "flew", "on", "under", "over", "mat",
    "tree", "house", "garden", "quietly", "quickly", "and", "then", "it", "was", "is",
    "warm", "cold", "bright", "morning", "evening", "hello", "hi", "how", "are", "you",
    "I", "am", "fine", "thanks", "today", "story", "once", "upon", "time", "there",
    "lived", "small", "old", "friend", ".", ",", "!", "?",
];

/// Word-level model over a fixed vocabulary.
///
/// Token ids: `0` is the end marker, `1` is the unknown-word token, words follow.
pub struct WordModel {
    info: ModelInfo,
    vocab: Vec<String>,
    index: HashMap<String, TokenId>,
    seed: u64,
    step_delay: Option<Duration>,
}

impl WordModel {
    pub fn new(info: ModelInfo) -> Self {
        let vocab: Vec<String> = [END_MARKER, UNKNOWN]
            .iter()
            .chain(WORDS)
            .map(|w| w.to_string())
            .collect();
        let index = vocab
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as TokenId))
            .collect();
        Self {
            info,
            vocab,
            index,
            seed: 0x9E37_79B9_7F4A_7C15,
            step_delay: None,
        }
    }

    /// Vary the score table between model instances.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sleep this long inside every scoring call, to mimic real inference cost.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn word(&self, token: TokenId) -> Result<&str> {
        usize::try_from(token)
            .ok()
            .and_then(|i| self.vocab.get(i))
            .map(String::as_str)
            .ok_or_else(|| EngineError::Tokenization(format!("invalid token id {token}")))
    }

    fn mix(&self, a: TokenId, b: TokenId, c: usize) -> u64 {
        let mut x = self.seed
            ^ (a as u64).wrapping_mul(0x100_0000_01B3)
            ^ (b as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
            ^ (c as u64).wrapping_mul(0x1656_67B1_9E37_79F9);
        for _ in 0..3 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
        }
        x
    }
}

fn is_punctuation(word: &str) -> bool {
    matches!(word, "." | "," | "!" | "?")
}

impl LanguageModel for WordModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        Ok(text
            .split_whitespace()
            .map(|word| self.index.get(word).copied().unwrap_or(UNKNOWN_ID))
            .collect())
    }

    fn detokenize(&self, tokens: &[TokenId]) -> Result<String> {
        let mut text = String::new();
        for &token in tokens {
            let word = self.word(token)?;
            if !is_punctuation(word) {
                text.push(' ');
            }
            text.push_str(word);
        }
        Ok(text)
    }

    fn next_scores(&self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        if let Some(delay) = self.step_delay {
            thread::sleep(delay);
        }

        let prev = tokens.last().copied().unwrap_or(END_MARKER_ID);
        let prev2 = tokens.len().checked_sub(2).map_or(END_MARKER_ID, |i| tokens[i]);

        let mut scores: Vec<f32> = (0..self.vocab.len())
            .map(|i| {
                let h = self.mix(prev2, prev, i);
                (h >> 40) as f32 / (1u64 << 24) as f32 * 6.0 - 3.0
            })
            .collect();

        scores[UNKNOWN_ID as usize] = -30.0;
        // Never start with the end marker; favour it more the longer the sequence.
        scores[END_MARKER_ID as usize] = if tokens.is_empty() {
            -30.0
        } else {
            -4.0 + tokens.len() as f32 * 0.2
        };
        Ok(scores)
    }

    fn end_marker(&self) -> TokenId {
        END_MARKER_ID
    }
}
