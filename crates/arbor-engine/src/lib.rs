//! # arbor-engine
//!
//! The "narrow waist" of the arbor stack. Defines the model collaborator traits
//! ([`LanguageModel`], [`ModelLoader`]) and the conversation data model that every
//! other crate depends on. Backends can be swapped without touching the sampler,
//! the generation loop, the branch store or the server.
//!
//! ## Design Notes
//!
//! ### Interior Mutability
//! `LanguageModel` methods take `&self` so one loaded model can be shared between a
//! session and its generation task. Backends holding mutable state (KV caches,
//! lazily built vocabularies) are responsible for their own synchronization.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.

pub mod history;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use history::{History, HistoryError, Item, MessageTurn, RankedAlternative, StepResult};

pub type Result<T> = std::result::Result<T, EngineError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Top-level error type for all model collaborator operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("invalid model request: {0}")]
    Validation(String),
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Weight format requested when loading a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantization {
    /// Load whatever precision the checkpoint ships with.
    Native,
    #[default]
    Float16,
    BFloat16,
    Int8,
    Int4,
    /// Single-file GGUF checkpoint; requires [`ModelSpec::extra_file`].
    Gguf,
}

impl FromStr for Quantization {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "native" => Ok(Quantization::Native),
            "float16" | "fp16" => Ok(Quantization::Float16),
            "bfloat16" | "bf16" => Ok(Quantization::BFloat16),
            "int8" => Ok(Quantization::Int8),
            "int4" => Ok(Quantization::Int4),
            "gguf" => Ok(Quantization::Gguf),
            other => Err(EngineError::Validation(format!(
                "unknown quantization `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantization::Native => write!(f, "native"),
            Quantization::Float16 => write!(f, "float16"),
            Quantization::BFloat16 => write!(f, "bfloat16"),
            Quantization::Int8 => write!(f, "int8"),
            Quantization::Int4 => write!(f, "int4"),
            Quantization::Gguf => write!(f, "gguf"),
        }
    }
}

/// Specification for loading a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub model_id: i64,
    pub quantization: Quantization,
    /// Checkpoint file inside the model directory (GGUF only).
    pub extra_file: Option<String>,
}

impl ModelSpec {
    pub fn new(model_id: i64, quantization: Quantization) -> Self {
        Self {
            model_id,
            quantization,
            extra_file: None,
        }
    }

    pub fn with_extra_file(mut self, file: impl Into<String>) -> Self {
        self.extra_file = Some(file.into());
        self
    }

    /// Check quantization-specific requirements before any loading work starts.
    pub fn validate(&self) -> Result<()> {
        let missing_file = self
            .extra_file
            .as_deref()
            .map_or(true, |f| f.trim().is_empty());
        if self.quantization == Quantization::Gguf && missing_file {
            return Err(EngineError::Validation(
                "gguf_file_name must be provided when loading a GGUF model".to_string(),
            ));
        }
        Ok(())
    }
}

/// Facts about a loaded model, reported to the client at session start.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    /// Host memory attributed to the load, in GiB.
    pub estimated_ram: f64,
    /// Device memory attributed to the load, in GiB.
    pub estimated_vram: f64,
    /// Maximum context length in tokens.
    pub max_context_length: usize,
}

/// One role-tagged message, as handed to a chat template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A loaded language model: the only capability the generation loop needs.
///
/// Implementations provide tokenization and raw next-step scores. Sampling,
/// stopping and streaming all live above this trait.
pub trait LanguageModel: Send + Sync {
    /// Static facts about the loaded model.
    fn info(&self) -> &ModelInfo;

    /// Convert text into a sequence of token IDs.
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Convert token IDs back into text.
    fn detokenize(&self, tokens: &[TokenId]) -> Result<String>;

    /// Raw scores (logits) over the vocabulary for the token following `tokens`.
    fn next_scores(&self, tokens: &[TokenId]) -> Result<Vec<f32>>;

    /// Token that signals natural completion of a generation.
    fn end_marker(&self) -> TokenId;

    /// Render a chat prompt with the model's own template, if it has one.
    fn chat_template(&self, _messages: &[ChatMessage]) -> Option<String> {
        None
    }
}

/// Shared handle to a loaded model. Passed explicitly to everything that needs it.
pub type ModelHandle = Arc<dyn LanguageModel>;

/// Resolves a [`ModelSpec`] into a loaded model.
///
/// The model metadata store and the weight loading machinery live behind this
/// trait; arbor only relies on `NotFound` for unknown ids and `Validation` for
/// malformed specs.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle>;
}
