//! Per-session generation parameters and the chat modes a session can run in.

use std::fmt;
use std::time::Duration;

use arbor_engine::{ChatMessage, History, LanguageModel};
use arbor_generation::GenerationBudget;
use arbor_sampling::Sampler;
use serde_json::Value;

use crate::error::ServerError;

/// How the prompt is built from the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMode {
    /// Role-tagged conversation; steps go into an assistant turn.
    Chat,
    /// Raw continuation of the last turn's text.
    TextGeneration,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Chat => "chat",
            ChatMode::TextGeneration => "text_generation",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `ChangeConfig` value after parsing: integer first, then float, then text.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ConfigValue {
    pub fn parse(raw: &Value) -> Result<Self, ServerError> {
        match raw {
            Value::Number(n) => n
                .as_i64()
                .map(ConfigValue::Integer)
                .or_else(|| n.as_f64().map(ConfigValue::Float))
                .ok_or_else(|| ServerError::InvalidRequest(format!("unsupported number {n}"))),
            Value::String(s) => Ok(Self::parse_str(s)),
            other => Err(ServerError::InvalidRequest(format!(
                "config_value must be a string or a number, got {other}"
            ))),
        }
    }

    pub fn parse_str(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            ConfigValue::Integer(i)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            ConfigValue::Float(f)
        } else {
            ConfigValue::Text(raw.to_string())
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Text(_) => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Text parameters accept numbers too and keep their written form.
    fn into_text(self) -> String {
        match self {
            ConfigValue::Integer(i) => i.to_string(),
            ConfigValue::Float(f) => f.to_string(),
            ConfigValue::Text(s) => s,
        }
    }
}

/// Generation settings a session starts with and a client can change.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_new_tokens: usize,
    /// Total sequence cap; overrides `max_new_tokens` when set.
    pub max_length: Option<usize>,
    pub min_prob: f32,
    pub k: usize,
    /// Fixed sampler seed. `None` seeds each session randomly.
    pub seed: Option<u64>,
    pub user_role: String,
    pub ai_role: String,
    pub system_prompt: String,
    pub turn_timeout: Option<Duration>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_new_tokens: 50,
            max_length: None,
            min_prob: 0.001,
            k: 10,
            seed: None,
            user_role: "user".to_string(),
            ai_role: "assistant".to_string(),
            system_prompt: "You are a helpful assistant".to_string(),
            turn_timeout: None,
        }
    }
}

impl GenerationParams {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_min_prob(mut self, min_prob: f32) -> Self {
        self.min_prob = min_prob;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    /// Check the values `apply` would have rejected. Used for startup defaults.
    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |name: &str, why: &str| ServerError::InvalidRequest(format!("{name}: {why}"));
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(invalid("temperature", "must be > 0"));
        }
        if !(0.0..1.0).contains(&self.min_prob) {
            return Err(invalid("min_prob", "must be in [0, 1)"));
        }
        if self.k == 0 {
            return Err(invalid("k", "must be at least 1"));
        }
        if self.max_new_tokens == 0 {
            return Err(invalid("max_new_tokens", "must be at least 1"));
        }
        Ok(())
    }

    /// Apply a `ChangeConfig` request. Nothing changes when the value is rejected.
    pub fn apply(&mut self, name: &str, value: ConfigValue) -> Result<(), ServerError> {
        let invalid = |why: &str| ServerError::InvalidRequest(format!("{name}: {why}"));

        match name {
            "temperature" => {
                let t = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !(t > 0.0 && t.is_finite()) {
                    return Err(invalid("must be > 0"));
                }
                self.temperature = t as f32;
            }
            "min_prob" => {
                let p = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
                if !(0.0..1.0).contains(&p) {
                    return Err(invalid("must be in [0, 1)"));
                }
                self.min_prob = p as f32;
            }
            "max_new_tokens" => {
                self.max_new_tokens =
                    positive(&value).ok_or_else(|| invalid("expected an integer >= 1"))?;
            }
            "k" => {
                self.k = positive(&value).ok_or_else(|| invalid("expected an integer >= 1"))?;
            }
            "max_length" => {
                let n = value
                    .as_i64()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| invalid("expected a non-negative integer"))?;
                self.max_length = (n > 0).then_some(n as usize);
            }
            "seed" => {
                let n = value.as_i64().ok_or_else(|| invalid("expected an integer"))?;
                self.seed = Some(n as u64);
            }
            "user_role" => {
                self.user_role = non_empty(value).ok_or_else(|| invalid("must not be empty"))?;
            }
            "ai_role" => {
                self.ai_role = non_empty(value).ok_or_else(|| invalid("must not be empty"))?;
            }
            "system_prompt" => self.system_prompt = value.into_text(),
            other => {
                return Err(ServerError::InvalidRequest(format!(
                    "unknown config name `{other}`"
                )))
            }
        }
        Ok(())
    }

    /// Sampler settings for the next generation. The RNG state comes from `base`.
    pub fn sampler(&self, base: &Sampler) -> Sampler {
        base.clone()
            .with_temperature(self.temperature)
            .with_k(self.k)
            .with_min_prob(self.min_prob)
    }

    pub fn budget(&self) -> GenerationBudget {
        GenerationBudget {
            max_new_tokens: self.max_new_tokens,
            max_length: self.max_length,
            turn_timeout: self.turn_timeout,
        }
    }

    /// Build the model prompt for `history` in the given mode.
    pub fn prompt(&self, mode: ChatMode, model: &dyn LanguageModel, history: &History) -> String {
        match mode {
            ChatMode::TextGeneration => history.last().map(|t| t.flatten()).unwrap_or_default(),
            ChatMode::Chat => self.chat_prompt(model, history),
        }
    }

    fn chat_prompt(&self, model: &dyn LanguageModel, history: &History) -> String {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::new("system", self.system_prompt.clone()));
        }
        messages.extend(
            history
                .turns()
                .iter()
                .map(|turn| ChatMessage::new(turn.source.clone(), turn.flatten())),
        );

        if let Some(rendered) = model.chat_template(&messages) {
            return rendered;
        }

        let mut prompt = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content.trim_start()))
            .collect::<Vec<_>>()
            .join("\n");
        let answering = history.last().is_some_and(|t| t.source == self.ai_role);
        if !answering {
            if !prompt.is_empty() {
                prompt.push('\n');
            }
            prompt.push_str(&self.ai_role);
            prompt.push(':');
        }
        prompt
    }
}

fn positive(value: &ConfigValue) -> Option<usize> {
    value.as_i64().filter(|n| *n >= 1).map(|n| n as usize)
}

fn non_empty(value: ConfigValue) -> Option<String> {
    let text = value.into_text();
    (!text.trim().is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_engine::{Item, MessageTurn, ModelInfo, Result as EngineResult, TokenId};

    struct NoTemplate(ModelInfo);

    impl LanguageModel for NoTemplate {
        fn info(&self) -> &ModelInfo {
            &self.0
        }
        fn tokenize(&self, _text: &str) -> EngineResult<Vec<TokenId>> {
            Ok(vec![])
        }
        fn detokenize(&self, _tokens: &[TokenId]) -> EngineResult<String> {
            Ok(String::new())
        }
        fn next_scores(&self, _tokens: &[TokenId]) -> EngineResult<Vec<f32>> {
            Ok(vec![0.0])
        }
        fn end_marker(&self) -> TokenId {
            0
        }
    }

    fn model() -> NoTemplate {
        NoTemplate(ModelInfo {
            name: "t".into(),
            estimated_ram: 0.0,
            estimated_vram: 0.0,
            max_context_length: 16,
        })
    }

    #[test]
    fn config_values_parse_integer_then_float_then_text() {
        assert_eq!(ConfigValue::parse_str("12"), ConfigValue::Integer(12));
        assert_eq!(ConfigValue::parse_str("0.5"), ConfigValue::Float(0.5));
        assert_eq!(
            ConfigValue::parse_str("narrator"),
            ConfigValue::Text("narrator".into())
        );
        assert_eq!(
            ConfigValue::parse(&serde_json::json!(3)).unwrap(),
            ConfigValue::Integer(3)
        );
        assert!(ConfigValue::parse(&serde_json::json!(true)).is_err());
    }

    #[test]
    fn apply_updates_named_parameter() {
        let mut params = GenerationParams::default();
        params.apply("temperature", ConfigValue::Float(0.5)).unwrap();
        params.apply("k", ConfigValue::Integer(3)).unwrap();
        params.apply("max_length", ConfigValue::Integer(64)).unwrap();
        params.apply("ai_role", ConfigValue::Text("bot".into())).unwrap();
        assert_eq!(params.temperature, 0.5);
        assert_eq!(params.k, 3);
        assert_eq!(params.max_length, Some(64));
        assert_eq!(params.ai_role, "bot");

        params.apply("max_length", ConfigValue::Integer(0)).unwrap();
        assert_eq!(params.max_length, None);
    }

    #[test]
    fn apply_rejects_bad_values_without_changes() {
        let mut params = GenerationParams::default();
        let before = params.clone();
        assert!(params.apply("temperature", ConfigValue::Integer(0)).is_err());
        assert!(params.apply("min_prob", ConfigValue::Float(1.0)).is_err());
        assert!(params.apply("k", ConfigValue::Float(2.5)).is_err());
        assert!(params.apply("max_new_tokens", ConfigValue::Text("lots".into())).is_err());
        assert!(params.apply("user_role", ConfigValue::Text("  ".into())).is_err());
        assert!(params.apply("top_p", ConfigValue::Float(0.9)).is_err());
        assert_eq!(params, before);
    }

    #[test]
    fn validate_catches_unusable_defaults() {
        assert!(GenerationParams::default().validate().is_ok());
        for bad in [
            GenerationParams::default().with_temperature(0.0),
            GenerationParams::default().with_temperature(f32::NAN),
            GenerationParams::default().with_k(0),
            GenerationParams::default().with_min_prob(1.0),
            GenerationParams::default().with_min_prob(-0.1),
            GenerationParams::default().with_max_new_tokens(0),
        ] {
            let err = bad.validate().unwrap_err();
            assert!(err.is_validation(), "{err}");
        }
    }

    #[test]
    fn text_mode_prompt_is_last_turn() {
        let history = History::from(vec![
            MessageTurn::new("user", vec![Item::literal("first")]),
            MessageTurn::new("user", vec![Item::literal("once"), Item::literal(" upon")]),
        ]);
        let params = GenerationParams::default();
        assert_eq!(
            params.prompt(ChatMode::TextGeneration, &model(), &history),
            "once upon"
        );
        assert_eq!(
            params.prompt(ChatMode::TextGeneration, &model(), &History::new()),
            ""
        );
    }

    #[test]
    fn chat_prompt_adds_assistant_header() {
        let history = History::from(vec![MessageTurn::new("user", vec![Item::literal("hi")])]);
        let params = GenerationParams::default();
        assert_eq!(
            params.prompt(ChatMode::Chat, &model(), &history),
            "system: You are a helpful assistant\nuser: hi\nassistant:"
        );
    }

    #[test]
    fn chat_prompt_continues_partial_answer() {
        let history = History::from(vec![
            MessageTurn::new("user", vec![Item::literal("hi")]),
            MessageTurn::new("assistant", vec![Item::literal("hello")]),
        ]);
        let params = GenerationParams::default().with_system_prompt("");
        assert_eq!(
            params.prompt(ChatMode::Chat, &model(), &history),
            "user: hi\nassistant: hello"
        );
    }
}
