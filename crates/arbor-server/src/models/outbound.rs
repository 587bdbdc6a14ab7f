//! Server → client events. Serialized as `{"type_id": n, "payload": {...}}`.

use arbor_engine::{ModelInfo, StepResult};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::params::GenerationParams;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModelInfoPayload {
    pub name: String,
    pub estimated_ram: f64,
    pub estimated_vram: f64,
    pub max_length: usize,
    pub max_new_tokens: usize,
    pub temperature: f32,
}

impl ModelInfoPayload {
    pub fn new(info: &ModelInfo, params: &GenerationParams) -> Self {
        Self {
            name: info.name.clone(),
            estimated_ram: info.estimated_ram,
            estimated_vram: info.estimated_vram,
            max_length: params.max_length.unwrap_or(info.max_context_length),
            max_new_tokens: params.max_new_tokens,
            temperature: params.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NewMessagePayload {
    pub source: String,
    pub content: StepResult,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NewMessageEndPayload {
    pub ended_with_end_marker: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RefreshWordPayload {
    pub i: usize,
    pub j: usize,
    pub content: StepResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Error(ErrorPayload),
    ModelInfo(ModelInfoPayload),
    NewMessage(NewMessagePayload),
    NewMessageEnd(NewMessageEndPayload),
    RefreshWord(RefreshWordPayload),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }

    pub fn new_message(source: impl Into<String>, content: StepResult) -> Self {
        ServerEvent::NewMessage(NewMessagePayload {
            source: source.into(),
            content,
        })
    }

    pub fn end(ended_with_end_marker: bool) -> Self {
        ServerEvent::NewMessageEnd(NewMessageEndPayload {
            ended_with_end_marker,
        })
    }

    pub fn type_id(&self) -> i8 {
        match self {
            ServerEvent::Error(_) => -1,
            ServerEvent::ModelInfo(_) => 0,
            ServerEvent::NewMessage(_) => 1,
            ServerEvent::NewMessageEnd(_) => 2,
            ServerEvent::RefreshWord(_) => 3,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for ServerEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ServerEvent", 2)?;
        s.serialize_field("type_id", &self.type_id())?;
        match self {
            ServerEvent::Error(p) => s.serialize_field("payload", p)?,
            ServerEvent::ModelInfo(p) => s.serialize_field("payload", p)?,
            ServerEvent::NewMessage(p) => s.serialize_field("payload", p)?,
            ServerEvent::NewMessageEnd(p) => s.serialize_field("payload", p)?,
            ServerEvent::RefreshWord(p) => s.serialize_field("payload", p)?,
        }
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_engine::RankedAlternative;
    use serde_json::json;

    #[test]
    fn envelope_shape() {
        let event = ServerEvent::new_message(
            "assistant",
            StepResult::new(vec![
                RankedAlternative::new(" cat", 0.75),
                RankedAlternative::new(" dog", 0.25),
            ]),
        );
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type_id": 1,
                "payload": {"source": "assistant", "content": [[" cat", 0.75], [" dog", 0.25]]}
            })
        );
    }

    #[test]
    fn end_and_error_envelopes() {
        assert_eq!(
            serde_json::to_value(ServerEvent::end(true)).unwrap(),
            json!({"type_id": 2, "payload": {"ended_with_end_marker": true}})
        );
        assert_eq!(
            serde_json::to_value(ServerEvent::error("bad")).unwrap(),
            json!({"type_id": -1, "payload": {"message": "bad"}})
        );
    }

    #[test]
    fn model_info_prefers_configured_max_length() {
        let info = ModelInfo {
            name: "m".into(),
            estimated_ram: 0.5,
            estimated_vram: 2.0,
            max_context_length: 4096,
        };
        let params = GenerationParams::default();
        assert_eq!(ModelInfoPayload::new(&info, &params).max_length, 4096);
        let params = params.with_max_length(128);
        let payload = ModelInfoPayload::new(&info, &params);
        assert_eq!(payload.max_length, 128);
        assert_eq!(
            serde_json::to_value(ServerEvent::ModelInfo(payload)).unwrap()["type_id"],
            0
        );
    }
}
