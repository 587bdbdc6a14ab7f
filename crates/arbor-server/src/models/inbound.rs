//! Client → server envelopes, discriminated by `type_id`.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ServerError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewMessageRequest {
    pub content: String,
    pub source: String,
    /// Turn to edit, or `-1` to append a new turn.
    pub i: i64,
    pub j: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectWordRequest {
    pub i: usize,
    pub j: usize,
    pub new_word: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeConfigRequest {
    pub config_name: String,
    pub config_value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshWordRequest {
    pub i: usize,
    pub j: usize,
}

/// Every operation a client can request.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    NewMessage(NewMessageRequest),
    SelectWord(SelectWordRequest),
    ChangeConfig(ChangeConfigRequest),
    RefreshWord(RefreshWordRequest),
    ClearMessages,
    StopGeneration,
}

impl Operation {
    pub fn type_id(&self) -> i64 {
        match self {
            Operation::NewMessage(_) => 0,
            Operation::SelectWord(_) => 1,
            Operation::ChangeConfig(_) => 2,
            Operation::RefreshWord(_) => 3,
            Operation::ClearMessages => 4,
            Operation::StopGeneration => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::NewMessage(_) => "new_message",
            Operation::SelectWord(_) => "select_word",
            Operation::ChangeConfig(_) => "change_config",
            Operation::RefreshWord(_) => "refresh_word",
            Operation::ClearMessages => "clear_messages",
            Operation::StopGeneration => "stop_generation",
        }
    }

    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, ServerError> {
        let body: Value = serde_json::from_str(text)
            .map_err(|e| ServerError::InvalidRequest(format!("malformed JSON: {e}")))?;
        Self::from_value(body)
    }

    pub fn from_value(body: Value) -> Result<Self, ServerError> {
        let type_id = body
            .get("type_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ServerError::InvalidRequest("missing or non-integer type_id".into()))?;

        let op = match type_id {
            0 => Operation::NewMessage(fields(body)?),
            1 => Operation::SelectWord(fields(body)?),
            2 => Operation::ChangeConfig(fields(body)?),
            3 => Operation::RefreshWord(fields(body)?),
            4 => Operation::ClearMessages,
            5 => Operation::StopGeneration,
            other => {
                return Err(ServerError::InvalidRequest(format!(
                    "invalid type_id {other}"
                )))
            }
        };
        Ok(op)
    }
}

fn fields<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ServerError> {
    serde_json::from_value(body).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}
