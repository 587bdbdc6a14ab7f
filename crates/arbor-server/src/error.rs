//! Error handling and response mapping.

use arbor_branches::BranchError;
use arbor_engine::{EngineError, HistoryError};
use arbor_generation::GenerationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("model error: {0}")]
    Engine(#[from] EngineError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("invalid edit coordinates: {0}")]
    History(#[from] HistoryError),

    #[error("branch store error: {0}")]
    Branch(#[from] BranchError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("a generation is already running")]
    GenerationBusy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server at capacity")]
    ServiceUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Errors caused by the client's input rather than by the server.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::History(_)
                | ServerError::GenerationBusy
                | ServerError::Engine(EngineError::Validation(_))
                | ServerError::Engine(EngineError::Tokenization(_))
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            _ if self.is_validation() => StatusCode::BAD_REQUEST,
            ServerError::Engine(EngineError::NotFound(_)) | ServerError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServerError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = match status {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::NOT_FOUND => "not_found_error",
            _ => "server_error",
        };
        let message = match &self {
            ServerError::ServiceUnavailable => "Server at capacity, try again later".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "param": null,
                "code": null,
            }
        }));

        (status, body).into_response()
    }
}
