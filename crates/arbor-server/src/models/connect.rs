//! Query parameters of the WebSocket handshake.

use arbor_engine::{ModelSpec, Quantization};
use serde::Deserialize;

use crate::error::ServerError;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    pub ai_model_id: i64,
    #[serde(default)]
    pub quantization: Option<String>,
    #[serde(default)]
    pub gguf_file_name: Option<String>,
}

impl ConnectQuery {
    /// Resolve the query into a validated load request. Quantization defaults to
    /// `float16`.
    pub fn to_spec(&self) -> Result<ModelSpec, ServerError> {
        let quantization = match self.quantization.as_deref() {
            Some(q) => q.parse()?,
            None => Quantization::default(),
        };
        let mut spec = ModelSpec::new(self.ai_model_id, quantization);
        if let Some(file) = &self.gguf_file_name {
            spec = spec.with_extra_file(file.clone());
        }
        spec.validate()?;
        Ok(spec)
    }
}
