//! Fixed model catalog implementing [`ModelLoader`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arbor_engine::{
    EngineError, ModelHandle, ModelInfo, ModelLoader, ModelSpec, Quantization, Result,
};

use crate::model::WordModel;

/// One loadable model.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    /// Parameter count in billions, used for memory estimates.
    pub params_b: f64,
    pub max_context_length: usize,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, params_b: f64, max_context_length: usize) -> Self {
        Self {
            name: name.into(),
            params_b,
            max_context_length,
        }
    }
}

/// Resolves model ids against a catalog and loads [`WordModel`]s.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<i64, CatalogEntry>,
    step_delay: Option<Duration>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog shipped with the server binary.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_entry(1, CatalogEntry::new("arbor-word-small", 0.5, 2048))
            .with_entry(2, CatalogEntry::new("arbor-word-base", 1.5, 4096))
            .with_entry(3, CatalogEntry::new("arbor-word-large", 7.0, 8192))
    }

    pub fn with_entry(mut self, id: i64, entry: CatalogEntry) -> Self {
        self.entries.insert(id, entry);
        self
    }

    /// Apply an artificial per-step delay to every loaded model.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    pub fn entries(&self) -> impl Iterator<Item = (i64, &CatalogEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn get(&self, id: i64) -> Option<&CatalogEntry> {
        self.entries.get(&id)
    }
}

/// Bytes per parameter for a quantization.
fn bytes_per_param(quantization: Quantization) -> f64 {
    match quantization {
        Quantization::Native => 4.0,
        Quantization::Float16 | Quantization::BFloat16 => 2.0,
        Quantization::Int8 => 1.0,
        Quantization::Int4 | Quantization::Gguf => 0.5,
    }
}

/// Memory estimate in GiB: weights on the device, a tenth of that on the host.
fn estimate_memory(entry: &CatalogEntry, quantization: Quantization) -> (f64, f64) {
    let weights_gib = entry.params_b * 1e9 * bytes_per_param(quantization) / (1u64 << 30) as f64;
    (weights_gib * 0.1, weights_gib)
}

#[async_trait::async_trait]
impl ModelLoader for ModelRegistry {
    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle> {
        spec.validate()?;
        let entry = self
            .entries
            .get(&spec.model_id)
            .ok_or_else(|| EngineError::NotFound(format!("no model with id {}", spec.model_id)))?;

        let (estimated_ram, estimated_vram) = estimate_memory(entry, spec.quantization);
        let info = ModelInfo {
            name: entry.name.clone(),
            estimated_ram,
            estimated_vram,
            max_context_length: entry.max_context_length,
        };

        let mut model = WordModel::new(info).with_seed(spec.model_id as u64);
        if let Some(delay) = self.step_delay {
            model = model.with_step_delay(delay);
        }

        tracing::info!(
            model_id = spec.model_id,
            name = %entry.name,
            quantization = %spec.quantization,
            file = spec.extra_file.as_deref().unwrap_or("-"),
            "model loaded"
        );
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_shrinks_estimates() {
        let entry = CatalogEntry::new("m", 1.0, 1024);
        let (_, fp16) = estimate_memory(&entry, Quantization::Float16);
        let (_, int4) = estimate_memory(&entry, Quantization::Int4);
        assert!((fp16 / int4 - 4.0).abs() < 1e-9);
    }

    #[test]
    fn defaults_are_listed_in_id_order() {
        let ids: Vec<i64> = ModelRegistry::with_defaults().entries().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
