//! Loading through the registry and driving the loaded model end to end.

use arbor_engine::{EngineError, LanguageModel, ModelLoader, ModelSpec, Quantization};
use arbor_runtime::{CatalogEntry, ModelRegistry};

#[tokio::test]
async fn loads_known_model() {
    let registry = ModelRegistry::with_defaults();
    let model = registry
        .load(&ModelSpec::new(1, Quantization::Float16))
        .await
        .unwrap();

    assert_eq!(model.info().name, "arbor-word-small");
    assert_eq!(model.info().max_context_length, 2048);
    assert!(model.info().estimated_vram > model.info().estimated_ram);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let registry = ModelRegistry::with_defaults();
    let err = registry
        .load(&ModelSpec::new(99, Quantization::Float16))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn gguf_without_file_is_rejected_before_lookup() {
    // Validation runs first, even for ids the catalog does not know.
    let registry = ModelRegistry::with_defaults();
    let err = registry
        .load(&ModelSpec::new(99, Quantization::Gguf))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Validation(_)));

    let ok = registry
        .load(&ModelSpec::new(2, Quantization::Gguf).with_extra_file("base.Q4_K_M.gguf"))
        .await;
    assert!(ok.is_ok());
}

#[tokio::test]
async fn custom_catalog_entry() {
    let registry = ModelRegistry::new().with_entry(42, CatalogEntry::new("custom", 0.1, 256));
    let model = registry
        .load(&ModelSpec::new(42, Quantization::Int8))
        .await
        .unwrap();
    assert_eq!(model.info().name, "custom");
}

#[tokio::test]
async fn loaded_model_produces_full_vocab_scores() {
    let model = ModelRegistry::with_defaults()
        .load(&ModelSpec::new(1, Quantization::Native))
        .await
        .unwrap();

    let tokens = model.tokenize("once upon a time").unwrap();
    let scores = model.next_scores(&tokens).unwrap();
    assert!(scores.len() > 10);
    assert!(scores.iter().all(|s| s.is_finite()));

    let end = model.end_marker();
    assert_eq!(model.detokenize(&[end]).unwrap(), " </s>");
}
