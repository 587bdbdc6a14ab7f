//! # arbor-runtime
//!
//! Model backends for arbor. Provides:
//! - [`WordModel`]: a deterministic word-level reference model, used by the
//!   default server build and by tests
//! - [`ModelRegistry`]: a [`ModelLoader`](arbor_engine::ModelLoader) that resolves
//!   model ids against a fixed catalog

pub mod model;
pub mod registry;

pub use model::WordModel;
pub use registry::{CatalogEntry, ModelRegistry};
