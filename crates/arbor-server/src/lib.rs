//! # arbor-server
//!
//! WebSocket API for branch-aware text continuation.
//!
//! Each connection loads a model, then exchanges JSON envelopes with a
//! [`ChatSession`]: the client sends edits (new message, pick another word,
//! refresh a word, change a setting, clear, stop) and receives every generated
//! step with its near-miss alternatives. Finished histories feed a process-wide
//! [`BranchStore`](arbor_branches::BranchStore) that is also exposed over REST.

pub mod error;
pub mod handlers;
pub mod models;
pub mod params;
pub mod server;
pub mod session;
pub mod session_manager;
pub mod state;

pub use error::ServerError;
pub use params::{ChatMode, ConfigValue, GenerationParams};
pub use server::{create_router, run_server};
pub use session::{ChatSession, SessionState};
pub use session_manager::{SessionGuard, SessionManager};
pub use state::{AppState, ServerConfig};
