//! HTTP and WebSocket request handlers.

pub mod branches;
pub mod health;
pub mod ws;

pub use branches::{handle_clear_branches, handle_export_branches, handle_search_branches};
pub use health::handle_health;
pub use ws::{handle_chat_ws, handle_text_generation_ws};
