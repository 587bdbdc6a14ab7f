//! Application state and configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use arbor_branches::BranchStore;
use arbor_engine::ModelLoader;

use crate::error::ServerError;
use crate::params::GenerationParams;
use crate::session_manager::SessionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Resolves handshake requests into loaded models.
    pub loader: Arc<dyn ModelLoader>,
    /// Server configuration.
    pub config: ServerConfig,
    /// Session lifecycle manager (concurrency + cancellation).
    pub sessions: Arc<SessionManager>,
    /// Process-wide conversation branches.
    pub branches: Arc<BranchStore>,
}

impl AppState {
    /// Build state from configuration, loading the branch snapshot if one is set.
    pub fn new(loader: Arc<dyn ModelLoader>, config: ServerConfig) -> Result<Self, ServerError> {
        let branches = match &config.branch_snapshot {
            Some(path) => BranchStore::with_snapshot(path)?,
            None => BranchStore::new(),
        };
        Ok(Self {
            loader,
            sessions: SessionManager::new(config.max_concurrent_sessions),
            branches: Arc::new(branches),
            config,
        })
    }
}

/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent WebSocket sessions.
    pub max_concurrent_sessions: usize,
    /// Capacity of each session's outbound event queue.
    pub event_buffer: usize,
    /// JSON file backing the branch store.
    pub branch_snapshot: Option<PathBuf>,
    /// Parameters every new session starts with.
    pub defaults: GenerationParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_concurrent_sessions: 16,
            event_buffer: 64,
            branch_snapshot: None,
            defaults: GenerationParams::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_max_concurrent_sessions(mut self, n: usize) -> Self {
        self.max_concurrent_sessions = n;
        self
    }

    pub fn with_branch_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.branch_snapshot = Some(path.into());
        self
    }

    pub fn with_defaults(mut self, defaults: GenerationParams) -> Self {
        self.defaults = defaults;
        self
    }
}
