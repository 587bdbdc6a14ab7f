//! Process-wide branch store: a locked trie with optional JSON snapshot file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_engine::History;

use crate::trie::BranchTrie;

/// Error type for snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum BranchError {
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BranchResult<T> = Result<T, BranchError>;

/// Shared [`BranchTrie`] with reader/writer locking.
///
/// Writers (`insert`, `clear`) hold the write lock while the snapshot file is
/// rewritten, so the file always reflects a complete trie state.
#[derive(Debug, Default)]
pub struct BranchStore {
    trie: RwLock<BranchTrie>,
    snapshot_path: Option<PathBuf>,
}

impl BranchStore {
    /// In-memory store with no persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a snapshot file. An existing file is loaded; a missing one
    /// starts the store empty and is created on the first write.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> BranchResult<Self> {
        let path = path.into();
        let trie = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| BranchError::Io {
                path: path.clone(),
                source,
            })?;
            let trie = BranchTrie::from_json(&raw)?;
            tracing::info!(
                path = %path.display(),
                nodes = trie.node_count(),
                "loaded branch snapshot"
            );
            trie
        } else {
            BranchTrie::new()
        };

        Ok(Self {
            trie: RwLock::new(trie),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Insert a finished history. The in-memory insert always happens; an error
    /// means only the snapshot write failed.
    pub fn insert(&self, history: &History) -> BranchResult<()> {
        let mut trie = self.write();
        trie.insert(history);
        tracing::debug!(turns = history.len(), nodes = trie.node_count(), "history inserted");
        self.persist(&trie)
    }

    pub fn search_and_extend(&self, prefix: &History) -> Option<History> {
        self.read().search_and_extend(prefix)
    }

    pub fn clear(&self) -> BranchResult<()> {
        let mut trie = self.write();
        trie.clear();
        tracing::info!("branch store cleared");
        self.persist(&trie)
    }

    pub fn node_count(&self) -> usize {
        self.read().node_count()
    }

    pub fn depth(&self) -> usize {
        self.read().depth()
    }

    /// A point-in-time copy of the whole trie.
    pub fn snapshot(&self) -> BranchTrie {
        self.read().clone()
    }

    // A panic while holding the lock cannot leave the trie half-built: every
    // mutation is a single push or a root reset.
    fn read(&self) -> RwLockReadGuard<'_, BranchTrie> {
        self.trie.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BranchTrie> {
        self.trie.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, trie: &BranchTrie) -> BranchResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = trie.to_json()?;
        let tmp = path.with_extension("tmp");
        let io_err = |source| BranchError::Io {
            path: path.clone(),
            source,
        };
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

impl BranchTrie {
    pub fn to_json(&self) -> BranchResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> BranchResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_engine::{Item, MessageTurn};

    fn history(words: &[&str]) -> History {
        History::from(vec![MessageTurn::new(
            "user",
            words.iter().map(|w| Item::literal(*w)).collect(),
        )])
    }

    #[test]
    fn in_memory_store_round_trip() {
        let store = BranchStore::new();
        store.insert(&history(&["a", "b"])).unwrap();
        assert_eq!(store.node_count(), 2);
        assert_eq!(
            store.search_and_extend(&history(&["a"])),
            Some(history(&["a", "b"]))
        );
        assert!(store.snapshot_path().is_none());
    }

    #[test]
    fn clear_empties_store() {
        let store = BranchStore::new();
        store.insert(&history(&["a"])).unwrap();
        store.clear().unwrap();
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.search_and_extend(&history(&["a"])), None);
    }

    #[test]
    fn json_round_trip_preserves_child_order() {
        let mut trie = BranchTrie::new();
        trie.insert(&history(&["z"]));
        trie.insert(&history(&["a"]));
        let back = BranchTrie::from_json(&trie.to_json().unwrap()).unwrap();
        assert_eq!(back, trie);
        assert_eq!(back.root().last_child().unwrap().key, "a");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            BranchTrie::from_json("{not json"),
            Err(BranchError::Json(_))
        ));
    }
}
