//! # arbor-branches
//!
//! Conversation branch store for arbor.
//!
//! Every finished generation inserts its full [`History`](arbor_engine::History) into
//! a trie keyed by each item's representative text. Edits that diverge from an
//! earlier history share the common prefix and branch at the first difference, so
//! a client can later ask for "the latest known continuation" of any prefix.
//!
//! Supports:
//! - **Insert**: idempotent for repeated prefixes
//! - **Search and extend**: walk a prefix, then follow the most recently added child
//!   down to a leaf
//! - **Snapshots**: the whole trie round-trips through JSON, optionally backed by a file
//! - **Sharing**: [`BranchStore`] wraps the trie in a reader/writer lock

pub mod store;
pub mod trie;

pub use store::{BranchError, BranchResult, BranchStore};
pub use trie::{BranchNode, BranchTrie, NodeRef};
