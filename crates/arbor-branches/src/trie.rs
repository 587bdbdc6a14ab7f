//! The trie itself: plain data, no locking.
//!
//! Nodes live in one arena `Vec`, with the root at index 0 and children referenced
//! by index. A child is always pushed after its parent, so every child index is
//! greater than its parent's. Walks, counting and (de)serialization are loops
//! over the arena, and the JSON snapshot stays flat however long a path grows.

use std::ops::Deref;

use arbor_engine::{History, Item, MessageTurn, StepResult};
use serde::{Deserialize, Serialize};

const ROOT: usize = 0;

/// One stored item.
///
/// # Invariants
/// - `key` is the representative text of the item that created the node
/// - Children keep insertion order; the last child is the most recently added branch
/// - Nodes never change after creation except by gaining children
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BranchNode {
    pub key: String,
    pub source: String,
    /// Stored alternatives for generated items. `None` for literals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<StepResult>,
    /// Arena indices of the children.
    #[serde(default)]
    pub children: Vec<usize>,
}

impl BranchNode {
    fn new(key: &str, source: &str, item: &Item) -> Self {
        let content = match item {
            Item::Generated(step) if !step.is_empty() => Some(step.clone()),
            _ => None,
        };
        Self {
            key: key.to_string(),
            source: source.to_string(),
            content,
            children: Vec::new(),
        }
    }

    /// Rebuild the item this node was created from.
    pub fn to_item(&self) -> Item {
        match &self.content {
            Some(step) => Item::Generated(step.clone()),
            None => Item::Literal(self.key.clone()),
        }
    }
}

/// A node together with the trie it lives in, for navigation.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    trie: &'a BranchTrie,
    index: usize,
}

impl<'a> NodeRef<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn node(&self) -> &'a BranchNode {
        &self.trie.nodes[self.index]
    }

    pub fn child(&self, key: &str) -> Option<NodeRef<'a>> {
        self.children().find(|c| c.node().key == key)
    }

    /// The most recently added child.
    pub fn last_child(&self) -> Option<NodeRef<'a>> {
        self.node().children.last().map(|&index| self.trie.at(index))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let trie = self.trie;
        self.node().children.iter().map(move |&index| trie.at(index))
    }
}

impl Deref for NodeRef<'_> {
    type Target = BranchNode;

    fn deref(&self) -> &BranchNode {
        self.node()
    }
}

/// Prefix tree over conversation histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TrieNodes")]
pub struct BranchTrie {
    nodes: Vec<BranchNode>,
}

/// Unchecked wire form of [`BranchTrie`].
#[derive(Deserialize)]
struct TrieNodes {
    nodes: Vec<BranchNode>,
}

impl TryFrom<TrieNodes> for BranchTrie {
    type Error = String;

    fn try_from(raw: TrieNodes) -> Result<Self, String> {
        let len = raw.nodes.len();
        if len == 0 {
            return Err("trie has no root node".to_string());
        }
        let mut has_parent = vec![false; len];
        for (index, node) in raw.nodes.iter().enumerate() {
            for &child in &node.children {
                if child <= index || child >= len {
                    return Err(format!("node {index} has invalid child index {child}"));
                }
                if std::mem::replace(&mut has_parent[child], true) {
                    return Err(format!("node {child} has more than one parent"));
                }
            }
        }
        if let Some(orphan) = (1..len).find(|&i| !has_parent[i]) {
            return Err(format!("node {orphan} is unreachable"));
        }
        Ok(Self { nodes: raw.nodes })
    }
}

impl Default for BranchTrie {
    fn default() -> Self {
        Self {
            nodes: vec![BranchNode::default()],
        }
    }
}

impl BranchTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> NodeRef<'_> {
        self.at(ROOT)
    }

    fn at(&self, index: usize) -> NodeRef<'_> {
        NodeRef { trie: self, index }
    }

    /// Insert every item of `history`, creating nodes only where the path is new.
    pub fn insert(&mut self, history: &History) {
        let mut current = ROOT;
        for turn in history.turns() {
            for item in &turn.content {
                current = self.child_or_insert(current, item.representative_key(), &turn.source, item);
            }
        }
    }

    fn child_or_insert(&mut self, parent: usize, key: &str, source: &str, item: &Item) -> usize {
        if let Some(existing) = self.at(parent).child(key) {
            return existing.index;
        }
        let index = self.nodes.len();
        self.nodes.push(BranchNode::new(key, source, item));
        self.nodes[parent].children.push(index);
        index
    }

    /// Walk `prefix` through the trie, then extend it along the latest branch.
    ///
    /// Returns `None` when a prefix key is missing or stored under a different
    /// source. An empty prefix extends from the root.
    pub fn search_and_extend(&self, prefix: &History) -> Option<History> {
        let mut turns: Vec<MessageTurn> = Vec::with_capacity(prefix.len());
        let mut current = self.root();

        for turn in prefix.turns() {
            let mut rebuilt = MessageTurn::new(turn.source.clone(), Vec::new());
            for item in &turn.content {
                let node = current
                    .child(item.representative_key())
                    .filter(|node| node.source == turn.source)?;
                rebuilt.content.push(node.to_item());
                current = node;
            }
            turns.push(rebuilt);
        }

        let mut open = turns.pop();
        while let Some(next) = current.last_child() {
            if open.as_ref().map(|t| t.source.as_str()) != Some(next.source.as_str()) {
                turns.extend(open.take());
                open = Some(MessageTurn::new(next.source.clone(), Vec::new()));
            }
            if let Some(turn) = open.as_mut() {
                turn.content.push(next.to_item());
            }
            current = next;
        }
        turns.extend(open);

        Some(History::from(turns))
    }

    /// Drop every node below the root.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of stored items (the root sentinel excluded).
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Length of the longest stored path, in items.
    pub fn depth(&self) -> usize {
        // Parents precede children, so one forward pass settles every depth.
        let mut depths = vec![0usize; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for &child in &node.children {
                depths[child] = depths[index] + 1;
            }
        }
        depths.into_iter().max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_engine::RankedAlternative;

    fn step(pairs: &[(&str, f32)]) -> Item {
        Item::Generated(StepResult::new(
            pairs
                .iter()
                .map(|(t, p)| RankedAlternative::new(*t, *p))
                .collect(),
        ))
    }

    fn turn(source: &str, items: Vec<Item>) -> MessageTurn {
        MessageTurn::new(source, items)
    }

    fn lit(text: &str) -> Item {
        Item::literal(text)
    }

    #[test]
    fn insert_literal_creates_empty_content_node() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![turn("user", vec![lit("hello")])]));

        let node = trie.root().child("hello").unwrap();
        assert_eq!(node.source, "user");
        assert_eq!(node.content, None);
    }

    #[test]
    fn insert_generated_keys_by_committed_alternative() {
        let mut trie = BranchTrie::new();
        let generated = step(&[("test", 0.5), ("test2", 0.5)]);
        trie.insert(&History::from(vec![turn(
            "ai",
            vec![lit("string text"), generated.clone()],
        )]));

        let parent = trie.root().child("string text").unwrap();
        assert_eq!(parent.content, None);
        let node = parent.child("test").unwrap();
        assert_eq!(node.to_item(), generated);
    }

    #[test]
    fn sources_are_kept_per_node() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![
            turn("user", vec![lit("hello")]),
            turn("ai", vec![lit("hi"), step(&[("how", 0.75), ("I", 0.25)])]),
            turn("user", vec![lit("good")]),
        ]));

        let hello = trie.root().child("hello").unwrap();
        let hi = hello.child("hi").unwrap();
        let how = hi.child("how").unwrap();
        let good = how.child("good").unwrap();
        assert_eq!(
            [&hello.source, &hi.source, &how.source, &good.source],
            ["user", "ai", "ai", "user"]
        );
    }

    #[test]
    fn empty_history_inserts_nothing() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::new());
        assert!(trie.is_empty());
        assert_eq!(trie.node_count(), 0);
    }

    #[test]
    fn repeated_insert_is_idempotent() {
        let history = History::from(vec![turn("user", vec![lit("a"), lit("b")])]);
        let mut trie = BranchTrie::new();
        trie.insert(&history);
        let once = trie.clone();
        trie.insert(&history);
        assert_eq!(trie, once);
    }

    #[test]
    fn first_insert_wins_for_existing_key() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![turn("ai", vec![step(&[("x", 0.75), ("y", 0.25)])])]));
        trie.insert(&History::from(vec![turn("ai", vec![step(&[("x", 0.5), ("z", 0.5)])])]));

        let node = trie.root().child("x").unwrap();
        assert_eq!(node.to_item(), step(&[("x", 0.75), ("y", 0.25)]));
        assert_eq!(trie.node_count(), 1);
    }

    #[test]
    fn missing_prefix_is_not_found() {
        let trie = BranchTrie::new();
        let prefix = History::from(vec![turn("user", vec![lit("nonexistent")])]);
        assert_eq!(trie.search_and_extend(&prefix), None);
    }

    #[test]
    fn source_mismatch_is_not_found() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![turn("user", vec![lit("hello")])]));
        let prefix = History::from(vec![turn("ai", vec![lit("hello")])]);
        assert_eq!(trie.search_and_extend(&prefix), None);
    }

    #[test]
    fn extends_through_turn_changes() {
        let full = History::from(vec![
            turn("user", vec![lit("hello")]),
            turn("ai", vec![lit("hi"), step(&[("I am", 0.5), ("I will", 0.5)])]),
            turn("user", vec![lit("how are you")]),
        ]);
        let mut trie = BranchTrie::new();
        trie.insert(&full);

        let prefix = History::from(vec![
            turn("user", vec![lit("hello")]),
            turn("ai", vec![lit("hi")]),
        ]);
        assert_eq!(trie.search_and_extend(&prefix), Some(full));
    }

    #[test]
    fn empty_prefix_returns_latest_path() {
        let mut trie = BranchTrie::new();
        assert_eq!(trie.search_and_extend(&History::new()), Some(History::new()));

        trie.insert(&History::from(vec![turn("user", vec![lit("a")])]));
        trie.insert(&History::from(vec![turn("user", vec![lit("b")])]));
        assert_eq!(
            trie.search_and_extend(&History::new()),
            Some(History::from(vec![turn("user", vec![lit("b")])]))
        );
    }

    #[test]
    fn clear_resets_root() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![turn("user", vec![lit("hello")])]));
        trie.clear();
        assert!(trie.is_empty());
        assert_eq!(trie.root().source, "");
        assert_eq!(trie, BranchTrie::new());
    }

    #[test]
    fn depth_tracks_longest_path() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![turn("user", vec![lit("a"), lit("b"), lit("c")])]));
        trie.insert(&History::from(vec![turn("user", vec![lit("a"), lit("x")])]));
        assert_eq!(trie.depth(), 3);
        assert_eq!(trie.node_count(), 4);
    }

    #[test]
    fn children_are_arena_indices_after_parents() {
        let mut trie = BranchTrie::new();
        trie.insert(&History::from(vec![turn("user", vec![lit("a"), lit("b")])]));
        trie.insert(&History::from(vec![turn("user", vec![lit("a"), lit("c")])]));

        let a = trie.root().child("a").unwrap();
        assert_eq!(a.index(), 1);
        let keys: Vec<&str> = a.children().map(|c| c.node().key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(a.children().all(|c| c.index() > a.index()));
    }

    #[test]
    fn malformed_arenas_are_rejected() {
        let node = |children: Vec<usize>| BranchNode {
            children,
            ..BranchNode::default()
        };
        let bad = [
            vec![],
            vec![node(vec![1]), node(vec![1])],
            vec![node(vec![5])],
            vec![node(vec![1, 1]), node(vec![])],
            vec![node(vec![]), node(vec![])],
        ];
        for nodes in bad {
            assert!(BranchTrie::try_from(TrieNodes { nodes }).is_err());
        }
    }
}
