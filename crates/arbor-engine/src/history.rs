//! Conversation data model: ranked alternatives, message turns and histories.
//!
//! Wire forms follow the client protocol: a [`RankedAlternative`] is a
//! `["text", probability]` pair, a [`StepResult`] is an array of those, and an
//! [`Item`] is either a plain string or a step result.

use serde::{Deserialize, Serialize};

/// One candidate continuation and its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f32)", into = "(String, f32)")]
pub struct RankedAlternative {
    pub text: String,
    pub probability: f32,
}

impl RankedAlternative {
    pub fn new(text: impl Into<String>, probability: f32) -> Self {
        Self {
            text: text.into(),
            probability,
        }
    }
}

impl From<(String, f32)> for RankedAlternative {
    fn from((text, probability): (String, f32)) -> Self {
        Self { text, probability }
    }
}

impl From<RankedAlternative> for (String, f32) {
    fn from(alt: RankedAlternative) -> Self {
        (alt.text, alt.probability)
    }
}

/// Ranked candidates for one generation step.
///
/// Position 0 is the committed token (the one fed back into the sequence); the
/// remaining entries are sorted by descending probability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepResult(pub Vec<RankedAlternative>);

impl StepResult {
    pub fn new(alternatives: Vec<RankedAlternative>) -> Self {
        Self(alternatives)
    }

    /// The alternative actually appended to the sequence.
    pub fn committed(&self) -> Option<&RankedAlternative> {
        self.0.first()
    }

    /// Alternatives that were considered but not committed.
    pub fn near_misses(&self) -> &[RankedAlternative] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn alternatives(&self) -> &[RankedAlternative] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Item {
    /// Fixed text typed or picked by the user.
    Literal(String),
    /// A generated, still revisable word.
    Generated(StepResult),
}

impl Item {
    pub fn literal(text: impl Into<String>) -> Self {
        Item::Literal(text.into())
    }

    /// The text that stands for this item in prompts and in the branch trie.
    pub fn representative_key(&self) -> &str {
        match self {
            Item::Literal(text) => text,
            Item::Generated(step) => step.committed().map_or("", |alt| alt.text.as_str()),
        }
    }
}

/// A run of items produced by one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTurn {
    pub source: String,
    pub content: Vec<Item>,
}

impl MessageTurn {
    pub fn new(source: impl Into<String>, content: Vec<Item>) -> Self {
        Self {
            source: source.into(),
            content,
        }
    }

    /// Concatenated representative keys of every item in the turn.
    pub fn flatten(&self) -> String {
        self.content.iter().map(Item::representative_key).collect()
    }
}

/// Error raised when an `(i, j)` edit coordinate does not address the history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("turn index {index} out of range (history has {len} turns)")]
    TurnOutOfRange { index: usize, len: usize },
    #[error("item index {index} out of range (turn {turn} has {len} items)")]
    ItemOutOfRange { turn: usize, index: usize, len: usize },
}

/// An ordered conversation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History(pub Vec<MessageTurn>);

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[MessageTurn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&MessageTurn> {
        self.0.last()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn push_turn(&mut self, turn: MessageTurn) {
        self.0.push(turn);
    }

    /// Append `item` to the last turn when it belongs to `source`, otherwise open
    /// a new turn for it.
    pub fn append_item(&mut self, source: &str, item: Item) {
        match self.0.last_mut() {
            Some(turn) if turn.source == source => turn.content.push(item),
            _ => self.0.push(MessageTurn::new(source, vec![item])),
        }
    }

    /// Keep turns `[0, i]` and, within turn `i`, items `[0, j)`.
    pub fn truncate(&mut self, i: usize, j: usize) -> Result<(), HistoryError> {
        let len = self.0.len();
        let turn = self
            .0
            .get(i)
            .ok_or(HistoryError::TurnOutOfRange { index: i, len })?;
        if j > turn.content.len() {
            return Err(HistoryError::ItemOutOfRange {
                turn: i,
                index: j,
                len: turn.content.len(),
            });
        }
        self.0.truncate(i + 1);
        self.0[i].content.truncate(j);
        Ok(())
    }

    /// A copy truncated to `(i, j)`, leaving `self` untouched.
    pub fn truncated(&self, i: usize, j: usize) -> Result<History, HistoryError> {
        let mut copy = self.clone();
        copy.truncate(i, j)?;
        Ok(copy)
    }

    /// Representative keys of every item, in order, paired with their turn source.
    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().flat_map(|turn| {
            turn.content
                .iter()
                .map(move |item| (turn.source.as_str(), item.representative_key()))
        })
    }
}

impl From<Vec<MessageTurn>> for History {
    fn from(turns: Vec<MessageTurn>) -> Self {
        Self(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(pairs: &[(&str, f32)]) -> Item {
        Item::Generated(StepResult::new(
            pairs
                .iter()
                .map(|(t, p)| RankedAlternative::new(*t, *p))
                .collect(),
        ))
    }

    fn sample_history() -> History {
        History::from(vec![
            MessageTurn::new("user", vec![Item::literal("hello")]),
            MessageTurn::new(
                "ai",
                vec![Item::literal("hi"), step(&[(" how", 0.75), (" I", 0.25)])],
            ),
        ])
    }

    #[test]
    fn representative_key_uses_committed_alternative() {
        assert_eq!(Item::literal("abc").representative_key(), "abc");
        assert_eq!(step(&[("x", 0.1), ("y", 0.9)]).representative_key(), "x");
        assert_eq!(Item::Generated(StepResult::default()).representative_key(), "");
    }

    #[test]
    fn flatten_concatenates_keys() {
        assert_eq!(sample_history().turns()[1].flatten(), "hi how");
    }

    #[test]
    fn truncate_keeps_turns_through_i_and_items_before_j() {
        let mut history = sample_history();
        history.truncate(1, 1).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[1].content, vec![Item::literal("hi")]);

        let mut history = sample_history();
        history.truncate(0, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.turns()[0].content.is_empty());
    }

    #[test]
    fn truncate_rejects_out_of_range() {
        let mut history = sample_history();
        assert_eq!(
            history.truncate(2, 0),
            Err(HistoryError::TurnOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            history.truncate(0, 2),
            Err(HistoryError::ItemOutOfRange {
                turn: 0,
                index: 2,
                len: 1
            })
        );
        assert_eq!(history, sample_history());
    }

    #[test]
    fn truncated_leaves_original_alone() {
        let history = sample_history();
        let copy = history.truncated(1, 0).unwrap();
        assert!(copy.turns()[1].content.is_empty());
        assert_eq!(history.turns()[1].content.len(), 2);
    }

    #[test]
    fn append_item_groups_by_source() {
        let mut history = History::new();
        history.append_item("user", Item::literal("a"));
        history.append_item("user", Item::literal("b"));
        history.append_item("ai", Item::literal("c"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].flatten(), "ab");
        assert_eq!(history.turns()[1].source, "ai");
    }

    #[test]
    fn wire_format_matches_client_protocol() {
        let json = serde_json::to_value(sample_history()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"source": "user", "content": ["hello"]},
                {"source": "ai", "content": ["hi", [[" how", 0.75], [" I", 0.25]]]}
            ])
        );
        let back: History = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample_history());
    }
}
