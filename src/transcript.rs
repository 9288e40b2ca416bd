//! Append-only transcript of a conversation.
//!
//! The store enforces the two invariants the rest of the library relies on:
//! sequence numbers are contiguous from zero, and speakers strictly
//! alternate after the first turn. Readers only ever see immutable
//! snapshots.

use crate::error::OrderingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One generated utterance attributed to a single persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Identifier of the persona that spoke.
    pub speaker: String,

    /// The generated text.
    pub text: String,

    /// Zero-based position in the conversation.
    pub sequence: usize,

    /// When the turn was produced.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new turn stamped with the current time.
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, sequence: usize) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            sequence,
            timestamp: Utc::now(),
        }
    }
}

/// Mutable, append-only record of turns owned by one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    turns: Vec<Turn>,
}

impl TranscriptStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot, re-validating both invariants.
    ///
    /// Used to resume a conversation from a previously returned transcript.
    pub fn from_snapshot(snapshot: Transcript) -> Result<Self, OrderingError> {
        let mut store = Self::new();
        for turn in snapshot.turns {
            store.append(turn)?;
        }
        Ok(store)
    }

    /// Append a turn.
    ///
    /// Fails if the turn's sequence number is not exactly the current length,
    /// or if its speaker matches the previous turn's speaker.
    pub fn append(&mut self, turn: Turn) -> Result<(), OrderingError> {
        if turn.sequence != self.turns.len() {
            return Err(OrderingError::NonContiguousSequence {
                expected: self.turns.len(),
                got: turn.sequence,
            });
        }

        if let Some(previous) = self.turns.last() {
            if previous.speaker == turn.speaker {
                return Err(OrderingError::RepeatedSpeaker {
                    speaker: turn.speaker,
                });
            }
        }

        self.turns.push(turn);
        Ok(())
    }

    /// Number of turns recorded.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turns have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn, if any.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The most recent `count` turns, in conversation order.
    pub fn recent(&self, count: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(count);
        &self.turns[start..]
    }

    /// All turns, in conversation order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Immutable ordered copy for read-only consumption.
    pub fn snapshot(&self) -> Transcript {
        Transcript {
            turns: self.turns.clone(),
        }
    }
}

/// Immutable ordered copy of a conversation.
///
/// This is what `run` returns and what a presentation layer renders or
/// persists; it round-trips through serde for JSON storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// All turns, in conversation order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the transcript is empty.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The final turn, if any.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Iterate over turns in conversation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    /// Render the transcript as downloadable plain text.
    pub fn format_text(&self, scenario: &str) -> String {
        let mut text = format!("Situation: {scenario}\n\n");
        for turn in &self.turns {
            text.push_str(&format!("{}: {}\n\n", turn.speaker, turn.text));
        }
        text
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
