//! Options controlling one orchestrated conversation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which persona speaks first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningSpeaker {
    /// The first persona passed to `run` opens.
    #[default]
    A,
    /// The second persona opens.
    B,
}

/// Configuration for a dialogue run.
///
/// All fields have usable defaults; the builder methods exist for callers
/// that want to tune a single knob.
#[derive(Debug, Clone)]
pub struct DialogueOptions {
    /// Maximum total turns before the conversation completes.
    pub max_turns: usize,

    /// How many prior turns to include as context; `None` means all turns,
    /// still subject to the character budget.
    pub context_window: Option<usize>,

    /// Upper bound on total context text, in characters. The most recent
    /// turn is always included even if it alone exceeds the budget.
    pub context_char_budget: usize,

    /// Marker that, when present in a turn, ends the conversation.
    pub end_marker: Option<String>,

    /// Which persona opens the conversation.
    pub opening_speaker: OpeningSpeaker,

    /// Retries allowed per turn for transient gateway failures.
    pub retry_budget: u32,

    /// Base delay before the first retry; doubles per attempt.
    pub retry_backoff: Duration,

    /// Per-call timeout applied around every gateway call.
    pub turn_timeout: Duration,

    /// Maximum characters kept from a generated turn; longer replies are
    /// truncated.
    pub max_turn_length: usize,

    /// How many of its own turns each persona remembers verbatim.
    pub memory_turns: usize,
}

impl Default for DialogueOptions {
    fn default() -> Self {
        Self {
            max_turns: 20,
            context_window: None,
            context_char_budget: 8_000,
            end_marker: None,
            opening_speaker: OpeningSpeaker::A,
            retry_budget: 2,
            retry_backoff: Duration::from_millis(250),
            turn_timeout: Duration::from_secs(60),
            max_turn_length: 1_200,
            memory_turns: crate::persona::DEFAULT_MEMORY_TURNS,
        }
    }
}

impl DialogueOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of turns.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Limit context to the last `window` turns.
    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = Some(window);
        self
    }

    /// Set the context character budget.
    pub fn with_context_char_budget(mut self, budget: usize) -> Self {
        self.context_char_budget = budget;
        self
    }

    /// Set the end-of-conversation marker.
    pub fn with_end_marker(mut self, marker: impl Into<String>) -> Self {
        self.end_marker = Some(marker.into());
        self
    }

    /// Set which persona opens.
    pub fn with_opening_speaker(mut self, speaker: OpeningSpeaker) -> Self {
        self.opening_speaker = speaker;
        self
    }

    /// Set the per-turn retry budget.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the base retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the per-call gateway timeout.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Set the maximum turn length in characters.
    pub fn with_max_turn_length(mut self, length: usize) -> Self {
        self.max_turn_length = length;
        self
    }

    /// Set how many own turns each persona remembers.
    pub fn with_memory_turns(mut self, turns: usize) -> Self {
        self.memory_turns = turns;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = DialogueOptions::default();
        assert_eq!(options.max_turns, 20);
        assert_eq!(options.retry_budget, 2);
        assert_eq!(options.opening_speaker, OpeningSpeaker::A);
        assert!(options.end_marker.is_none());
    }

    #[test]
    fn test_builder() {
        let options = DialogueOptions::new()
            .with_max_turns(6)
            .with_end_marker("[END]")
            .with_opening_speaker(OpeningSpeaker::B)
            .with_context_window(4);

        assert_eq!(options.max_turns, 6);
        assert_eq!(options.end_marker.as_deref(), Some("[END]"));
        assert_eq!(options.opening_speaker, OpeningSpeaker::B);
        assert_eq!(options.context_window, Some(4));
    }
}
