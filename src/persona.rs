//! Persona configuration and per-persona rolling memory.
//!
//! Each side of a dialogue is a persona: a name, an immutable style prompt,
//! and a bounded memory of what that persona itself has said. The memory is
//! a sliding window of the persona's most recent turns, each clipped to a
//! fixed character budget, so prompt size stays bounded no matter how long
//! the conversation runs.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of own turns a persona remembers verbatim.
pub const DEFAULT_MEMORY_TURNS: usize = 6;

/// Maximum characters retained per remembered turn.
const MEMORY_CLIP_CHARS: usize = 400;

/// Truncate to at most `max` characters, respecting char boundaries.
pub(crate) fn clip_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Caller-supplied configuration for one persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Name distinguishing this persona within the pair.
    pub identifier: String,

    /// Static personality/style description, immutable after creation.
    pub system_prompt: String,
}

impl PersonaConfig {
    /// Create a new persona configuration.
    ///
    /// Validation happens when the configuration is turned into a
    /// [`PersonaState`] at the start of a run.
    pub fn new(identifier: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

/// One persona's identity plus its running memory.
#[derive(Debug, Clone)]
pub struct PersonaState {
    identifier: String,
    system_prompt: String,
    own_turns: VecDeque<String>,
    memory_turns: usize,
}

impl PersonaState {
    /// Validate a configuration and create an initialized state with empty
    /// memory.
    pub fn new(config: PersonaConfig) -> Result<Self, ValidationError> {
        let identifier = config.identifier.trim().to_string();
        if identifier.is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }

        let system_prompt = config.system_prompt.trim().to_string();
        if system_prompt.is_empty() {
            return Err(ValidationError::EmptySystemPrompt { identifier });
        }

        Ok(Self {
            identifier,
            system_prompt,
            own_turns: VecDeque::new(),
            memory_turns: DEFAULT_MEMORY_TURNS,
        })
    }

    /// Set how many of this persona's own turns are remembered verbatim.
    pub fn with_memory_turns(mut self, turns: usize) -> Self {
        self.memory_turns = turns.max(1);
        self
    }

    /// The persona's identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The persona's style prompt.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Record a turn this persona just spoke.
    ///
    /// Keeps the window bounded: oldest entries fall off once the window is
    /// full, and each entry is clipped to a fixed character budget.
    pub fn record_own_turn(&mut self, text: &str) {
        self.own_turns
            .push_back(clip_chars(text.trim(), MEMORY_CLIP_CHARS));
        while self.own_turns.len() > self.memory_turns {
            self.own_turns.pop_front();
        }
    }

    /// Number of turns currently remembered.
    pub fn remembered_turns(&self) -> usize {
        self.own_turns.len()
    }

    /// Deterministic, bounded summary of what this persona has said.
    ///
    /// Empty string until the persona has spoken at least once.
    pub fn memory_summary(&self) -> String {
        if self.own_turns.is_empty() {
            return String::new();
        }

        let mut summary = String::from("Your most recent lines, oldest first:\n");
        for line in &self.own_turns {
            summary.push_str("- ");
            summary.push_str(line);
            summary.push('\n');
        }
        summary
    }
}
