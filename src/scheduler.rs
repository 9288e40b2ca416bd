//! Turn scheduling: speaker selection, prompt building, response
//! validation, retries, and stop-condition detection.
//!
//! The scheduler is a state machine `Idle -> Running -> {Completed,
//! Aborted}`. Retries of a single turn stay within `Running`; nothing
//! transitions out of a terminal state.

use crate::error::{GatewayError, OrderingError};
use crate::gateway::{ContextTurn, ModelGateway, ModelRequest};
use crate::options::{DialogueOptions, OpeningSpeaker};
use crate::persona::{clip_chars, PersonaState};
use crate::transcript::{TranscriptStore, Turn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No turn generated yet.
    Idle,
    /// Conversation in progress.
    Running,
    /// Terminated by a completion stop condition.
    Completed,
    /// Terminated by a failure or cancellation.
    Aborted,
}

/// How a conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// A configured completion condition was reached.
    Completed,
    /// The conversation could not continue.
    Aborted,
}

/// Why a conversation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured maximum turn count was reached.
    MaxTurns,
    /// A turn contained the configured end-of-conversation marker.
    EndMarker,
    /// Two consecutive generations came back blank.
    EmptyResponse,
    /// Gateway failures exhausted the retry budget, or the request was
    /// rejected as invalid.
    GatewayFailure,
    /// The caller cancelled the conversation at a turn boundary.
    Cancelled,
}

/// Result of asking the scheduler for one more turn.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// A turn was generated and appended to the transcript.
    Spoke(Turn),
    /// The generation came back blank; no turn was appended and the same
    /// persona speaks on the next attempt.
    Empty,
    /// A stop condition fired; the conversation is over.
    Stopped(TerminalState, StopReason),
}

/// Decides whose turn is next, builds prompts, and detects stop conditions.
pub struct TurnScheduler {
    scenario: String,
    options: DialogueOptions,
    state: SchedulerState,
    consecutive_empty: u32,
    outcome: Option<(TerminalState, StopReason)>,
}

impl TurnScheduler {
    /// Create an idle scheduler for one conversation.
    pub fn new(scenario: impl Into<String>, options: DialogueOptions) -> Self {
        Self {
            scenario: scenario.into(),
            options,
            state: SchedulerState::Idle,
            consecutive_empty: 0,
            outcome: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Index into the persona pair of whoever speaks next.
    ///
    /// The persona that did not speak last goes next; on an empty transcript
    /// the configured opening speaker goes first.
    fn next_speaker_index(&self, personas: &[PersonaState; 2], transcript: &TranscriptStore) -> usize {
        match transcript.last() {
            None => match self.options.opening_speaker {
                OpeningSpeaker::A => 0,
                OpeningSpeaker::B => 1,
            },
            Some(turn) => {
                if turn.speaker == personas[0].identifier() {
                    1
                } else {
                    0
                }
            }
        }
    }

    /// Check the pre-turn stop conditions.
    fn check_stop(&self, transcript: &TranscriptStore) -> Option<(TerminalState, StopReason)> {
        if transcript.len() >= self.options.max_turns {
            return Some((TerminalState::Completed, StopReason::MaxTurns));
        }

        if let (Some(marker), Some(last)) = (&self.options.end_marker, transcript.last()) {
            if last.text.contains(marker.as_str()) {
                return Some((TerminalState::Completed, StopReason::EndMarker));
            }
        }

        None
    }

    /// Build the gateway request for the speaking persona.
    ///
    /// The context window is the last `context_window` turns, additionally
    /// bounded by the character budget; the most recent turn is always
    /// included.
    pub fn build_request(&self, persona: &PersonaState, transcript: &TranscriptStore) -> ModelRequest {
        let window = match self.options.context_window {
            Some(count) => transcript.recent(count),
            None => transcript.turns(),
        };

        let mut selected: Vec<&Turn> = Vec::new();
        let mut used = 0usize;
        for turn in window.iter().rev() {
            let cost = turn.speaker.chars().count() + turn.text.chars().count() + 2;
            if !selected.is_empty() && used + cost > self.options.context_char_budget {
                break;
            }
            selected.push(turn);
            used += cost;
        }
        selected.reverse();

        let mut system_prompt = persona.system_prompt().to_string();
        let memory = persona.memory_summary();
        if !memory.is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(&memory);
        }

        ModelRequest {
            system_prompt,
            scenario: self.scenario.clone(),
            context: selected
                .into_iter()
                .map(|turn| ContextTurn {
                    speaker: turn.speaker.clone(),
                    text: turn.text.clone(),
                })
                .collect(),
            max_turn_length: self.options.max_turn_length,
        }
    }

    /// Generate the next turn, or report that a stop condition fired.
    ///
    /// Transient gateway failures are retried up to the configured budget
    /// with doubling backoff; exhausting the budget, or any `InvalidRequest`,
    /// aborts the conversation. An `OrderingError` here indicates a bug in
    /// speaker selection, not a recoverable condition.
    pub async fn next_turn(
        &mut self,
        gateway: &dyn ModelGateway,
        personas: &mut [PersonaState; 2],
        transcript: &mut TranscriptStore,
    ) -> Result<TurnOutcome, OrderingError> {
        if let Some((terminal, reason)) = self.outcome {
            return Ok(TurnOutcome::Stopped(terminal, reason));
        }

        if let Some((terminal, reason)) = self.check_stop(transcript) {
            return Ok(self.finish(terminal, reason));
        }

        self.state = SchedulerState::Running;

        let index = self.next_speaker_index(personas, transcript);
        let request = self.build_request(&personas[index], transcript);

        let raw = match self.generate_with_retries(gateway, request).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(error = %err, speaker = personas[index].identifier(), "gateway failure, aborting");
                return Ok(self.finish(TerminalState::Aborted, StopReason::GatewayFailure));
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            self.consecutive_empty += 1;
            tracing::warn!(
                speaker = personas[index].identifier(),
                consecutive = self.consecutive_empty,
                "blank generation"
            );
            if self.consecutive_empty >= 2 {
                return Ok(self.finish(TerminalState::Aborted, StopReason::EmptyResponse));
            }
            return Ok(TurnOutcome::Empty);
        }
        self.consecutive_empty = 0;

        let text = clip_chars(trimmed, self.options.max_turn_length);
        let turn = Turn::new(personas[index].identifier(), text, transcript.len());
        transcript.append(turn.clone())?;
        personas[index].record_own_turn(&turn.text);

        tracing::debug!(
            speaker = %turn.speaker,
            sequence = turn.sequence,
            chars = turn.text.len(),
            "turn generated"
        );

        Ok(TurnOutcome::Spoke(turn))
    }

    /// Cancel the conversation at this turn boundary.
    pub fn cancel(&mut self) -> (TerminalState, StopReason) {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        self.finish(TerminalState::Aborted, StopReason::Cancelled);
        (TerminalState::Aborted, StopReason::Cancelled)
    }

    fn finish(&mut self, terminal: TerminalState, reason: StopReason) -> TurnOutcome {
        self.state = match terminal {
            TerminalState::Completed => SchedulerState::Completed,
            TerminalState::Aborted => SchedulerState::Aborted,
        };
        self.outcome = Some((terminal, reason));
        TurnOutcome::Stopped(terminal, reason)
    }

    async fn generate_with_retries(
        &self,
        gateway: &dyn ModelGateway,
        request: ModelRequest,
    ) -> Result<String, GatewayError> {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(
                self.options.turn_timeout,
                gateway.generate(request.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout {
                    duration: self.options.turn_timeout,
                }),
            };

            match result {
                Ok(response) => return Ok(response.text),
                Err(err) if err.is_retryable() && attempt < self.options.retry_budget => {
                    attempt += 1;
                    let delay = self.retry_delay(&err, attempt);
                    tracing::warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "transient gateway failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// How long to wait before retry number `attempt` (1-based).
    ///
    /// A provider-supplied `retry-after` wins over the doubling backoff.
    /// The exponent is capped so a large retry budget cannot overflow.
    fn retry_delay(&self, err: &GatewayError, attempt: u32) -> Duration {
        if let GatewayError::RateLimited {
            retry_after: Some(wait),
        } = err
        {
            return *wait;
        }
        let factor = 2u32.saturating_pow((attempt - 1).min(16));
        self.options.retry_backoff.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaConfig;
    use crate::testing::MockGateway;

    fn personas() -> [PersonaState; 2] {
        [
            PersonaState::new(PersonaConfig::new("Alex", "anxious project manager")).unwrap(),
            PersonaState::new(PersonaConfig::new("Sam", "calm engineer")).unwrap(),
        ]
    }

    fn fast_options() -> DialogueOptions {
        DialogueOptions::new().with_retry_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_alternation_and_sequence() {
        let gateway = MockGateway::new();
        let mut scheduler = TurnScheduler::new("a delayed project", fast_options());
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        for expected in ["Alex", "Sam", "Alex"] {
            let outcome = scheduler
                .next_turn(&gateway, &mut personas, &mut transcript)
                .await
                .unwrap();
            match outcome {
                TurnOutcome::Spoke(turn) => assert_eq!(turn.speaker, expected),
                other => panic!("expected a turn, got {other:?}"),
            }
        }
        assert_eq!(transcript.len(), 3);
        assert_eq!(scheduler.state(), SchedulerState::Running);
    }

    #[tokio::test]
    async fn test_opening_speaker_b() {
        let gateway = MockGateway::new();
        let options = fast_options().with_opening_speaker(OpeningSpeaker::B);
        let mut scheduler = TurnScheduler::new("a delayed project", options);
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        let outcome = scheduler
            .next_turn(&gateway, &mut personas, &mut transcript)
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Spoke(turn) => assert_eq!(turn.speaker, "Sam"),
            other => panic!("expected a turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_turns_completes() {
        let gateway = MockGateway::new();
        let mut scheduler = TurnScheduler::new("a delayed project", fast_options().with_max_turns(2));
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        loop {
            match scheduler
                .next_turn(&gateway, &mut personas, &mut transcript)
                .await
                .unwrap()
            {
                TurnOutcome::Stopped(terminal, reason) => {
                    assert_eq!(terminal, TerminalState::Completed);
                    assert_eq!(reason, StopReason::MaxTurns);
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(transcript.len(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Completed);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let gateway = MockGateway::new();
        let mut scheduler = TurnScheduler::new("a delayed project", fast_options().with_max_turns(1));
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        // Drive to completion, then keep asking.
        for _ in 0..3 {
            let _ = scheduler
                .next_turn(&gateway, &mut personas, &mut transcript)
                .await
                .unwrap();
        }
        assert_eq!(scheduler.state(), SchedulerState::Completed);
        assert_eq!(transcript.len(), 1);

        // Cancel after completion does not rewrite the outcome.
        let (terminal, reason) = scheduler.cancel();
        assert_eq!(terminal, TerminalState::Completed);
        assert_eq!(reason, StopReason::MaxTurns);
    }

    #[tokio::test]
    async fn test_empty_then_recovery() {
        let gateway = MockGateway::new();
        gateway.reply("");
        gateway.reply("Sorry, lost my train of thought.");

        let mut scheduler = TurnScheduler::new("a delayed project", fast_options());
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        let outcome = scheduler
            .next_turn(&gateway, &mut personas, &mut transcript)
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Empty));
        assert!(transcript.is_empty());

        // Same persona speaks again and succeeds.
        let outcome = scheduler
            .next_turn(&gateway, &mut personas, &mut transcript)
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Spoke(turn) => {
                assert_eq!(turn.speaker, "Alex");
                assert_eq!(turn.text, "Sorry, lost my train of thought.");
            }
            other => panic!("expected a turn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_two_blank_generations_abort() {
        let gateway = MockGateway::new();
        gateway.reply("");
        gateway.reply("   ");

        let mut scheduler = TurnScheduler::new("a delayed project", fast_options());
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        let first = scheduler
            .next_turn(&gateway, &mut personas, &mut transcript)
            .await
            .unwrap();
        assert!(matches!(first, TurnOutcome::Empty));

        let second = scheduler
            .next_turn(&gateway, &mut personas, &mut transcript)
            .await
            .unwrap();
        match second {
            TurnOutcome::Stopped(terminal, reason) => {
                assert_eq!(terminal, TerminalState::Aborted);
                assert_eq!(reason, StopReason::EmptyResponse);
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_overlong_reply_truncated() {
        let gateway = MockGateway::new();
        gateway.reply(&"a".repeat(5_000));

        let options = fast_options().with_max_turn_length(100);
        let mut scheduler = TurnScheduler::new("a delayed project", options);
        let mut personas = personas();
        let mut transcript = TranscriptStore::new();

        let outcome = scheduler
            .next_turn(&gateway, &mut personas, &mut transcript)
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Spoke(turn) => assert_eq!(turn.text.chars().count(), 100),
            other => panic!("expected a turn, got {other:?}"),
        }
    }

    #[test]
    fn test_context_window_bounds_request() {
        let scheduler = TurnScheduler::new(
            "a delayed project",
            DialogueOptions::new().with_context_window(2),
        );
        let personas = personas();
        let mut transcript = TranscriptStore::new();
        for i in 0..5 {
            let speaker = if i % 2 == 0 { "Alex" } else { "Sam" };
            transcript
                .append(Turn::new(speaker, format!("line {i}"), i))
                .unwrap();
        }

        let request = scheduler.build_request(&personas[1], &transcript);
        assert_eq!(request.context.len(), 2);
        assert_eq!(request.context[0].text, "line 3");
        assert_eq!(request.context[1].text, "line 4");
    }

    #[test]
    fn test_char_budget_keeps_latest_turn() {
        let scheduler = TurnScheduler::new(
            "a delayed project",
            DialogueOptions::new().with_context_char_budget(10),
        );
        let personas = personas();
        let mut transcript = TranscriptStore::new();
        transcript
            .append(Turn::new("Alex", "x".repeat(500), 0))
            .unwrap();
        transcript
            .append(Turn::new("Sam", "y".repeat(500), 1))
            .unwrap();

        let request = scheduler.build_request(&personas[0], &transcript);
        // The budget fits neither turn, but the latest is always included.
        assert_eq!(request.context.len(), 1);
        assert_eq!(request.context[0].speaker, "Sam");
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let scheduler = TurnScheduler::new(
            "a delayed project",
            DialogueOptions::new().with_retry_backoff(Duration::from_secs(5)),
        );

        let rate_limited = GatewayError::RateLimited {
            retry_after: Some(Duration::from_millis(7)),
        };
        assert_eq!(
            scheduler.retry_delay(&rate_limited, 1),
            Duration::from_millis(7)
        );
        assert_eq!(
            scheduler.retry_delay(&rate_limited, 3),
            Duration::from_millis(7)
        );

        // Without a provider hint the backoff doubles per attempt.
        let timeout = GatewayError::Timeout {
            duration: Duration::from_secs(1),
        };
        assert_eq!(scheduler.retry_delay(&timeout, 1), Duration::from_secs(5));
        assert_eq!(scheduler.retry_delay(&timeout, 2), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_delay_saturates_at_high_attempts() {
        let scheduler = TurnScheduler::new(
            "a delayed project",
            DialogueOptions::new().with_retry_backoff(Duration::from_secs(3600)),
        );
        let timeout = GatewayError::Timeout {
            duration: Duration::from_secs(1),
        };

        // Large retry budgets must not panic on the exponent or the multiply.
        let delay = scheduler.retry_delay(&timeout, 40);
        assert!(delay >= scheduler.retry_delay(&timeout, 17));
    }

    #[test]
    fn test_memory_folded_into_system_prompt() {
        let scheduler = TurnScheduler::new("a delayed project", DialogueOptions::new());
        let mut personas = personas();
        personas[0].record_own_turn("We need to talk about the deadline.");

        let transcript = TranscriptStore::new();
        let request = scheduler.build_request(&personas[0], &transcript);
        assert!(request.system_prompt.starts_with("anxious project manager"));
        assert!(request
            .system_prompt
            .contains("We need to talk about the deadline."));
    }
}
