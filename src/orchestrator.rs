//! Dialogue orchestration - the primary public API.
//!
//! `DialogueOrchestrator` composes the turn scheduler, the transcript store,
//! and both persona states into a run loop that produces a finished
//! transcript. Gateway failures never escape as errors: `run` returns an
//! outcome with an explicit terminal state and stop reason, and only
//! malformed caller input fails synchronously before any gateway call.

use crate::error::{ConfigurationError, Error, Result, ValidationError};
use crate::gateway::ModelGateway;
use crate::id::ConversationId;
use crate::options::DialogueOptions;
use crate::persona::{PersonaConfig, PersonaState};
use crate::scheduler::{StopReason, TerminalState, TurnOutcome, TurnScheduler};
use crate::transcript::{Transcript, TranscriptStore, Turn};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Result of one finished conversation.
#[derive(Debug, Clone)]
pub struct DialogueOutcome {
    /// Identifier of this conversation.
    pub conversation_id: ConversationId,

    /// The full ordered transcript.
    pub transcript: Transcript,

    /// Whether the conversation completed or aborted.
    pub terminal: TerminalState,

    /// Which stop condition ended it.
    pub stop_reason: StopReason,
}

/// Event emitted by a streaming run.
#[derive(Debug, Clone)]
pub enum DialogueEvent {
    /// A turn was generated and appended to the transcript.
    Turn(Turn),

    /// The conversation ended; no further events follow.
    Finished {
        /// Whether the conversation completed or aborted.
        terminal: TerminalState,
        /// Which stop condition ended it.
        stop_reason: StopReason,
    },
}

/// Lazy, finite stream of [`DialogueEvent`]s from one conversation.
///
/// Dropping the stream cancels the underlying conversation at the next turn
/// boundary.
#[derive(Debug)]
pub struct DialogueStream {
    conversation_id: ConversationId,
    events: ReceiverStream<DialogueEvent>,
    cancel: CancellationToken,
}

impl DialogueStream {
    /// Identifier of the conversation backing this stream.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Token that cancels the conversation at the next turn boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for DialogueStream {
    type Item = DialogueEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

impl Drop for DialogueStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drives two personas through a conversation, one gateway call per turn.
///
/// The orchestrator holds only the shared gateway; all per-conversation
/// state is function-local, so one orchestrator can serve many concurrent
/// conversations.
pub struct DialogueOrchestrator {
    gateway: Arc<dyn ModelGateway>,
}

impl DialogueOrchestrator {
    /// Create an orchestrator over the given gateway.
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }

    /// Run one conversation to a terminal state.
    pub async fn run(
        &self,
        scenario: &str,
        persona_a: PersonaConfig,
        persona_b: PersonaConfig,
        options: DialogueOptions,
    ) -> Result<DialogueOutcome> {
        self.run_with_cancellation(
            scenario,
            persona_a,
            persona_b,
            options,
            CancellationToken::new(),
        )
        .await
    }

    /// Run one conversation, observing `cancel` at each turn boundary.
    ///
    /// Cancellation never interrupts an in-flight gateway call; it takes
    /// effect before the next turn and yields an aborted outcome.
    pub async fn run_with_cancellation(
        &self,
        scenario: &str,
        persona_a: PersonaConfig,
        persona_b: PersonaConfig,
        options: DialogueOptions,
        cancel: CancellationToken,
    ) -> Result<DialogueOutcome> {
        let (scenario, mut personas) = prepare(scenario, persona_a, persona_b, &options)?;
        let conversation_id = ConversationId::new();
        let span = tracing::info_span!("dialogue", conversation = %conversation_id);

        let mut scheduler = TurnScheduler::new(&scenario, options);
        let mut transcript = TranscriptStore::new();

        let (terminal, stop_reason) = drive(
            self.gateway.as_ref(),
            &mut scheduler,
            &mut personas,
            &mut transcript,
            &cancel,
            None,
        )
        .instrument(span)
        .await?;

        Ok(DialogueOutcome {
            conversation_id,
            transcript: transcript.snapshot(),
            terminal,
            stop_reason,
        })
    }

    /// Continue a conversation from a previously returned transcript.
    ///
    /// The snapshot is re-validated against the transcript invariants, both
    /// personas' memories are replayed from it, and `max_turns` counts total
    /// transcript turns, not newly generated ones.
    pub async fn resume(
        &self,
        snapshot: Transcript,
        scenario: &str,
        persona_a: PersonaConfig,
        persona_b: PersonaConfig,
        options: DialogueOptions,
    ) -> Result<DialogueOutcome> {
        let (scenario, mut personas) = prepare(scenario, persona_a, persona_b, &options)?;

        for turn in snapshot.turns() {
            let persona = personas
                .iter_mut()
                .find(|p| p.identifier() == turn.speaker)
                .ok_or_else(|| ConfigurationError::UnknownSnapshotSpeaker {
                    sequence: turn.sequence,
                    speaker: turn.speaker.clone(),
                })?;
            persona.record_own_turn(&turn.text);
        }

        let conversation_id = ConversationId::new();
        let span = tracing::info_span!("dialogue", conversation = %conversation_id, resumed = true);

        let mut scheduler = TurnScheduler::new(&scenario, options);
        let mut transcript = TranscriptStore::from_snapshot(snapshot)?;

        let cancel = CancellationToken::new();
        let (terminal, stop_reason) = drive(
            self.gateway.as_ref(),
            &mut scheduler,
            &mut personas,
            &mut transcript,
            &cancel,
            None,
        )
        .instrument(span)
        .await?;

        Ok(DialogueOutcome {
            conversation_id,
            transcript: transcript.snapshot(),
            terminal,
            stop_reason,
        })
    }

    /// Run one conversation, yielding each turn as it is generated.
    ///
    /// Validation failures are returned synchronously; afterwards the
    /// conversation runs on a spawned task and every generated turn arrives
    /// as an event, terminated by [`DialogueEvent::Finished`].
    pub fn run_streaming(
        &self,
        scenario: &str,
        persona_a: PersonaConfig,
        persona_b: PersonaConfig,
        options: DialogueOptions,
    ) -> Result<DialogueStream> {
        let (scenario, mut personas) = prepare(scenario, persona_a, persona_b, &options)?;
        let conversation_id = ConversationId::new();
        let span = tracing::info_span!("dialogue", conversation = %conversation_id);

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let gateway = Arc::clone(&self.gateway);
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(
            async move {
                let mut scheduler = TurnScheduler::new(&scenario, options);
                let mut transcript = TranscriptStore::new();

                match drive(
                    gateway.as_ref(),
                    &mut scheduler,
                    &mut personas,
                    &mut transcript,
                    &task_cancel,
                    Some(&tx),
                )
                .await
                {
                    Ok((terminal, stop_reason)) => {
                        let _ = tx
                            .send(DialogueEvent::Finished {
                                terminal,
                                stop_reason,
                            })
                            .await;
                    }
                    Err(err) => {
                        // Transcript invariant violation: a bug, not a
                        // runtime condition. Surface it loudly and end the
                        // stream.
                        tracing::error!(error = %err, "transcript invariant violated");
                    }
                }
            }
            .instrument(span),
        );

        Ok(DialogueStream {
            conversation_id,
            events: ReceiverStream::new(rx),
            cancel,
        })
    }
}

/// Validate caller input and build the persona pair.
fn prepare(
    scenario: &str,
    persona_a: PersonaConfig,
    persona_b: PersonaConfig,
    options: &DialogueOptions,
) -> Result<(String, [PersonaState; 2])> {
    let scenario = scenario.trim();
    if scenario.is_empty() {
        return Err(ValidationError::EmptyScenario.into());
    }

    let a = PersonaState::new(persona_a)?.with_memory_turns(options.memory_turns);
    let b = PersonaState::new(persona_b)?.with_memory_turns(options.memory_turns);

    if a.identifier() == b.identifier() {
        return Err(ConfigurationError::DuplicateIdentifier {
            identifier: a.identifier().to_string(),
        }
        .into());
    }

    Ok((scenario.to_string(), [a, b]))
}

/// Run the turn loop until a stop condition or cancellation fires.
async fn drive(
    gateway: &dyn ModelGateway,
    scheduler: &mut TurnScheduler,
    personas: &mut [PersonaState; 2],
    transcript: &mut TranscriptStore,
    cancel: &CancellationToken,
    events: Option<&mpsc::Sender<DialogueEvent>>,
) -> std::result::Result<(TerminalState, StopReason), Error> {
    loop {
        if cancel.is_cancelled() {
            tracing::info!("cancellation observed at turn boundary");
            return Ok(scheduler.cancel());
        }

        match scheduler.next_turn(gateway, personas, transcript).await? {
            TurnOutcome::Spoke(turn) => {
                if let Some(tx) = events {
                    // A dropped receiver is not an error; the loop still
                    // runs to its stop condition unless cancelled.
                    let _ = tx.send(DialogueEvent::Turn(turn)).await;
                }
            }
            TurnOutcome::Empty => {}
            TurnOutcome::Stopped(terminal, stop_reason) => {
                tracing::info!(?terminal, ?stop_reason, turns = transcript.len(), "conversation over");
                return Ok((terminal, stop_reason));
            }
        }
    }
}
