//! Two-persona dialogue orchestration over a pluggable model gateway.
//!
//! This crate provides:
//! - Strict-alternation transcripts with contiguous sequence numbers
//! - Bounded per-persona rolling memory folded into each prompt
//! - A turn scheduler with retries, backoff, and explicit stop conditions
//! - Streaming, cancellation, and resume-from-snapshot
//!
//! # Quick Start
//!
//! ```ignore
//! use duologue::{
//!     AnthropicGateway, DialogueOptions, DialogueOrchestrator, PersonaConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Arc::new(AnthropicGateway::from_env()?);
//!     let orchestrator = DialogueOrchestrator::new(gateway);
//!
//!     let outcome = orchestrator
//!         .run(
//!             "Two colleagues argue about a slipping deadline",
//!             PersonaConfig::new("Alex", "You are an anxious project manager."),
//!             PersonaConfig::new("Sam", "You are a calm, methodical engineer."),
//!             DialogueOptions::new().with_max_turns(8),
//!         )
//!         .await?;
//!
//!     for turn in &outcome.transcript {
//!         println!("{}: {}", turn.speaker, turn.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod gateway;
pub mod id;
pub mod options;
pub mod orchestrator;
pub mod persona;
pub mod scheduler;
pub mod testing;
pub mod transcript;

// Primary public API
pub use error::{
    ConfigurationError, Error, GatewayError, GatewayResult, OrderingError, Result,
    ValidationError,
};
pub use gateway::anthropic::AnthropicGateway;
pub use gateway::{ContextTurn, ModelGateway, ModelRequest, ModelResponse};
pub use id::ConversationId;
pub use options::{DialogueOptions, OpeningSpeaker};
pub use orchestrator::{DialogueEvent, DialogueOrchestrator, DialogueOutcome, DialogueStream};
pub use persona::{PersonaConfig, PersonaState};
pub use scheduler::{SchedulerState, StopReason, TerminalState, TurnOutcome, TurnScheduler};
pub use transcript::{Transcript, TranscriptStore, Turn};
