//! Model gateway boundary.
//!
//! The orchestrator depends on the hosted LLM only through this narrow
//! request/response contract. Production code talks to
//! [`AnthropicGateway`](anthropic::AnthropicGateway); tests use the scripted
//! gateway in [`crate::testing`].

pub mod anthropic;

use crate::error::GatewayResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Core trait for model gateways.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Generate the next utterance for the request's speaking persona.
    async fn generate(&self, request: ModelRequest) -> GatewayResult<ModelResponse>;

    /// Name of the backing provider, for diagnostics.
    fn name(&self) -> &str;
}

/// A prior turn included as conversation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    /// Identifier of the persona that spoke.
    pub speaker: String,
    /// What was said.
    pub text: String,
}

/// Request for one turn of generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Speaking persona's style prompt, with its memory summary folded in.
    pub system_prompt: String,

    /// The situation both personas are in.
    pub scenario: String,

    /// Bounded window of prior turns, oldest first.
    pub context: Vec<ContextTurn>,

    /// Upper bound on reply length, in characters.
    pub max_turn_length: usize,
}

/// Response from one turn of generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The generated text; may be blank, which the scheduler treats as an
    /// empty generation rather than a failure.
    pub text: String,
}

impl ModelRequest {
    /// Render the context window as alternating speaker-labeled lines.
    pub fn format_context(&self) -> String {
        let mut lines = String::new();
        for turn in &self.context {
            lines.push_str(&format!("{}: {}\n", turn.speaker, turn.text));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_context() {
        let request = ModelRequest {
            system_prompt: "anxious project manager".into(),
            scenario: "a delayed project".into(),
            context: vec![
                ContextTurn {
                    speaker: "Alex".into(),
                    text: "We're behind schedule.".into(),
                },
                ContextTurn {
                    speaker: "Sam".into(),
                    text: "Let's look at the critical path.".into(),
                },
            ],
            max_turn_length: 800,
        };

        let formatted = request.format_context();
        assert_eq!(
            formatted,
            "Alex: We're behind schedule.\nSam: Let's look at the critical path.\n"
        );
    }
}
