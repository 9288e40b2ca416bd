//! Anthropic-backed model gateway.
//!
//! Minimal client for Claude's Messages API, exposed through the
//! [`ModelGateway`] trait. Only non-streaming text completion is used;
//! each dialogue turn is a single request.

use super::{ModelGateway, ModelRequest, ModelResponse};
use crate::error::{ConfigurationError, GatewayError, GatewayResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Rough characters-per-token ratio used to size `max_tokens` from the
/// requested turn length.
const CHARS_PER_TOKEN: usize = 3;

/// Model gateway backed by the Anthropic Messages API.
pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: Option<f32>,
}

impl AnthropicGateway {
    /// Create a new gateway with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            temperature: Some(0.8),
        }
    }

    /// Create a gateway from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ConfigurationError::MissingApiKey {
                variable: "ANTHROPIC_API_KEY",
            }
        })?;
        Ok(Self::new(api_key))
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature (clamped to 0.0..=1.0).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    fn build_headers(&self) -> GatewayResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|e| GatewayError::InvalidRequest {
                message: format!("invalid API key: {e}"),
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_api_request(&self, request: &ModelRequest) -> ApiRequest {
        let mut system = request.system_prompt.clone();
        system.push_str("\n\n## Situation\n");
        system.push_str(&request.scenario);
        system.push_str(
            "\n\nStay in character and reply with your next spoken line only, \
             without narration or speaker labels.",
        );

        let mut prompt = String::new();
        if request.context.is_empty() {
            prompt.push_str("Open the conversation with your first line.");
        } else {
            prompt.push_str("The conversation so far:\n\n");
            prompt.push_str(&request.format_context());
            prompt.push_str("\nReply with your next line.");
        }
        prompt.push_str(&format!(
            "\nKeep it under {} characters.",
            request.max_turn_length
        ));

        ApiRequest {
            model: self.model.clone(),
            max_tokens: (request.max_turn_length / CHARS_PER_TOKEN).max(256),
            system,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: self.temperature,
        }
    }
}

/// Map an HTTP error status to the gateway failure taxonomy.
fn classify_status(status: u16, body: String) -> GatewayError {
    match status {
        400 => GatewayError::InvalidRequest { message: body },
        408 => GatewayError::Timeout {
            duration: Duration::from_secs(0),
        },
        429 | 529 => GatewayError::RateLimited { retry_after: None },
        _ => GatewayError::Unknown {
            message: format!("API error (status {status}): {body}"),
        },
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn generate(&self, request: ModelRequest) -> GatewayResult<ModelResponse> {
        let headers = self.build_headers()?;
        let api_request = self.build_api_request(&request);

        let response = self
            .client
            .post(format!("{API_BASE}/messages"))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        duration: Duration::from_secs(120),
                    }
                } else {
                    GatewayError::Unknown {
                        message: format!("network error: {e}"),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();

            let mut error = classify_status(status, body);
            if let GatewayError::RateLimited {
                retry_after: ref mut slot,
            } = error
            {
                *slot = retry_after;
            }
            return Err(error);
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| GatewayError::Unknown {
                message: format!("failed to parse response: {e}"),
            })?;

        let text = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ApiContent::Text { text } => Some(text),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ModelResponse { text })
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// API request/response types

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    system: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ContextTurn;

    fn sample_request() -> ModelRequest {
        ModelRequest {
            system_prompt: "calm engineer".into(),
            scenario: "two coworkers discussing a delayed project".into(),
            context: vec![ContextTurn {
                speaker: "Alex".into(),
                text: "We're slipping again.".into(),
            }],
            max_turn_length: 900,
        }
    }

    #[test]
    fn test_gateway_name() {
        let gateway = AnthropicGateway::new("test-key");
        assert_eq!(gateway.name(), "anthropic");
    }

    #[test]
    fn test_api_request_shape() {
        let gateway = AnthropicGateway::new("test-key").with_temperature(0.5);
        let api = gateway.build_api_request(&sample_request());

        assert_eq!(api.model, DEFAULT_MODEL);
        assert_eq!(api.max_tokens, 300);
        assert_eq!(api.temperature, Some(0.5));
        assert!(api.system.contains("calm engineer"));
        assert!(api.system.contains("delayed project"));
        assert_eq!(api.messages.len(), 1);
        assert!(api.messages[0].content.contains("Alex: We're slipping again."));
    }

    #[test]
    fn test_opening_prompt_when_no_context() {
        let gateway = AnthropicGateway::new("test-key");
        let mut request = sample_request();
        request.context.clear();

        let api = gateway.build_api_request(&request);
        assert!(api.messages[0].content.contains("Open the conversation"));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(400, String::new()),
            GatewayError::InvalidRequest { .. }
        ));
        assert!(matches!(
            classify_status(429, String::new()),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(500, String::new()),
            GatewayError::Unknown { .. }
        ));
    }
}
