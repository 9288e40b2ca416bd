//! Testing utilities.
//!
//! Provides `MockGateway`, a scripted [`ModelGateway`] for deterministic
//! tests without API calls. Replies are consumed in order; once the script
//! runs out, the gateway produces numbered placeholder lines so dialogue
//! loops can run to their stop conditions.

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{ModelGateway, ModelRequest, ModelResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A model gateway that returns scripted replies.
pub struct MockGateway {
    script: Mutex<VecDeque<GatewayResult<String>>>,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    /// Create a gateway with an empty script.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    /// Make every `generate` call sleep before answering, to simulate a
    /// slow provider.
    pub fn delay_replies(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    /// Queue a successful reply.
    pub fn reply(&self, text: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Ok(text.into()));
    }

    /// Queue several successful replies.
    pub fn replies<I, S>(&self, texts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for text in texts {
            self.reply(text);
        }
    }

    /// Queue a failure.
    pub fn fail(&self, error: GatewayError) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Err(error));
    }

    /// Queue the same failure `count` times.
    pub fn fail_times(&self, error: GatewayError, count: usize) {
        for _ in 0..count {
            self.fail(error.clone());
        }
    }

    /// Number of `generate` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests recorded so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// The most recent request, if any call was made.
    pub fn last_request(&self) -> Option<ModelRequest> {
        self.requests.lock().expect("requests lock").last().cloned()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn generate(&self, request: ModelRequest) -> GatewayResult<ModelResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);

        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.lock().expect("script lock").pop_front() {
            Some(Ok(text)) => Ok(ModelResponse { text }),
            Some(Err(error)) => Err(error),
            None => Ok(ModelResponse {
                text: format!("scripted reply {call}"),
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
