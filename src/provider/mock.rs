//! Mock provider for testing
//!
//! Returns configurable responses without making real API calls.
//! Resolution order per request: matching rule, then queue, then default.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Completion, CompletionRequest, ModelProvider};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    /// Matched against the user prompt
    needle: String,
    reply: Reply,
}

/// Mock provider that returns predefined responses
#[derive(Clone)]
pub struct MockProvider {
    rules: Arc<Mutex<Vec<Rule>>>,
    /// Queue of responses to return (FIFO)
    responses: Arc<Mutex<Vec<String>>>,
    /// Default response when nothing else matches
    default_response: String,
    /// Artificial latency per call
    delay: Option<Duration>,
    /// Track all requests made (for assertions)
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    /// Create a new mock provider with a fixed default response
    pub fn new() -> Self {
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "Mock response".to_string(),
            delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create with a queue of responses
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        provider
            .responses
            .lock()
            .extend(responses.into_iter().map(Into::into));
        provider
    }

    /// Set the default response when nothing else matches
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reply with `response` whenever the user prompt contains `needle`
    pub fn on_prompt_containing(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.into(),
            reply: Reply::Text(response.into()),
        });
        self
    }

    /// Fail whenever the user prompt contains `needle`
    pub fn fail_on_prompt_containing(self, needle: impl Into<String>, error: impl Into<String>) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.into(),
            reply: Reply::Fail(error.into()),
        });
        self
    }

    /// Add a response to the queue
    pub fn queue_response(&self, response: impl Into<String>) {
        self.responses.lock().push(response.into());
    }

    /// Get all requests made to this provider
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().last().cloned()
    }

    /// First request whose user prompt contains `needle`
    pub fn request_containing(&self, needle: &str) -> Option<CompletionRequest> {
        self.requests
            .lock()
            .iter()
            .find(|r| r.user_prompt.contains(needle))
            .cloned()
    }

    fn next_reply(&self, request: &CompletionRequest) -> Reply {
        let rule = self
            .rules
            .lock()
            .iter()
            .find(|r| request.user_prompt.contains(&r.needle))
            .map(|r| r.reply.clone());
        if let Some(reply) = rule {
            return reply;
        }

        let mut queue = self.responses.lock();
        if queue.is_empty() {
            Reply::Text(self.default_response.clone())
        } else {
            Reply::Text(queue.remove(0))
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(&request) {
            Reply::Text(text) => Ok(Completion::estimated(text, request.prompt_len())),
            Reply::Fail(error) => bail!(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest::new("mock-model", "system", prompt)
    }

    #[tokio::test]
    async fn default_response() {
        let provider = MockProvider::new();
        let c = provider.complete(request("Hello")).await.unwrap();
        assert_eq!(c.content, "Mock response");
        assert!(c.usage_tokens > 0);
    }

    #[tokio::test]
    async fn queued_responses_then_default() {
        let provider = MockProvider::with_responses(["First", "Second"]);

        let r1 = provider.complete(request("a")).await.unwrap();
        let r2 = provider.complete(request("b")).await.unwrap();
        let r3 = provider.complete(request("c")).await.unwrap();

        assert_eq!(r1.content, "First");
        assert_eq!(r2.content, "Second");
        assert_eq!(r3.content, "Mock response");
    }

    #[tokio::test]
    async fn rules_take_precedence_over_queue() {
        let provider = MockProvider::with_responses(["queued"])
            .on_prompt_containing("weather", "sunny")
            .fail_on_prompt_containing("explode", "provider down");

        assert_eq!(provider.complete(request("the weather")).await.unwrap().content, "sunny");
        let err = provider.complete(request("explode now")).await.unwrap_err();
        assert_eq!(err.to_string(), "provider down");
        assert_eq!(provider.complete(request("other")).await.unwrap().content, "queued");
    }

    #[tokio::test]
    async fn records_requests() {
        let provider = MockProvider::new().with_default("ok");
        provider.complete(request("first prompt")).await.unwrap();
        provider.complete(request("second prompt")).await.unwrap();

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.last_request().unwrap().user_prompt, "second prompt");
        assert!(provider.request_containing("first").is_some());
        assert!(provider.request_containing("third").is_none());
    }

    #[tokio::test]
    async fn clones_share_recorded_requests() {
        let provider = MockProvider::new();
        let clone = provider.clone();
        clone.complete(request("x")).await.unwrap();
        assert_eq!(provider.requests().len(), 1);
    }
}
