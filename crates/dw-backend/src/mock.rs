//! Mock suggester for testing.
//!
//! Replays a scripted sequence of answers and records every line it was
//! asked about, so pipeline tests can run without HTTP.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{BackendError, Suggester};

/// Configurable mock responses for testing.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Answer with this rule text.
    Rule { content: String },
    /// Fail with an API error.
    Error { message: String },
    /// Delay before taking the next response (for backpressure tests).
    Delay { ms: u64 },
}

/// Configuration for a mock suggester.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Sequence of responses, consumed one call at a time.
    pub responses: Vec<MockResponse>,
    /// Answer used once `responses` is exhausted. `None` means error.
    pub fallback_rule: Option<String>,
    /// Optional delay applied to every call (ms).
    pub call_delay_ms: Option<u64>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_fallback(mut self, rule: impl Into<String>) -> Self {
        self.fallback_rule = Some(rule.into());
        self
    }

    pub fn with_call_delay(mut self, ms: u64) -> Self {
        self.call_delay_ms = Some(ms);
        self
    }
}

/// A [`Suggester`] driven by a [`MockConfig`].
pub struct MockSuggester {
    queue: Mutex<VecDeque<MockResponse>>,
    fallback_rule: Option<String>,
    call_delay_ms: Option<u64>,
    calls: Mutex<Vec<String>>,
}

impl MockSuggester {
    pub fn new(config: MockConfig) -> Self {
        Self {
            queue: Mutex::new(config.responses.into()),
            fallback_rule: config.fallback_rule,
            call_delay_ms: config.call_delay_ms,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Lines received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl Suggester for MockSuggester {
    fn name(&self) -> &str {
        "mock"
    }

    async fn suggest(&self, line: &str) -> Result<String, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(line.to_string());
        }

        if let Some(ms) = self.call_delay_ms {
            sleep(Duration::from_millis(ms)).await;
        }

        loop {
            match self.next_response() {
                Some(MockResponse::Rule { content }) => return Ok(content),
                Some(MockResponse::Error { message }) => return Err(BackendError::Api(message)),
                Some(MockResponse::Delay { ms }) => {
                    sleep(Duration::from_millis(ms)).await;
                    // Delay doesn't answer; take the next response
                }
                None => {
                    return self
                        .fallback_rule
                        .clone()
                        .ok_or_else(|| BackendError::Api("mock responses exhausted".to_string()))
                }
            }
        }
    }
}

/// Built-in test fixtures for common scenarios.
pub mod fixtures {
    use super::*;

    /// Answer every call with the same rule.
    pub fn always(rule: &str) -> MockConfig {
        MockConfig::new().with_fallback(rule)
    }

    /// Answer calls with the given rules in order, then error.
    pub fn rules(rules: &[&str]) -> MockConfig {
        let responses = rules
            .iter()
            .map(|rule| MockResponse::Rule {
                content: (*rule).to_string(),
            })
            .collect();
        MockConfig::new().with_responses(responses)
    }

    /// Fail the first call, then answer every call with `rule`.
    pub fn error_then(error: &str, rule: &str) -> MockConfig {
        MockConfig::new()
            .with_responses(vec![MockResponse::Error {
                message: error.to_string(),
            }])
            .with_fallback(rule)
    }
}
