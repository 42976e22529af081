//! Reasoning oracle: the LLM seen as a request/response capability
//!
//! The orchestrator only needs two calls: free-text generation for handler
//! replies and schema-constrained generation for intent classification.

use crate::error::OrchestrationError;
use crate::models::ChatMessage;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub mod gemini;
pub use gemini::GeminiClient;

/// Free-text oracle reply
#[derive(Debug, Clone, PartialEq)]
pub struct OracleReply {
    pub content: String,
}

/// Trait for LLM access (side-effect free, safe to retry externally)
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn invoke(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<OracleReply>;

    /// Generate JSON conforming to `schema`. Callers validate the shape.
    async fn invoke_structured(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<Value>;
}

/// One scripted oracle outcome
#[derive(Debug, Clone)]
pub enum MockResponse {
    Text(String),
    Json(Value),
    Fail(String),
    /// Sleep, then reply with the inner response
    Delayed(Duration, Box<MockResponse>),
}

/// Scripted oracle for development & testing
/// Keeps the system functional without an API key
#[derive(Default)]
pub struct MockOracle {
    structured: Mutex<VecDeque<MockResponse>>,
    text: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<usize>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a structured (classification) response
    pub fn push_structured(self, response: MockResponse) -> Self {
        self.lock_queue(&self.structured).push_back(response);
        self
    }

    /// Queue a free-text response
    pub fn push_text(self, response: MockResponse) -> Self {
        self.lock_queue(&self.text).push_back(response);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_queue<'a>(
        &self,
        queue: &'a Mutex<VecDeque<MockResponse>>,
    ) -> std::sync::MutexGuard<'a, VecDeque<MockResponse>> {
        queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next(&self, queue: &Mutex<VecDeque<MockResponse>>) -> Option<MockResponse> {
        *self.calls.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        self.lock_queue(queue).pop_front()
    }

    async fn resolve(response: MockResponse) -> Result<Value> {
        let mut current = response;
        loop {
            match current {
                MockResponse::Text(text) => return Ok(Value::String(text)),
                MockResponse::Json(value) => return Ok(value),
                MockResponse::Fail(reason) => return Err(OrchestrationError::Llm(reason)),
                MockResponse::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl ReasoningOracle for MockOracle {
    async fn invoke(&self, _system_prompt: &str, _messages: &[ChatMessage]) -> Result<OracleReply> {
        let Some(response) = self.next(&self.text) else {
            return Err(OrchestrationError::Llm("mock oracle has no scripted text reply".to_string()));
        };

        match Self::resolve(response).await? {
            Value::String(content) => Ok(OracleReply { content }),
            other => Ok(OracleReply { content: other.to_string() }),
        }
    }

    async fn invoke_structured(
        &self,
        _system_prompt: &str,
        _messages: &[ChatMessage],
        _schema: &Value,
    ) -> Result<Value> {
        let Some(response) = self.next(&self.structured) else {
            return Err(OrchestrationError::Llm(
                "mock oracle has no scripted structured reply".to_string(),
            ));
        };

        Self::resolve(response).await
    }
}
