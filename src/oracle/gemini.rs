//! Gemini API client implementing the reasoning oracle
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::OrchestrationError;
use crate::models::{ChatMessage, MessageRole};
use crate::oracle::{OracleReply, ReasoningOracle};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/{}:generateContent", BASE_URL, model),
        })
    }

    async fn generate(&self, request: &GeminiRequest) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::Llm("GEMINI_API_KEY not configured".to_string()));
        }

        let url = format!("{}?key={}", self.endpoint, self.api_key);

        debug!(contents = request.contents.len(), "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::Llm(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::Llm(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::Llm(format!("Gemini parse error: {}", e))
        })?;

        let text = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| OrchestrationError::Llm("Empty response from Gemini".to_string()))?;

        info!(chars = text.len(), "Gemini response received");
        Ok(text)
    }
}

#[async_trait]
impl ReasoningOracle for GeminiClient {
    async fn invoke(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<OracleReply> {
        let request = build_request(system_prompt, messages, None);
        let content = self.generate(&request).await?;
        Ok(OracleReply { content })
    }

    async fn invoke_structured(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<Value> {
        let request = build_request(system_prompt, messages, Some(schema.clone()));
        let raw = self.generate(&request).await?;
        parse_json_reply(&raw)
    }
}

/// Map chat history onto Gemini's user/model turns. System messages are
/// folded into the system instruction, which Gemini keeps separate.
fn build_request(system_prompt: &str, messages: &[ChatMessage], schema: Option<Value>) -> GeminiRequest {
    let mut instruction = system_prompt.to_string();
    let mut contents = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            MessageRole::System => {
                instruction.push_str("\n\n");
                instruction.push_str(&message.content);
            }
            MessageRole::User => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: message.content.clone() }],
            }),
            MessageRole::Assistant => contents.push(Content {
                role: Some("model".to_string()),
                parts: vec![Part { text: message.content.clone() }],
            }),
        }
    }

    let structured = schema.is_some();

    GeminiRequest {
        contents,
        generation_config: GenerationConfig {
            temperature: if structured { 0.0 } else { 0.3 },
            top_p: 0.9,
            top_k: 40,
            max_output_tokens: 1024,
            response_mime_type: structured.then(|| "application/json".to_string()),
            response_schema: schema,
        },
        system_instruction: SystemInstruction {
            parts: vec![Part { text: instruction }],
        },
    }
}

/// Strip optional markdown fences and parse the JSON payload
fn parse_json_reply(raw: &str) -> Result<Value> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| {
        OrchestrationError::Llm(format!("Failed to parse structured Gemini reply: {} | raw={}", e, raw))
    })
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_maps_roles() {
        let messages = vec![
            ChatMessage::user("What is CASS?"),
            ChatMessage::assistant("A health contribution."),
            ChatMessage::system("Awaiting: annual income"),
        ];
        let request = build_request("You route tax requests", &messages, None);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"].as_array().unwrap().len(), 2);
        assert_eq!(json["contents"][1]["role"], "model");
        let instruction = json["system_instruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(instruction.contains("Awaiting: annual income"));
        assert!(json["generation_config"].get("response_schema").is_none());
    }

    #[test]
    fn test_structured_request_carries_schema() {
        let schema = json!({"type": "object"});
        let request = build_request("sys", &[ChatMessage::user("hi")], Some(schema.clone()));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["generation_config"]["response_mime_type"], "application/json");
        assert_eq!(json["generation_config"]["response_schema"], schema);
    }

    #[test]
    fn test_parse_json_reply_strips_fences() {
        let parsed = parse_json_reply("```json\n{\"intent\":\"unclear\"}\n```").unwrap();
        assert_eq!(parsed["intent"], "unclear");
        assert!(parse_json_reply("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_an_llm_error() {
        let client = GeminiClient::new(String::new(), "gemini-2.0-flash").unwrap();
        let result = client.invoke("sys", &[ChatMessage::user("hi")]).await;
        match result {
            Err(OrchestrationError::Llm(msg)) => assert!(msg.contains("GEMINI_API_KEY")),
            other => panic!("expected llm error, got {:?}", other),
        }
    }
}
