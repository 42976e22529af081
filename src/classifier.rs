//! Intent Classifier
//!
//! Wraps the reasoning oracle to turn the latest utterance into a typed
//! [`Classification`]. One oracle call per entry turn, no retries.
//! Every oracle-side failure fails closed to `unclear` with confidence 0.

use crate::error::OrchestrationError;
use crate::models::{ChatMessage, Classification, Intent};
use crate::oracle::ReasoningOracle;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CLASSIFIER_SYSTEM_PROMPT: &str = "You are the entry point of a Romanian tax services assistant.
Classify the user's latest message into exactly one intent label and extract any values it states.

Services:
- pfa_d212_filing: PFA / freelancer annual declaration (D212, declaratia unica)
- pfa_cas_cass: PFA pension (CAS) and health (CASS) contributions
- property_sale_tax: tax owed when selling a property (depends on ownership years)
- rental_contract_registration: rental income and registering a rental contract
- fiscal_certificate: fiscal attestation certificate (certificat de atestare fiscala)
- efactura_b2b: electronic invoicing between companies
- efactura_b2c: electronic invoicing to consumers
- general_question: any other question about Romanian tax law
- unclear: the request cannot be mapped to a service

Confidence is a number between 0 and 1. Only fill extracted_entities fields the user actually stated.";

/// Result of one classification attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    pub classification: Classification,
    /// Why the oracle result was discarded, when it was
    pub failure: Option<String>,
}

impl ClassificationOutcome {
    fn accepted(classification: Classification) -> Self {
        Self {
            classification,
            failure: None,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            classification: Classification::unclear(format!("classification failed: {}", reason)),
            failure: Some(reason),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct IntentClassifier {
    oracle: Arc<dyn ReasoningOracle>,
    timeout: Duration,
    history_window: usize,
}

impl IntentClassifier {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, timeout: Duration) -> Self {
        Self {
            oracle,
            timeout,
            history_window: 10,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Classify `utterance` given the messages that preceded it.
    ///
    /// `awaiting` lists the `awaiting_*` flags currently raised so a bare
    /// follow-up ("150000") is read against what is still missing.
    /// Only an empty utterance is an error; oracle trouble is reported in
    /// [`ClassificationOutcome::failure`].
    pub async fn classify(
        &self,
        utterance: &str,
        prior_messages: &[ChatMessage],
        awaiting: &[&str],
    ) -> Result<ClassificationOutcome> {
        if utterance.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "utterance must not be empty".to_string(),
            ));
        }

        let start = prior_messages.len().saturating_sub(self.history_window);
        let mut messages: Vec<ChatMessage> = prior_messages[start..].to_vec();
        messages.push(ChatMessage::user(utterance));

        let prompt = build_prompt(awaiting);
        let schema = classification_schema();

        debug!(history = messages.len(), awaiting = ?awaiting, "Classifying utterance");

        let raw = match tokio::time::timeout(
            self.timeout,
            self.oracle.invoke_structured(&prompt, &messages, &schema),
        )
        .await
        {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(error = %e, "Oracle classification failed");
                return Ok(ClassificationOutcome::failed(format!("oracle error: {}", e)));
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Oracle classification timed out");
                let timeout = OrchestrationError::Timeout(self.timeout.as_millis() as u64);
                return Ok(ClassificationOutcome::failed(timeout.to_string()));
            }
        };

        match validate(raw) {
            Ok(classification) => {
                info!(
                    intent = %classification.intent,
                    confidence = classification.confidence,
                    "Utterance classified"
                );
                Ok(ClassificationOutcome::accepted(classification))
            }
            Err(e) => {
                warn!(error = %e, "Oracle returned an invalid classification");
                Ok(ClassificationOutcome::failed(e.to_string()))
            }
        }
    }
}

fn build_prompt(awaiting: &[&str]) -> String {
    if awaiting.is_empty() {
        return CLASSIFIER_SYSTEM_PROMPT.to_string();
    }

    format!(
        "{}\n\nThe conversation is waiting for: {}. A short answer most likely supplies that data.",
        CLASSIFIER_SYSTEM_PROMPT,
        awaiting.join(", ")
    )
}

fn validate(raw: Value) -> Result<Classification> {
    let classification: Classification = serde_json::from_value(raw)
        .map_err(|e| OrchestrationError::Classification(format!("invalid schema: {}", e)))?;

    if !classification.confidence.is_finite() || !(0.0..=1.0).contains(&classification.confidence) {
        return Err(OrchestrationError::Classification(format!(
            "invalid schema: confidence {} outside [0, 1]",
            classification.confidence
        )));
    }

    Ok(classification)
}

/// JSON schema handed to the oracle for structured output
pub fn classification_schema() -> Value {
    let labels: Vec<&str> = Intent::ALL.iter().map(Intent::as_str).collect();

    json!({
        "type": "object",
        "properties": {
            "intent": { "type": "string", "enum": labels },
            "confidence": { "type": "number" },
            "rationale": { "type": "string" },
            "extracted_entities": {
                "type": "object",
                "properties": {
                    "annual_income": { "type": "number", "nullable": true },
                    "property_value": { "type": "number", "nullable": true },
                    "ownership_years": { "type": "integer", "nullable": true },
                    "monthly_rent": { "type": "number", "nullable": true },
                    "invoice_type": { "type": "string", "enum": ["B2B", "B2C"], "nullable": true },
                    "certificate_type": { "type": "string", "nullable": true },
                    "cnp_cui": { "type": "string", "nullable": true },
                    "seller_cui": { "type": "string", "nullable": true },
                    "upload_index": { "type": "string", "nullable": true },
                    "fiscal_year": { "type": "integer", "nullable": true }
                }
            }
        },
        "required": ["intent", "confidence", "rationale"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MockOracle, MockResponse};

    fn classifier(oracle: MockOracle) -> IntentClassifier {
        IntentClassifier::new(Arc::new(oracle), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_valid_classification_is_accepted() {
        let oracle = MockOracle::new().push_structured(MockResponse::Json(json!({
            "intent": "pfa_cas_cass",
            "confidence": 0.92,
            "rationale": "PFA income mentioned",
            "extracted_entities": { "annual_income": 150000 }
        })));

        let outcome = classifier(oracle)
            .classify("I have a PFA and earned 150000 last year", &[], &[])
            .await
            .unwrap();

        assert!(!outcome.is_failure());
        assert_eq!(outcome.classification.intent, Intent::PfaCasCass);
        assert_eq!(outcome.classification.extracted_entities.annual_income, Some(150000.0));
    }

    #[tokio::test]
    async fn test_timeout_fails_closed() {
        let oracle = MockOracle::new().push_structured(MockResponse::Delayed(
            Duration::from_millis(500),
            Box::new(MockResponse::Json(json!({"intent": "pfa_cas_cass", "confidence": 0.9, "rationale": ""}))),
        ));

        let outcome = classifier(oracle).classify("PFA taxes", &[], &[]).await.unwrap();

        assert_eq!(outcome.classification.intent, Intent::Unclear);
        assert_eq!(outcome.classification.confidence, 0.0);
        assert_eq!(outcome.failure, Some(OrchestrationError::Timeout(100).to_string()));
    }

    #[tokio::test]
    async fn test_invalid_schema_fails_closed() {
        let cases = vec![
            json!({"intent": "crypto", "confidence": 0.9, "rationale": ""}),
            json!({"intent": "pfa_cas_cass", "confidence": 1.7, "rationale": ""}),
            json!({"intent": "pfa_cas_cass", "confidence": 0.9, "rationale": "",
                   "extracted_entities": {"annual_income": "lots"}}),
            json!("not an object"),
        ];

        for case in cases {
            let oracle = MockOracle::new().push_structured(MockResponse::Json(case.clone()));
            let outcome = classifier(oracle).classify("hello", &[], &[]).await.unwrap();
            assert_eq!(outcome.classification.intent, Intent::Unclear, "case {}", case);
            assert!(outcome.failure.unwrap().starts_with("Classification error: invalid schema"));
        }
    }

    #[tokio::test]
    async fn test_oracle_error_fails_closed() {
        let oracle = MockOracle::new().push_structured(MockResponse::Fail("rate limited".into()));
        let outcome = classifier(oracle).classify("hello", &[], &[]).await.unwrap();
        assert_eq!(outcome.classification.confidence, 0.0);
        assert!(outcome.failure.unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_empty_utterance_is_rejected_without_calling_oracle() {
        let oracle = Arc::new(MockOracle::new());
        let classifier = IntentClassifier::new(oracle.clone(), Duration::from_millis(100));

        let result = classifier.classify("   ", &[], &[]).await;

        assert!(matches!(result, Err(OrchestrationError::InvalidRequest(_))));
        assert_eq!(oracle.call_count(), 0);
    }

    #[test]
    fn test_prompt_lists_awaiting_flags() {
        let prompt = build_prompt(&["awaiting_income_data"]);
        assert!(prompt.contains("awaiting_income_data"));
        assert_eq!(build_prompt(&[]), CLASSIFIER_SYSTEM_PROMPT);
    }

    #[test]
    fn test_schema_enumerates_every_label() {
        let schema = classification_schema();
        let labels = schema["properties"]["intent"]["enum"].as_array().unwrap();
        assert_eq!(labels.len(), Intent::ALL.len());
    }
}
