//! Core data models for the tax conversation orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Intent =================
//

/// Closed set of labels the classifier may emit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PfaD212Filing,
    PfaCasCass,
    PropertySaleTax,
    RentalContractRegistration,
    FiscalCertificate,
    EfacturaB2b,
    EfacturaB2c,
    GeneralQuestion,
    Unclear,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::PfaD212Filing,
        Intent::PfaCasCass,
        Intent::PropertySaleTax,
        Intent::RentalContractRegistration,
        Intent::FiscalCertificate,
        Intent::EfacturaB2b,
        Intent::EfacturaB2c,
        Intent::GeneralQuestion,
        Intent::Unclear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::PfaD212Filing => "pfa_d212_filing",
            Intent::PfaCasCass => "pfa_cas_cass",
            Intent::PropertySaleTax => "property_sale_tax",
            Intent::RentalContractRegistration => "rental_contract_registration",
            Intent::FiscalCertificate => "fiscal_certificate",
            Intent::EfacturaB2b => "efactura_b2b",
            Intent::EfacturaB2c => "efactura_b2c",
            Intent::GeneralQuestion => "general_question",
            Intent::Unclear => "unclear",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Handlers =================
//

/// Fixed enumeration of handlers the router can select.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandlerId {
    Pfa,
    PropertySale,
    RentalIncome,
    Certificate,
    Efactura,
    TaxKnowledge,
    Clarification,
}

impl HandlerId {
    pub const ALL: [HandlerId; 7] = [
        HandlerId::Pfa,
        HandlerId::PropertySale,
        HandlerId::RentalIncome,
        HandlerId::Certificate,
        HandlerId::Efactura,
        HandlerId::TaxKnowledge,
        HandlerId::Clarification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerId::Pfa => "pfa",
            HandlerId::PropertySale => "property_sale",
            HandlerId::RentalIncome => "rental_income",
            HandlerId::Certificate => "certificate",
            HandlerId::Efactura => "efactura",
            HandlerId::TaxKnowledge => "tax_knowledge",
            HandlerId::Clarification => "clarification",
        }
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Workflow =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Awaiting fresh user input
    #[default]
    Pending,
    InProgress,
    Completed,
    Error,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Error => "error",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub message_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvoiceType {
    #[serde(rename = "B2B", alias = "b2b")]
    B2b,
    #[serde(rename = "B2C", alias = "b2c")]
    B2c,
}

/// Typed values the classifier recognised in the utterance.
///
/// Every field is optional: a missing field is `None`, a field of the wrong
/// type fails deserialization of the whole classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtractedEntities {
    #[serde(default)]
    pub annual_income: Option<f64>,
    #[serde(default)]
    pub property_value: Option<f64>,
    #[serde(default)]
    pub ownership_years: Option<u32>,
    #[serde(default)]
    pub monthly_rent: Option<f64>,
    #[serde(default)]
    pub invoice_type: Option<InvoiceType>,
    #[serde(default)]
    pub certificate_type: Option<String>,
    #[serde(default)]
    pub cnp_cui: Option<String>,
    #[serde(default)]
    pub seller_cui: Option<String>,
    #[serde(default)]
    pub upload_index: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<i32>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        *self == ExtractedEntities::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default, alias = "reasoning")]
    pub rationale: String,
    #[serde(default)]
    pub extracted_entities: ExtractedEntities,
}

impl Classification {
    /// Fail-closed result used whenever the oracle cannot be trusted.
    pub fn unclear(rationale: impl Into<String>) -> Self {
        Self {
            intent: Intent::Unclear,
            confidence: 0.0,
            rationale: rationale.into(),
            extracted_entities: ExtractedEntities::default(),
        }
    }
}

//
// ================= Entry contract =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub utterance: String,
    /// Optional reference to an uploaded document (path or object key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, utterance: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            utterance: utterance.into(),
            document: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResponse {
    pub session_id: String,
    pub response_text: String,
    pub detected_intent: Option<Intent>,
    pub intent_confidence: f64,
    pub workflow_status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<HandlerId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_labels_round_trip_through_serde() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.as_str()));
        }
    }

    #[test]
    fn test_unknown_intent_label_is_rejected() {
        let raw = r#"{"intent":"crypto_tax","confidence":0.9,"rationale":"x"}"#;
        assert!(serde_json::from_str::<Classification>(raw).is_err());
    }

    #[test]
    fn test_missing_entities_are_not_an_error() {
        let raw = r#"{"intent":"pfa_cas_cass","confidence":0.92,"reasoning":"income"}"#;
        let parsed: Classification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.intent, Intent::PfaCasCass);
        assert_eq!(parsed.rationale, "income");
        assert!(parsed.extracted_entities.is_empty());
    }

    #[test]
    fn test_malformed_entity_is_distinguished_from_missing() {
        let raw = r#"{
            "intent": "pfa_cas_cass",
            "confidence": 0.9,
            "rationale": "",
            "extracted_entities": { "annual_income": "a lot" }
        }"#;
        assert!(serde_json::from_str::<Classification>(raw).is_err());

        let nulls = r#"{
            "intent": "pfa_cas_cass",
            "confidence": 0.9,
            "rationale": "",
            "extracted_entities": { "annual_income": null, "invoice_type": "B2B" }
        }"#;
        let parsed: Classification = serde_json::from_str(nulls).unwrap();
        assert_eq!(parsed.extracted_entities.annual_income, None);
        assert_eq!(parsed.extracted_entities.invoice_type, Some(InvoiceType::B2b));
    }
}
