//! Conversation state and its persistence
//!
//! `ConversationState` is the durable record of one session. It changes only
//! through the methods here: messages are appended, never rewritten, and the
//! shared context is merged, never replaced.

use crate::models::{ChatMessage, Classification, HandlerId, Intent, InvoiceType, MessageRole, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod context;
pub mod postgres;
pub mod store;

pub use context::{keys, ContextPatch, SharedContext};
pub use postgres::PostgresSessionStore;
pub use store::{InMemorySessionStore, SessionGuard, SessionLocks, SessionStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    messages: Vec<ChatMessage>,
    pub shared_context: SharedContext,
    pub current_handler: Option<HandlerId>,
    pub next_handler: Option<HandlerId>,
    pub detected_intent: Option<Intent>,
    pub intent_confidence: f64,
    pub workflow_status: WorkflowStatus,
    pub error_message: Option<String>,
    /// Number of completed saves; used for optimistic concurrency in stores
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update returned by a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<ChatMessage>,
    pub context: ContextPatch,
    pub workflow_status: Option<WorkflowStatus>,
    /// Handler to run on the next turn without reclassifying; `None` awaits fresh input
    pub next_handler: Option<HandlerId>,
    pub error_message: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::assistant(content));
        self
    }

    pub fn context(mut self, patch: ContextPatch) -> Self {
        self.context = patch;
        self
    }

    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.workflow_status = Some(status);
        self
    }

    pub fn continue_with(mut self, handler: HandlerId) -> Self {
        self.next_handler = Some(handler);
        self
    }

    /// Service failure surfaced to the user; carries no context changes.
    pub fn failure(reply: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::assistant(reply)],
            context: ContextPatch::new(),
            workflow_status: Some(WorkflowStatus::Error),
            next_handler: None,
            error_message: Some(error.into()),
        }
    }
}

impl ConversationState {
    /// Fresh state for a session seen for the first time
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            shared_context: SharedContext::new(),
            current_handler: None,
            next_handler: None,
            detected_intent: None,
            intent_confidence: 0.0,
            workflow_status: WorkflowStatus::Pending,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Most recent user utterance, if any
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == MessageRole::User)
    }

    /// Most recent assistant reply, if any
    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == MessageRole::Assistant)
    }

    /// Up to `count` latest messages, oldest first
    pub fn recent_messages(&self, count: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Entry turns run classification; continuation turns do not.
    pub fn is_awaiting_input(&self) -> bool {
        self.next_handler.is_none()
    }

    pub fn merge_context(&mut self, patch: ContextPatch) -> usize {
        self.shared_context.merge(patch)
    }

    /// Record a classification and merge its extracted entities.
    pub fn record_classification(&mut self, classification: &Classification) {
        self.detected_intent = Some(classification.intent);
        self.intent_confidence = classification.confidence;

        let entities = &classification.extracted_entities;

        // An e-Factura sub-intent always restates the invoice type so an
        // earlier turn's value cannot override it
        let invoice_type = match classification.intent {
            Intent::EfacturaB2b => Some(entities.invoice_type.unwrap_or(InvoiceType::B2b)),
            Intent::EfacturaB2c => Some(entities.invoice_type.unwrap_or(InvoiceType::B2c)),
            _ => entities.invoice_type,
        };

        let mut patch = ContextPatch::new()
            .set_opt(keys::ANNUAL_INCOME, entities.annual_income)
            .set_opt(keys::PROPERTY_VALUE, entities.property_value)
            .set_opt(keys::OWNERSHIP_YEARS, entities.ownership_years)
            .set_opt(keys::MONTHLY_RENT, entities.monthly_rent)
            .set_opt(
                keys::INVOICE_TYPE,
                invoice_type.and_then(|t| serde_json::to_value(t).ok()),
            )
            .set_opt(keys::CERTIFICATE_TYPE, entities.certificate_type.clone())
            .set_opt(keys::CNP_CUI, entities.cnp_cui.clone())
            .set_opt(keys::SELLER_CUI, entities.seller_cui.clone())
            .set_opt(keys::UPLOAD_INDEX, entities.upload_index.clone())
            .set_opt(keys::FISCAL_YEAR, entities.fiscal_year);

        if !classification.rationale.is_empty() {
            patch.insert(keys::INTENT_RATIONALE, classification.rationale.clone());
        }

        self.shared_context.merge(patch);
    }

    /// Apply a handler's update.
    ///
    /// An `error` update only contributes its messages and error fields; its
    /// context patch is discarded so failed turns never leak partial facts.
    pub fn apply(&mut self, handler: HandlerId, update: StateUpdate) {
        self.current_handler = Some(handler);

        for message in update.messages {
            self.messages.push(message);
        }

        let status = update.workflow_status.unwrap_or(WorkflowStatus::InProgress);

        if status != WorkflowStatus::Error {
            self.shared_context.merge(update.context);
        }

        self.workflow_status = status;
        self.error_message = match status {
            WorkflowStatus::Error => update
                .error_message
                .or_else(|| Some("request could not be completed".to_string())),
            _ => None,
        };

        self.next_handler = match status {
            WorkflowStatus::Pending | WorkflowStatus::Error => None,
            _ => update.next_handler,
        };

        if self.next_handler.is_none() {
            self.release_continuation_flags();
        }

        self.updated_at = Utc::now();
    }

    /// Confirmation flags outlive their continuation when the confirming
    /// step fails; clear them so they are not offered as classifier hints.
    fn release_continuation_flags(&mut self) {
        let stale: Vec<&str> = keys::CONTINUATION_FLAGS
            .into_iter()
            .filter(|key| self.shared_context.flag(key))
            .collect();

        if stale.is_empty() {
            return;
        }

        let patch = stale
            .into_iter()
            .fold(ContextPatch::new(), |patch, key| patch.set(key, false));
        self.shared_context.merge(patch);
    }

    /// Record an orchestrator fault for this turn without touching the context.
    pub fn apply_fault(&mut self, handler: HandlerId, reply: &str, error: impl Into<String>) {
        self.apply(handler, StateUpdate::failure(reply, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedEntities;

    #[test]
    fn test_new_session_starts_pending_and_empty() {
        let state = ConversationState::new("s-1");
        assert_eq!(state.workflow_status, WorkflowStatus::Pending);
        assert!(state.next_handler.is_none());
        assert!(state.shared_context.is_empty());
        assert_eq!(state.message_count(), 0);
    }

    #[test]
    fn test_record_classification_merges_present_entities_only() {
        let mut state = ConversationState::new("s-1");
        state.merge_context(ContextPatch::new().set(keys::MONTHLY_RENT, 2000.0));

        state.record_classification(&Classification {
            intent: Intent::PfaCasCass,
            confidence: 0.92,
            rationale: "income mentioned".into(),
            extracted_entities: ExtractedEntities {
                annual_income: Some(150000.0),
                ..Default::default()
            },
        });

        assert_eq!(state.detected_intent, Some(Intent::PfaCasCass));
        assert_eq!(state.shared_context.get_f64(keys::ANNUAL_INCOME), Some(150000.0));
        assert_eq!(state.shared_context.get_f64(keys::MONTHLY_RENT), Some(2000.0));
        assert!(!state.shared_context.contains(keys::PROPERTY_VALUE));
    }

    #[test]
    fn test_error_update_discards_context_patch() {
        let mut state = ConversationState::new("s-1");
        let mut update = StateUpdate::failure("office down", "submission failed");
        update.context = ContextPatch::new().set(keys::D212_SUBMISSION_ID, "D212-X");

        state.apply(HandlerId::Pfa, update);

        assert_eq!(state.workflow_status, WorkflowStatus::Error);
        assert_eq!(state.error_message.as_deref(), Some("submission failed"));
        assert!(!state.shared_context.contains(keys::D212_SUBMISSION_ID));
    }

    #[test]
    fn test_pending_always_clears_next_handler() {
        let mut state = ConversationState::new("s-1");
        let update = StateUpdate::new()
            .reply("pick a service")
            .status(WorkflowStatus::Pending)
            .continue_with(HandlerId::Pfa);

        state.apply(HandlerId::Clarification, update);

        assert_eq!(state.workflow_status, WorkflowStatus::Pending);
        assert!(state.next_handler.is_none());
    }

    #[test]
    fn test_successful_turn_clears_previous_error() {
        let mut state = ConversationState::new("s-1");
        state.apply_fault(HandlerId::Certificate, "sorry", "boom");
        assert!(state.error_message.is_some());

        state.apply(
            HandlerId::Certificate,
            StateUpdate::new().reply("ok").status(WorkflowStatus::Completed),
        );
        assert!(state.error_message.is_none());
        assert_eq!(state.current_handler, Some(HandlerId::Certificate));
    }

    #[test]
    fn test_efactura_sub_intent_replaces_stored_invoice_type() {
        let mut state = ConversationState::new("s-1");
        state.merge_context(ContextPatch::new().set(keys::INVOICE_TYPE, "B2B"));

        state.record_classification(&Classification {
            intent: Intent::EfacturaB2c,
            confidence: 0.9,
            rationale: String::new(),
            extracted_entities: ExtractedEntities::default(),
        });

        assert_eq!(state.shared_context.get_str(keys::INVOICE_TYPE), Some("B2C"));
    }

    #[test]
    fn test_explicit_invoice_type_entity_wins_on_efactura_intent() {
        let mut state = ConversationState::new("s-1");

        state.record_classification(&Classification {
            intent: Intent::EfacturaB2b,
            confidence: 0.9,
            rationale: String::new(),
            extracted_entities: ExtractedEntities {
                invoice_type: Some(InvoiceType::B2c),
                ..Default::default()
            },
        });

        assert_eq!(state.shared_context.get_str(keys::INVOICE_TYPE), Some("B2C"));
    }

    #[test]
    fn test_failed_confirmation_releases_continuation_flags() {
        let mut state = ConversationState::new("s-1");
        state.apply(
            HandlerId::Pfa,
            StateUpdate::new()
                .reply("Submit the D212?")
                .context(ContextPatch::new().set(keys::AWAITING_SUBMISSION_CONFIRMATION, true))
                .status(WorkflowStatus::InProgress)
                .continue_with(HandlerId::Pfa),
        );
        assert_eq!(state.shared_context.awaiting_flags(), vec![keys::AWAITING_SUBMISSION_CONFIRMATION]);

        state.apply(HandlerId::Pfa, StateUpdate::failure("office down", "submission failed"));

        assert!(state.next_handler.is_none());
        assert!(state.shared_context.awaiting_flags().is_empty());
    }

    #[test]
    fn test_pending_continuation_keeps_its_flag() {
        let mut state = ConversationState::new("s-1");
        state.apply(
            HandlerId::PropertySale,
            StateUpdate::new()
                .context(ContextPatch::new().set(keys::AWAITING_PAYMENT_CONFIRMATION, true))
                .status(WorkflowStatus::InProgress)
                .continue_with(HandlerId::PropertySale),
        );

        assert!(state.shared_context.flag(keys::AWAITING_PAYMENT_CONFIRMATION));
    }

    #[test]
    fn test_json_round_trip_preserves_state() {
        let mut state = ConversationState::new("s-json");
        state.push_message(ChatMessage::user("I earned 150000 in 2024"));
        state.record_classification(&Classification {
            intent: Intent::PfaD212Filing,
            confidence: 0.75,
            rationale: "income and year".into(),
            extracted_entities: ExtractedEntities {
                annual_income: Some(150000.0),
                fiscal_year: Some(2024),
                ..Default::default()
            },
        });
        state.apply(
            HandlerId::Pfa,
            StateUpdate::new()
                .reply("CAS: 9,900.00 RON")
                .context(
                    ContextPatch::new()
                        .set(keys::CAS_AMOUNT, 9900.0)
                        .set(keys::CASS_AMOUNT, 1980.5)
                        .set(keys::AWAITING_SUBMISSION_CONFIRMATION, true),
                )
                .status(WorkflowStatus::InProgress)
                .continue_with(HandlerId::Pfa),
        );
        state.push_message(ChatMessage::user("yes"));
        state.error_message = Some("previous submission failed".into());
        state.version = 3;

        let raw = serde_json::to_string(&state).unwrap();
        let restored: ConversationState = serde_json::from_str(&raw).unwrap();

        assert_eq!(restored, state);
        assert_eq!(restored.next_handler, Some(HandlerId::Pfa));
        assert_eq!(restored.message_count(), 3);
        assert_eq!(restored.shared_context.get_i64(keys::FISCAL_YEAR), Some(2024));
        assert_eq!(restored.shared_context.get_f64(keys::CASS_AMOUNT), Some(1980.5));
        assert_eq!(restored.shared_context.version(), state.shared_context.version());
    }

    #[test]
    fn test_recent_messages_keeps_order() {
        let mut state = ConversationState::new("s-1");
        for i in 0..5 {
            state.push_message(ChatMessage::user(format!("m{}", i)));
        }
        let recent: Vec<_> = state.recent_messages(2).iter().map(|m| m.content.as_str()).collect();
        assert_eq!(recent, vec!["m3", "m4"]);
        assert_eq!(state.recent_messages(50).len(), 5);
    }
}
