//! e-Factura handler: invoice submission, status checks and B2B/B2C guidance.

use crate::error::OrchestrationError;
use crate::handlers::{Handler, ReplyComposer};
use crate::models::{HandlerId, Intent, InvoiceType, WorkflowStatus};
use crate::services::{validate_cui, OfficeSystem};
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

const B2B_GUIDANCE: &str = "For B2B invoices, e-Factura is mandatory: every invoice between Romanian companies must be uploaded to the national system within 5 working days. Send me the invoice XML (UBL/CIUS-RO) and the seller's CUI and I will upload it, or give me an upload index to check an invoice's status.";
const B2C_GUIDANCE: &str = "For B2C invoices issued to consumers, the invoice must also be reported through e-Factura. Send me the invoice XML and the seller's CUI and I will upload it, or give me an upload index to check an invoice's status.";

pub struct EfacturaHandler {
    office: Arc<dyn OfficeSystem>,
    composer: ReplyComposer,
}

impl EfacturaHandler {
    pub fn new(office: Arc<dyn OfficeSystem>, composer: ReplyComposer) -> Self {
        Self { office, composer }
    }

    /// Explicit invoice type wins over the intent sub-case
    fn invoice_type(state: &ConversationState) -> InvoiceType {
        let explicit = state
            .shared_context
            .get(keys::INVOICE_TYPE)
            .and_then(|v| serde_json::from_value::<InvoiceType>(v.clone()).ok());

        match (explicit, state.detected_intent) {
            (Some(t), _) => t,
            (None, Some(Intent::EfacturaB2c)) => InvoiceType::B2c,
            _ => InvoiceType::B2b,
        }
    }

    async fn check_status(&self, state: &ConversationState, upload_index: &str) -> StateUpdate {
        match self
            .office
            .invoice_status(upload_index)
            .and_then(|receipt| receipt.into_result())
        {
            Ok(receipt) => {
                let facts = format!("Invoice with upload index {}: {}", upload_index, receipt.message);
                StateUpdate::new()
                    .reply(self.composer.compose(facts, state).await)
                    .context(
                        ContextPatch::new()
                            .set(keys::EFACTURA_UPLOAD_INDEX, upload_index)
                            .set(keys::EFACTURA_CHECK_STATUS, receipt.message)
                            // Consumed; a later turn must supply a new index
                            .set(keys::UPLOAD_INDEX, Value::Null),
                    )
                    .status(WorkflowStatus::Completed)
            }
            Err(e) => {
                warn!(error = %e, "e-Factura status check failed");
                StateUpdate::failure(
                    "I could not check the invoice status right now. Please try again later.",
                    format!("e-Factura status check failed: {}", OrchestrationError::from(e)),
                )
            }
        }
    }

    async fn submit(&self, state: &ConversationState, seller_cui: &str, invoice_xml: &str) -> StateUpdate {
        if !validate_cui(seller_cui) {
            return StateUpdate::failure(
                format!("{} is not a valid seller CUI, so the invoice was not uploaded.", seller_cui),
                "invalid seller CUI",
            );
        }

        let invoice_type = Self::invoice_type(state);

        match self
            .office
            .submit_invoice(seller_cui, invoice_xml, invoice_type)
            .and_then(|receipt| receipt.into_result())
        {
            Ok(receipt) => {
                info!(upload_index = %receipt.id, "Invoice uploaded to e-Factura");
                let facts = format!(
                    "{} Upload index: {}. Keep it to check the processing status.",
                    receipt.message, receipt.id
                );
                StateUpdate::new()
                    .reply(self.composer.compose(facts, state).await)
                    .context(
                        ContextPatch::new()
                            .set(keys::EFACTURA_UPLOAD_INDEX, receipt.id)
                            .set(keys::AWAITING_INVOICE_DATA, false),
                    )
                    .status(WorkflowStatus::Completed)
            }
            Err(e) => {
                warn!(error = %e, "e-Factura submission failed");
                StateUpdate::failure(
                    "The invoice could not be uploaded to e-Factura. Please check the XML and try again.",
                    format!("e-Factura submission failed: {}", OrchestrationError::from(e)),
                )
            }
        }
    }
}

#[async_trait]
impl Handler for EfacturaHandler {
    fn id(&self) -> HandlerId {
        HandlerId::Efactura
    }

    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let ctx = &state.shared_context;

        if let Some(upload_index) = ctx.get_str(keys::UPLOAD_INDEX) {
            return Ok(self.check_status(state, upload_index).await);
        }

        if let (Some(xml), Some(cui)) = (ctx.get_str(keys::INVOICE_XML), ctx.get_str(keys::SELLER_CUI)) {
            return Ok(self.submit(state, cui, xml).await);
        }

        let guidance = match Self::invoice_type(state) {
            InvoiceType::B2b => B2B_GUIDANCE,
            InvoiceType::B2c => B2C_GUIDANCE,
        };

        Ok(StateUpdate::new()
            .reply(self.composer.compose(guidance.to_string(), state).await)
            .context(ContextPatch::new().set(keys::AWAITING_INVOICE_DATA, true))
            .status(WorkflowStatus::InProgress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockOfficeSystem;
    use serde_json::json;

    fn handler(office: Arc<MockOfficeSystem>) -> EfacturaHandler {
        EfacturaHandler::new(office, ReplyComposer::plain())
    }

    #[tokio::test]
    async fn test_upload_index_checks_status() {
        let office = Arc::new(MockOfficeSystem::new());
        let mut state = ConversationState::new("ef");
        state.merge_context(ContextPatch::new().set(keys::UPLOAD_INDEX, "5001234567"));

        let update = handler(office.clone()).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Completed));
        assert!(update.context.get(keys::EFACTURA_CHECK_STATUS).is_some());
        assert_eq!(update.context.get(keys::UPLOAD_INDEX), Some(&Value::Null));
        assert_eq!(office.calls(), vec!["invoice_status".to_string()]);
    }

    #[tokio::test]
    async fn test_xml_and_cui_submit_invoice() {
        let mut state = ConversationState::new("ef");
        state.merge_context(
            ContextPatch::new()
                .set(keys::INVOICE_XML, "<Invoice/>")
                .set(keys::SELLER_CUI, "RO18547290"),
        );

        let update = handler(Arc::new(MockOfficeSystem::new())).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Completed));
        assert!(update.context.get(keys::EFACTURA_UPLOAD_INDEX).is_some());
    }

    #[tokio::test]
    async fn test_guidance_follows_sub_intent() {
        let mut state = ConversationState::new("ef");
        state.detected_intent = Some(Intent::EfacturaB2c);

        let update = handler(Arc::new(MockOfficeSystem::new())).handle(&state).await.unwrap();

        assert_eq!(update.messages[0].content, B2C_GUIDANCE);
        assert_eq!(update.workflow_status, Some(WorkflowStatus::InProgress));
        assert_eq!(update.context.get(keys::AWAITING_INVOICE_DATA), Some(&json!(true)));
    }

    #[test]
    fn test_explicit_invoice_type_overrides_intent() {
        let mut state = ConversationState::new("ef");
        state.detected_intent = Some(Intent::EfacturaB2c);
        state.merge_context(ContextPatch::new().set(keys::INVOICE_TYPE, "B2B"));

        assert_eq!(EfacturaHandler::invoice_type(&state), InvoiceType::B2b);
    }

    #[tokio::test]
    async fn test_invalid_seller_cui_is_error() {
        let office = Arc::new(MockOfficeSystem::new());
        let mut state = ConversationState::new("ef");
        state.merge_context(
            ContextPatch::new()
                .set(keys::INVOICE_XML, "<Invoice/>")
                .set(keys::SELLER_CUI, "RO18547291"),
        );

        let update = handler(office.clone()).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Error));
        assert!(office.calls().is_empty());
    }
}
