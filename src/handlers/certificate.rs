//! Fiscal certificate requests validated by CNP or CUI.

use crate::error::OrchestrationError;
use crate::handlers::{Handler, ReplyComposer};
use crate::models::{HandlerId, WorkflowStatus};
use crate::services::{validate_cnp_or_cui, OfficeSystem};
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Fiscal attestation certificate requests
pub struct CertificateHandler {
    office: Arc<dyn OfficeSystem>,
    composer: ReplyComposer,
}

impl CertificateHandler {
    pub fn new(office: Arc<dyn OfficeSystem>, composer: ReplyComposer) -> Self {
        Self { office, composer }
    }
}

#[async_trait]
impl Handler for CertificateHandler {
    fn id(&self) -> HandlerId {
        HandlerId::Certificate
    }

    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let ctx = &state.shared_context;
        let certificate_type = ctx.get_str(keys::CERTIFICATE_TYPE);
        let identifier = ctx.get_str(keys::CNP_CUI);

        if let Some(id) = identifier {
            if !validate_cnp_or_cui(id) {
                warn!("Certificate request with invalid CNP/CUI");
                return Ok(StateUpdate::failure(
                    format!("{} is not a valid CNP or CUI. Please check the number and try again.", id),
                    "invalid CNP/CUI",
                ));
            }
        }

        let (Some(certificate_type), Some(identifier)) = (certificate_type, identifier) else {
            let mut missing = Vec::new();
            if certificate_type.is_none() {
                missing.push("which certificate you need (e.g. fiscal attestation)");
            }
            if identifier.is_none() {
                missing.push("your CNP or company CUI");
            }
            return Ok(StateUpdate::new()
                .reply(format!("To request the certificate I need {}.", missing.join(" and ")))
                .context(ContextPatch::new().set(keys::AWAITING_CERTIFICATE_DATA, true))
                .status(WorkflowStatus::InProgress));
        };

        match self
            .office
            .request_certificate(identifier, certificate_type)
            .and_then(|receipt| receipt.into_result())
        {
            Ok(receipt) => {
                info!(request_id = %receipt.id, "Certificate requested");
                let facts = format!(
                    "Your request for a {} certificate was registered. Request id: {}. You will receive it in your SPV inbox.",
                    certificate_type, receipt.id
                );
                Ok(StateUpdate::new()
                    .reply(self.composer.compose(facts, state).await)
                    .context(
                        ContextPatch::new()
                            .set(keys::CERTIFICATE_REQUEST_ID, receipt.id)
                            .set(keys::AWAITING_CERTIFICATE_DATA, false),
                    )
                    .status(WorkflowStatus::Completed))
            }
            Err(e) => {
                warn!(error = %e, "Certificate request failed");
                Ok(StateUpdate::failure(
                    "The certificate request could not be registered. Please try again later.",
                    format!("certificate request failed: {}", OrchestrationError::from(e)),
                ))
            }
        }
    }
}
