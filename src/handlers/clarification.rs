//! Clarification: the services menu shown when no handler fits the utterance.

use crate::handlers::Handler;
use crate::models::{HandlerId, WorkflowStatus};
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;

pub const SERVICES_MENU: &str = "I'm not sure which service you need. I can help with:
1. PFA / freelancer: D212 declaration and CAS/CASS contributions
2. Property sale tax (1% or 3% depending on ownership duration)
3. Rental income and rental contract registration
4. Fiscal attestation certificates
5. e-Factura electronic invoicing (B2B and B2C)
6. General questions about the Romanian tax code

Please tell me which of these you need.";

/// Absorbing state for low-confidence and unmapped intents
pub struct ClarificationHandler;

#[async_trait]
impl Handler for ClarificationHandler {
    fn id(&self) -> HandlerId {
        HandlerId::Clarification
    }

    async fn handle(&self, _state: &ConversationState) -> Result<StateUpdate> {
        Ok(StateUpdate::new()
            .reply(SERVICES_MENU)
            .context(ContextPatch::new().set(keys::CLARIFICATION_REQUESTED, true))
            .status(WorkflowStatus::Pending))
    }
}
