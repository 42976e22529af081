//! Property sale handler: tax by ownership duration, then optional payment.

use crate::error::OrchestrationError;
use crate::handlers::{confirmation_of, Confirmation, Handler, ReplyComposer};
use crate::models::{HandlerId, WorkflowStatus};
use crate::services::{format_ron, round_cents, CalculationService, OfficeSystem};
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PropertySaleHandler {
    calculator: CalculationService,
    office: Arc<dyn OfficeSystem>,
    composer: ReplyComposer,
}

impl PropertySaleHandler {
    pub fn new(calculator: CalculationService, office: Arc<dyn OfficeSystem>, composer: ReplyComposer) -> Self {
        Self {
            calculator,
            office,
            composer,
        }
    }

    async fn calculate(&self, state: &ConversationState, value: f64, years: u32) -> StateUpdate {
        let tax = match self.calculator.property_sale_tax(value, years) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Property sale tax calculation failed");
                return StateUpdate::failure(format!("I could not calculate the tax: {}.", e), e.to_string());
            }
        };

        let threshold = self.calculator.rates().long_ownership_years;
        let rule = if years >= threshold {
            format!("owned {} years or more", threshold)
        } else {
            format!("owned less than {} years", threshold)
        };

        let facts = format!(
            "Property value: {} RON\nOwnership: {} years ({})\nTax rate: {}%\nTax due: {} RON\n\nDo you want to pay it now through Ghiseul.ro? (yes/no)",
            format_ron(tax.property_value),
            tax.ownership_years,
            rule,
            round_cents(tax.tax_rate * 100.0),
            format_ron(tax.tax)
        );

        StateUpdate::new()
            .reply(self.composer.compose(facts, state).await)
            .context(
                ContextPatch::new()
                    .set(keys::CALCULATION_TYPE, "property_sale_tax")
                    .set(keys::TAX_RATE, tax.tax_rate)
                    .set(keys::CALCULATED_TAX, tax.tax)
                    .set(keys::AWAITING_PROPERTY_DATA, false)
                    .set(keys::AWAITING_PAYMENT_CONFIRMATION, true),
            )
            .status(WorkflowStatus::InProgress)
            .continue_with(HandlerId::PropertySale)
    }

    fn confirm_payment(&self, state: &ConversationState) -> StateUpdate {
        let settled = ContextPatch::new().set(keys::AWAITING_PAYMENT_CONFIRMATION, false);

        match confirmation_of(state) {
            Confirmation::Yes => {
                let amount = state.shared_context.get_f64(keys::CALCULATED_TAX).unwrap_or(0.0);

                match self
                    .office
                    .process_payment(amount, "property-sale-tax")
                    .and_then(|receipt| receipt.into_result())
                {
                    Ok(receipt) => {
                        info!(transaction_id = %receipt.id, "Property sale tax payment initiated");
                        StateUpdate::new()
                            .reply(format!(
                                "Payment of {} RON initiated. Transaction id: {}.",
                                format_ron(amount),
                                receipt.id
                            ))
                            .context(settled.set(keys::PAYMENT_TRANSACTION_ID, receipt.id))
                            .status(WorkflowStatus::Completed)
                    }
                    Err(e) => {
                        warn!(error = %e, "Property sale tax payment failed");
                        StateUpdate::failure(
                            "The payment could not be initiated. Please try again later or pay directly on Ghiseul.ro.",
                            format!("payment failed: {}", OrchestrationError::from(e)),
                        )
                    }
                }
            }
            Confirmation::No => StateUpdate::new()
                .reply("No problem. Remember the tax is due when the sale contract is signed at the notary.")
                .context(settled)
                .status(WorkflowStatus::Completed),
            Confirmation::Unrecognised => StateUpdate::new()
                .reply("I didn't get a yes or no, so no payment was made. Ask me again whenever you want to pay.")
                .context(settled)
                .status(WorkflowStatus::Pending),
        }
    }
}

#[async_trait]
impl Handler for PropertySaleHandler {
    fn id(&self) -> HandlerId {
        HandlerId::PropertySale
    }

    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let ctx = &state.shared_context;

        if state.next_handler == Some(HandlerId::PropertySale) && ctx.flag(keys::AWAITING_PAYMENT_CONFIRMATION) {
            return Ok(self.confirm_payment(state));
        }

        let value = ctx.get_f64(keys::PROPERTY_VALUE);
        let years = ctx.get_u32(keys::OWNERSHIP_YEARS);

        if let (Some(value), Some(years)) = (value, years) {
            return Ok(self.calculate(state, value, years).await);
        }

        let mut missing = Vec::new();
        if value.is_none() {
            missing.push("the sale price of the property (RON)");
        }
        if years.is_none() {
            missing.push("how many years you have owned it");
        }

        Ok(StateUpdate::new()
            .reply(format!("To calculate the property sale tax I still need {}.", missing.join(" and ")))
            .context(ContextPatch::new().set(keys::AWAITING_PROPERTY_DATA, true))
            .status(WorkflowStatus::InProgress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaxRates;
    use crate::models::ChatMessage;
    use crate::services::MockOfficeSystem;
    use serde_json::json;

    fn handler(office: Arc<MockOfficeSystem>) -> PropertySaleHandler {
        PropertySaleHandler::new(CalculationService::new(TaxRates::default()), office, ReplyComposer::plain())
    }

    fn with_property(value: f64, years: u32) -> ConversationState {
        let mut state = ConversationState::new("sale");
        state.merge_context(
            ContextPatch::new()
                .set(keys::PROPERTY_VALUE, value)
                .set(keys::OWNERSHIP_YEARS, years),
        );
        state
    }

    #[tokio::test]
    async fn test_three_years_is_long_ownership() {
        let update = handler(Arc::new(MockOfficeSystem::new()))
            .handle(&with_property(100000.0, 3))
            .await
            .unwrap();

        assert_eq!(update.context.get(keys::TAX_RATE), Some(&json!(0.01)));
        assert_eq!(update.context.get(keys::CALCULATED_TAX), Some(&json!(1000.0)));
        assert_eq!(update.next_handler, Some(HandlerId::PropertySale));
    }

    #[tokio::test]
    async fn test_partial_data_asks_for_the_rest() {
        let mut state = ConversationState::new("sale");
        state.merge_context(ContextPatch::new().set(keys::PROPERTY_VALUE, 250000.0));

        let update = handler(Arc::new(MockOfficeSystem::new())).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::InProgress));
        assert!(update.next_handler.is_none());
        assert!(update.messages[0].content.contains("how many years"));
        assert!(!update.messages[0].content.contains("sale price"));
        assert_eq!(update.context.get(keys::AWAITING_PROPERTY_DATA), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_payment_confirmation() {
        let office = Arc::new(MockOfficeSystem::new());
        let mut state = with_property(100000.0, 3);
        state.merge_context(
            ContextPatch::new()
                .set(keys::CALCULATED_TAX, 1000.0)
                .set(keys::AWAITING_PAYMENT_CONFIRMATION, true),
        );
        state.next_handler = Some(HandlerId::PropertySale);
        state.push_message(ChatMessage::user("yes, pay it"));

        let update = handler(office.clone()).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Completed));
        assert!(update.context.get(keys::PAYMENT_TRANSACTION_ID).is_some());
        assert_eq!(office.calls(), vec!["process_payment".to_string()]);
    }
}
