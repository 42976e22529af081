//! Rental income handler: 10% tax on annual rent and contract registration.

use crate::error::OrchestrationError;
use crate::handlers::{Handler, ReplyComposer};
use crate::models::{HandlerId, WorkflowStatus};
use crate::services::{format_ron, CalculationService, OfficeSystem, RentalContract};
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RentalIncomeHandler {
    calculator: CalculationService,
    office: Arc<dyn OfficeSystem>,
    composer: ReplyComposer,
}

impl RentalIncomeHandler {
    pub fn new(calculator: CalculationService, office: Arc<dyn OfficeSystem>, composer: ReplyComposer) -> Self {
        Self {
            calculator,
            office,
            composer,
        }
    }
}

fn contract_from(state: &ConversationState, monthly_rent: f64) -> Option<RentalContract> {
    let ctx = &state.shared_context;
    Some(RentalContract {
        property_address: ctx.get_str(keys::PROPERTY_ADDRESS)?.to_string(),
        start_date: ctx.get_str(keys::CONTRACT_START_DATE)?.to_string(),
        end_date: ctx.get_str(keys::CONTRACT_END_DATE)?.to_string(),
        monthly_rent,
        landlord_cnp: ctx.get_str(keys::LANDLORD_CNP).map(str::to_string),
        tenant_cnp: ctx.get_str(keys::TENANT_CNP).map(str::to_string),
    })
}

#[async_trait]
impl Handler for RentalIncomeHandler {
    fn id(&self) -> HandlerId {
        HandlerId::RentalIncome
    }

    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let Some(monthly_rent) = state.shared_context.get_f64(keys::MONTHLY_RENT) else {
            return Ok(StateUpdate::new()
                .reply("What is the monthly rent in RON? You can also upload the rental contract.")
                .context(ContextPatch::new().set(keys::AWAITING_RENTAL_DATA, true))
                .status(WorkflowStatus::InProgress));
        };

        let tax = match self.calculator.rental_income_tax(monthly_rent) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Rental tax calculation failed");
                return Ok(StateUpdate::failure(
                    format!("I could not calculate the rental tax: {}.", e),
                    e.to_string(),
                ));
            }
        };

        let facts = format!(
            "Monthly rent: {} RON\nAnnual rent: {} RON\nIncome tax (10%): {} RON",
            format_ron(tax.monthly_rent),
            format_ron(tax.annual_rent),
            format_ron(tax.tax)
        );

        let patch = ContextPatch::new()
            .set(keys::CALCULATION_TYPE, "rental_income_tax")
            .set(keys::ANNUAL_RENT, tax.annual_rent)
            .set(keys::RENTAL_TAX, tax.tax);

        let Some(contract) = contract_from(state, monthly_rent) else {
            let reply = self
                .composer
                .compose(
                    format!(
                        "{}\n\nTo register the contract I also need the property address and the contract start and end dates.",
                        facts
                    ),
                    state,
                )
                .await;

            return Ok(StateUpdate::new()
                .reply(reply)
                .context(patch.set(keys::AWAITING_RENTAL_DATA, true))
                .status(WorkflowStatus::InProgress));
        };

        match self
            .office
            .register_rental_contract(&contract)
            .and_then(|receipt| receipt.into_result())
        {
            Ok(receipt) => {
                info!(registration = %receipt.id, "Rental contract registered");
                let reply = self
                    .composer
                    .compose(
                        format!(
                            "{}\n\nThe contract for {} ({} to {}) is registered. Registration number: {}.",
                            facts, contract.property_address, contract.start_date, contract.end_date, receipt.id
                        ),
                        state,
                    )
                    .await;

                Ok(StateUpdate::new()
                    .reply(reply)
                    .context(
                        patch
                            .set(keys::CONTRACT_REGISTRATION_NUMBER, receipt.id)
                            .set(keys::AWAITING_RENTAL_DATA, false),
                    )
                    .status(WorkflowStatus::Completed))
            }
            Err(e) => {
                warn!(error = %e, "Rental contract registration failed");
                Ok(StateUpdate::failure(
                    format!("{}\n\nThe contract registration failed; please try again later.", facts),
                    format!("contract registration failed: {}", OrchestrationError::from(e)),
                ))
            }
        }
    }
}
