//! PFA handler: CAS/CASS contributions and the D212 declaration.
//!
//! Entry turn computes contributions and asks whether to submit D212; the
//! answer arrives on a continuation turn routed straight back here.

use crate::error::OrchestrationError;
use crate::handlers::{confirmation_of, Confirmation, Handler, ReplyComposer};
use crate::models::{HandlerId, Intent, WorkflowStatus};
use crate::services::{format_ron, CalculationService, OfficeSystem, PfaContributions};
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct PfaHandler {
    calculator: CalculationService,
    office: Arc<dyn OfficeSystem>,
    composer: ReplyComposer,
}

impl PfaHandler {
    pub fn new(calculator: CalculationService, office: Arc<dyn OfficeSystem>, composer: ReplyComposer) -> Self {
        Self {
            calculator,
            office,
            composer,
        }
    }

    fn fiscal_year(state: &ConversationState) -> i32 {
        state
            .shared_context
            .get_i64(keys::FISCAL_YEAR)
            .and_then(|y| i32::try_from(y).ok())
            .unwrap_or_else(|| Utc::now().year() - 1)
    }

    async fn calculate(&self, state: &ConversationState, annual_income: f64) -> StateUpdate {
        let contributions = match self.calculator.pfa_contributions(annual_income) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "PFA contribution calculation failed");
                return StateUpdate::failure(
                    format!("I could not calculate your contributions: {}.", e),
                    e.to_string(),
                );
            }
        };

        let fiscal_year = Self::fiscal_year(state);
        let mut facts = describe(&contributions);
        facts.push_str(&format!(
            "\n\nShall I submit the D212 declaration for {} with these amounts? (yes/no)",
            fiscal_year
        ));

        let headline = match state.detected_intent {
            Some(Intent::PfaD212Filing) => "D212 declaration: contributions due",
            _ => "PFA contributions",
        };
        let reply = self.composer.compose(format!("{}\n{}", headline, facts), state).await;

        StateUpdate::new()
            .reply(reply)
            .context(
                ContextPatch::new()
                    .set(keys::CALCULATION_TYPE, "pfa_contributions")
                    .set(keys::CAS_AMOUNT, contributions.cas_amount)
                    .set(keys::CASS_AMOUNT, contributions.cass_amount)
                    .set(keys::TOTAL_CONTRIBUTIONS, contributions.total)
                    .set(keys::AWAITING_INCOME_DATA, false)
                    .set(keys::AWAITING_SUBMISSION_CONFIRMATION, true),
            )
            .status(WorkflowStatus::InProgress)
            .continue_with(HandlerId::Pfa)
    }

    fn confirm_submission(&self, state: &ConversationState) -> StateUpdate {
        let ctx = &state.shared_context;
        let settled = ContextPatch::new().set(keys::AWAITING_SUBMISSION_CONFIRMATION, false);

        match confirmation_of(state) {
            Confirmation::Yes => {
                let fiscal_year = Self::fiscal_year(state);
                let income = ctx.get_f64(keys::ANNUAL_INCOME).unwrap_or(0.0);
                let total = ctx.get_f64(keys::TOTAL_CONTRIBUTIONS).unwrap_or(0.0);

                match self
                    .office
                    .submit_d212(fiscal_year, income, total)
                    .and_then(|receipt| receipt.into_result())
                {
                    Ok(receipt) => {
                        info!(submission_id = %receipt.id, "D212 submitted");
                        StateUpdate::new()
                            .reply(format!(
                                "Your D212 declaration for {} was submitted. Submission id: {}. Total contributions due: {} RON.",
                                fiscal_year,
                                receipt.id,
                                format_ron(total)
                            ))
                            .context(settled.set(keys::D212_SUBMISSION_ID, receipt.id))
                            .status(WorkflowStatus::Completed)
                    }
                    Err(e) => {
                        warn!(error = %e, "D212 submission failed");
                        StateUpdate::failure(
                            "The D212 submission failed. Your calculation is kept; please try again later.",
                            format!("D212 submission failed: {}", OrchestrationError::from(e)),
                        )
                    }
                }
            }
            Confirmation::No => StateUpdate::new()
                .reply("Understood, I won't submit the D212 declaration. The calculation stays available in this conversation.")
                .context(settled)
                .status(WorkflowStatus::Completed),
            Confirmation::Unrecognised => StateUpdate::new()
                .reply("I didn't get a yes or no, so I haven't submitted anything. Ask me to file the D212 again whenever you're ready.")
                .context(settled)
                .status(WorkflowStatus::Pending),
        }
    }
}

fn describe(c: &PfaContributions) -> String {
    let cas_line = if c.cas_amount > 0.0 {
        format!("CAS (pension, 25% of {} RON): {} RON", format_ron(c.cas_threshold), format_ron(c.cas_amount))
    } else {
        format!("CAS (pension): not due, income below {} RON", format_ron(c.cas_threshold))
    };
    let cass_line = if c.cass_amount > 0.0 {
        format!("CASS (health, 10% of {} RON): {} RON", format_ron(c.cass_threshold), format_ron(c.cass_amount))
    } else {
        format!("CASS (health): not due, income below {} RON", format_ron(c.cass_threshold))
    };

    format!(
        "Annual income: {} RON\n{}\n{}\nTotal contributions: {} RON",
        format_ron(c.annual_income),
        cas_line,
        cass_line,
        format_ron(c.total)
    )
}

#[async_trait]
impl Handler for PfaHandler {
    fn id(&self) -> HandlerId {
        HandlerId::Pfa
    }

    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let ctx = &state.shared_context;

        if state.next_handler == Some(HandlerId::Pfa) && ctx.flag(keys::AWAITING_SUBMISSION_CONFIRMATION) {
            return Ok(self.confirm_submission(state));
        }

        match ctx.get_f64(keys::ANNUAL_INCOME) {
            Some(income) => Ok(self.calculate(state, income).await),
            None => Ok(StateUpdate::new()
                .reply("To calculate your PFA contributions I need your annual net income in RON. How much did you earn?")
                .context(ContextPatch::new().set(keys::AWAITING_INCOME_DATA, true))
                .status(WorkflowStatus::InProgress)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaxRates;
    use crate::models::ChatMessage;
    use crate::services::MockOfficeSystem;

    fn handler(office: Arc<MockOfficeSystem>) -> PfaHandler {
        PfaHandler::new(CalculationService::new(TaxRates::default()), office, ReplyComposer::plain())
    }

    fn awaiting_confirmation(answer: &str) -> ConversationState {
        let mut state = ConversationState::new("pfa");
        state.merge_context(
            ContextPatch::new()
                .set(keys::ANNUAL_INCOME, 150000.0)
                .set(keys::FISCAL_YEAR, 2024)
                .set(keys::TOTAL_CONTRIBUTIONS, 11880.0)
                .set(keys::AWAITING_SUBMISSION_CONFIRMATION, true),
        );
        state.next_handler = Some(HandlerId::Pfa);
        state.push_message(ChatMessage::user(answer));
        state
    }

    #[tokio::test]
    async fn test_income_yields_contributions_and_continuation() {
        let mut state = ConversationState::new("pfa");
        state.merge_context(ContextPatch::new().set(keys::ANNUAL_INCOME, 150000.0));

        let update = handler(Arc::new(MockOfficeSystem::new())).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::InProgress));
        assert_eq!(update.next_handler, Some(HandlerId::Pfa));
        assert_eq!(update.context.get(keys::CAS_AMOUNT), Some(&serde_json::json!(9900.0)));
        assert_eq!(update.context.get(keys::CASS_AMOUNT), Some(&serde_json::json!(1980.0)));
        assert!(update.messages[0].content.contains("9,900.00"));
    }

    #[tokio::test]
    async fn test_missing_income_raises_awaiting_flag() {
        let state = ConversationState::new("pfa");
        let update = handler(Arc::new(MockOfficeSystem::new())).handle(&state).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::InProgress));
        assert!(update.next_handler.is_none());
        assert_eq!(update.context.get(keys::AWAITING_INCOME_DATA), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_yes_submits_d212() {
        let office = Arc::new(MockOfficeSystem::new());
        let update = handler(office.clone()).handle(&awaiting_confirmation("yes")).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Completed));
        let id = update.context.get(keys::D212_SUBMISSION_ID).and_then(|v| v.as_str()).unwrap();
        assert!(id.starts_with("D212-2024-"));
        assert_eq!(office.calls(), vec!["submit_d212".to_string()]);
    }

    #[tokio::test]
    async fn test_no_completes_without_submission() {
        let office = Arc::new(MockOfficeSystem::new());
        let update = handler(office.clone()).handle(&awaiting_confirmation("nu")).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Completed));
        assert!(office.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognised_answer_releases_session() {
        let update = handler(Arc::new(MockOfficeSystem::new()))
            .handle(&awaiting_confirmation("how much is CASS?"))
            .await
            .unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Pending));
        assert!(update.next_handler.is_none());
    }

    #[tokio::test]
    async fn test_office_outage_is_an_error_update() {
        let office = Arc::new(MockOfficeSystem::unavailable("SPV maintenance"));
        let update = handler(office).handle(&awaiting_confirmation("da")).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Error));
        let error = update.error_message.unwrap();
        assert!(error.contains("SPV maintenance"));
        assert!(error.starts_with("D212 submission failed: Service error: service unavailable"));
    }
}
