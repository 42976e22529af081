//! Handler trait and registry
//!
//! A handler turns the current conversation state into a partial
//! [`StateUpdate`]. Handlers never call each other; chaining happens only
//! through `next_handler`, read by the router on the following turn.

use crate::config::TaxRates;
use crate::models::{ChatMessage, HandlerId};
use crate::oracle::ReasoningOracle;
use crate::services::{CalculationService, OfficeSystem};
use crate::state::{ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub mod certificate;
pub mod clarification;
pub mod efactura;
pub mod pfa;
pub mod property_sale;
pub mod rental_income;
pub mod tax_knowledge;

pub use certificate::CertificateHandler;
pub use clarification::ClarificationHandler;
pub use efactura::EfacturaHandler;
pub use pfa::PfaHandler;
pub use property_sale::PropertySaleHandler;
pub use rental_income::RentalIncomeHandler;
pub use tax_knowledge::TaxKnowledgeHandler;

/// One unit of domain-specific turn processing
#[async_trait]
pub trait Handler: Send + Sync {
    fn id(&self) -> HandlerId;

    /// Service failures must come back as `error` updates. An `Err` here is
    /// treated as a defect and reported by the orchestrator as a fault.
    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate>;
}

/// Dependencies shared by the built-in handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub calculator: CalculationService,
    pub office: Arc<dyn OfficeSystem>,
    pub oracle: Arc<dyn ReasoningOracle>,
    pub oracle_timeout: Duration,
    /// Phrase deterministic replies through the oracle
    pub narrate: bool,
}

impl HandlerDeps {
    pub fn new(
        rates: TaxRates,
        office: Arc<dyn OfficeSystem>,
        oracle: Arc<dyn ReasoningOracle>,
        oracle_timeout: Duration,
    ) -> Self {
        Self {
            calculator: CalculationService::new(rates),
            office,
            oracle,
            oracle_timeout,
            narrate: false,
        }
    }

    pub fn with_narration(mut self, narrate: bool) -> Self {
        self.narrate = narrate;
        self
    }

    fn composer(&self) -> ReplyComposer {
        if self.narrate {
            ReplyComposer::with_oracle(self.oracle.clone(), self.oracle_timeout)
        } else {
            ReplyComposer::plain()
        }
    }
}

/// Fixed set of handlers, one slot per [`HandlerId`].
///
/// Lookup is a `match` over the closed enum, so every id the router can
/// produce has a handler.
pub struct HandlerRegistry {
    pfa: Arc<dyn Handler>,
    property_sale: Arc<dyn Handler>,
    rental_income: Arc<dyn Handler>,
    certificate: Arc<dyn Handler>,
    efactura: Arc<dyn Handler>,
    tax_knowledge: Arc<dyn Handler>,
    clarification: Arc<dyn Handler>,
}

impl HandlerRegistry {
    pub fn new(deps: HandlerDeps) -> Self {
        let composer = deps.composer();

        Self {
            pfa: Arc::new(PfaHandler::new(
                deps.calculator.clone(),
                deps.office.clone(),
                composer.clone(),
            )),
            property_sale: Arc::new(PropertySaleHandler::new(
                deps.calculator.clone(),
                deps.office.clone(),
                composer.clone(),
            )),
            rental_income: Arc::new(RentalIncomeHandler::new(
                deps.calculator.clone(),
                deps.office.clone(),
                composer.clone(),
            )),
            certificate: Arc::new(CertificateHandler::new(deps.office.clone(), composer.clone())),
            efactura: Arc::new(EfacturaHandler::new(deps.office.clone(), composer)),
            tax_knowledge: Arc::new(TaxKnowledgeHandler::new(deps.oracle.clone(), deps.oracle_timeout)),
            clarification: Arc::new(ClarificationHandler),
        }
    }

    pub fn get(&self, id: HandlerId) -> Arc<dyn Handler> {
        match id {
            HandlerId::Pfa => self.pfa.clone(),
            HandlerId::PropertySale => self.property_sale.clone(),
            HandlerId::RentalIncome => self.rental_income.clone(),
            HandlerId::Certificate => self.certificate.clone(),
            HandlerId::Efactura => self.efactura.clone(),
            HandlerId::TaxKnowledge => self.tax_knowledge.clone(),
            HandlerId::Clarification => self.clarification.clone(),
        }
    }

    /// Swap the handler occupying `handler.id()`'s slot
    pub fn replace(&mut self, handler: Arc<dyn Handler>) {
        let slot = match handler.id() {
            HandlerId::Pfa => &mut self.pfa,
            HandlerId::PropertySale => &mut self.property_sale,
            HandlerId::RentalIncome => &mut self.rental_income,
            HandlerId::Certificate => &mut self.certificate,
            HandlerId::Efactura => &mut self.efactura,
            HandlerId::TaxKnowledge => &mut self.tax_knowledge,
            HandlerId::Clarification => &mut self.clarification,
        };
        *slot = handler;
    }
}

const NARRATION_PROMPT: &str = "You are a Romanian tax services assistant. Rewrite the facts below as a short, friendly reply to the user's last message. Keep every number, identifier and question exactly as given. Do not add new facts.";

/// Builds user-facing replies from deterministic facts, optionally phrased
/// by the oracle. Any oracle failure falls back to the facts verbatim.
#[derive(Clone)]
pub struct ReplyComposer {
    oracle: Option<Arc<dyn ReasoningOracle>>,
    timeout: Duration,
}

impl ReplyComposer {
    pub fn plain() -> Self {
        Self {
            oracle: None,
            timeout: Duration::from_secs(0),
        }
    }

    pub fn with_oracle(oracle: Arc<dyn ReasoningOracle>, timeout: Duration) -> Self {
        Self {
            oracle: Some(oracle),
            timeout,
        }
    }

    pub async fn compose(&self, facts: String, state: &ConversationState) -> String {
        let Some(oracle) = &self.oracle else {
            return facts;
        };

        let mut messages: Vec<ChatMessage> = state.last_user_message().cloned().into_iter().collect();
        messages.push(ChatMessage::system(format!("Facts:\n{}", facts)));

        match tokio::time::timeout(self.timeout, oracle.invoke(NARRATION_PROMPT, &messages)).await {
            Ok(Ok(reply)) if !reply.content.trim().is_empty() => {
                debug!(chars = reply.content.len(), "Reply narrated by oracle");
                reply.content
            }
            Ok(Ok(_)) => {
                warn!("Oracle narration was empty, using plain reply");
                facts
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Oracle narration failed, using plain reply");
                facts
            }
            Err(_) => {
                warn!("Oracle narration timed out, using plain reply");
                facts
            }
        }
    }
}

/// Reading of a yes/no answer on a confirmation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
    Unrecognised,
}

const AFFIRMATIVE: &[&str] = &["yes", "y", "yeah", "yep", "sure", "ok", "okay", "confirm", "da", "go"];
const NEGATIVE: &[&str] = &["no", "n", "nope", "nu", "cancel", "stop", "later"];

/// Classify the first word of `text` as a yes or a no.
pub fn parse_confirmation(text: &str) -> Confirmation {
    let lowered = text.trim().to_lowercase();
    let first = lowered
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())
        .unwrap_or("");

    if AFFIRMATIVE.contains(&first) {
        Confirmation::Yes
    } else if NEGATIVE.contains(&first) {
        Confirmation::No
    } else {
        Confirmation::Unrecognised
    }
}

/// Confirmation answer of the turn, from the latest user message
pub(crate) fn confirmation_of(state: &ConversationState) -> Confirmation {
    state
        .last_user_message()
        .map(|m| parse_confirmation(&m.content))
        .unwrap_or(Confirmation::Unrecognised)
}

/// Deps over the mock office system and a scripted oracle
#[cfg(test)]
pub(crate) fn test_deps(oracle: crate::oracle::MockOracle) -> HandlerDeps {
    HandlerDeps::new(
        TaxRates::default(),
        Arc::new(crate::services::MockOfficeSystem::new()),
        Arc::new(oracle),
        Duration::from_millis(200),
    )
}
