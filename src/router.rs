//! Router: pure mapping from conversation state to the next handler.
//!
//! Total by construction: every path yields a [`HandlerId`], and anything
//! the table does not know ends in clarification.

use crate::models::{HandlerId, Intent};
use crate::state::ConversationState;
use std::fmt;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// The previous handler asked to run again on this turn
    Continuation,
    LowConfidence,
    Mapped,
    Unmapped,
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RouteReason::Continuation => "continuation",
            RouteReason::LowConfidence => "low_confidence",
            RouteReason::Mapped => "mapped",
            RouteReason::Unmapped => "unmapped",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteDecision {
    pub handler: HandlerId,
    pub reason: RouteReason,
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    threshold: f64,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl Router {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn route(&self, state: &ConversationState) -> HandlerId {
        self.resolve(state).handler
    }

    /// Route and report why.
    ///
    /// Confidence equal to the threshold is accepted.
    pub fn resolve(&self, state: &ConversationState) -> RouteDecision {
        if let Some(handler) = state.next_handler {
            return RouteDecision {
                handler,
                reason: RouteReason::Continuation,
            };
        }

        if state.intent_confidence.is_nan() || state.intent_confidence < self.threshold {
            return RouteDecision {
                handler: HandlerId::Clarification,
                reason: RouteReason::LowConfidence,
            };
        }

        match state.detected_intent.and_then(handler_for) {
            Some(handler) => RouteDecision {
                handler,
                reason: RouteReason::Mapped,
            },
            None => RouteDecision {
                handler: HandlerId::Clarification,
                reason: RouteReason::Unmapped,
            },
        }
    }
}

/// Fixed intent → handler table. Several intents share a handler, which
/// reads the intent back as a sub-case hint.
pub fn handler_for(intent: Intent) -> Option<HandlerId> {
    match intent {
        Intent::PfaD212Filing | Intent::PfaCasCass => Some(HandlerId::Pfa),
        Intent::PropertySaleTax => Some(HandlerId::PropertySale),
        Intent::RentalContractRegistration => Some(HandlerId::RentalIncome),
        Intent::FiscalCertificate => Some(HandlerId::Certificate),
        Intent::EfacturaB2b | Intent::EfacturaB2c => Some(HandlerId::Efactura),
        Intent::GeneralQuestion => Some(HandlerId::TaxKnowledge),
        Intent::Unclear => None,
    }
}
