//! Romanian tax conversational orchestrator
//!
//! Routes each user utterance to one of a fixed set of tax handlers:
//! - PFA social contributions (CAS/CASS) and D212 filing
//! - property sale tax and payment
//! - rental income tax and contract registration
//! - fiscal certificates and e-Factura invoices
//! - general tax-code questions
//!
//! One session state is carried across turns and persisted after each turn.
//!
//! TURN LOOP:
//! ENTRY → CLASSIFY → ROUTE → HANDLE → MERGE → PERSIST → RESPOND

pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oracle;
pub mod router;
pub mod services;
pub mod state;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::Orchestrator;
pub use models::*;
pub use state::ConversationState;
