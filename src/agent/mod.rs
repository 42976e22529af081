//! Orchestrator: drives one conversation turn end to end
//!
//! ENTRY → (CLASSIFY) → ROUTE → HANDLE → MERGE → PERSIST → RESPOND
//!
//! Classification runs only on entry turns (no `next_handler` pending).
//! Every failure after the request is accepted is absorbed into the turn's
//! state and response; callers only see `Err` for an empty utterance.

use crate::classifier::IntentClassifier;
use crate::config::Settings;
use crate::error::OrchestrationError;
use crate::handlers::{HandlerDeps, HandlerRegistry};
use crate::models::{ChatMessage, MessageRole, TurnRequest, TurnResponse, WorkflowStatus};
use crate::oracle::{GeminiClient, MockOracle, ReasoningOracle};
use crate::router::Router;
use crate::services::{DocumentExtractor, MockDocumentExtractor, MockOfficeSystem, OfficeSystem};
use crate::state::{keys, ContextPatch, ConversationState, InMemorySessionStore, PostgresSessionStore, SessionStore};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Extracted document fields are trusted from this confidence on
pub const DOCUMENT_CONFIDENCE_THRESHOLD: f64 = 0.8;

pub const FAULT_REPLY: &str = "Sorry, something went wrong while processing your request. Please try again.";
pub const NO_REPLY_FALLBACK: &str = "Sorry, I could not process your request. Please rephrase it or try again.";
pub const STORE_UNAVAILABLE_REPLY: &str = "Sorry, your conversation is temporarily unavailable. Please try again in a moment.";
pub const NOT_SAVED_NOTICE: &str = "Note: this step could not be saved, so you may need to repeat it.";

pub struct Orchestrator {
    classifier: IntentClassifier,
    router: Router,
    handlers: Arc<HandlerRegistry>,
    store: Arc<dyn SessionStore>,
    documents: Arc<dyn DocumentExtractor>,
}

impl Orchestrator {
    pub fn new(
        classifier: IntentClassifier,
        router: Router,
        handlers: HandlerRegistry,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            classifier,
            router,
            handlers: Arc::new(handlers),
            store,
            documents: Arc::new(MockDocumentExtractor),
        }
    }

    /// Wire the default components from settings
    pub fn from_settings(
        settings: &Settings,
        oracle: Arc<dyn ReasoningOracle>,
        office: Arc<dyn OfficeSystem>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let classifier = IntentClassifier::new(oracle.clone(), settings.oracle_timeout)
            .with_history_window(settings.history_window);

        let deps = HandlerDeps::new(settings.tax_rates.clone(), office, oracle, settings.oracle_timeout)
            .with_narration(settings.has_oracle_key());

        Self::new(
            classifier,
            Router::new(settings.intent_confidence_threshold),
            HandlerRegistry::new(deps),
            store,
        )
    }

    /// Orchestrator for the binaries: Gemini when a key is configured,
    /// Postgres when a database URL is configured, mocks otherwise.
    pub fn bootstrap(settings: &Settings) -> Result<Self> {
        let oracle: Arc<dyn ReasoningOracle> = if settings.has_oracle_key() {
            info!(model = %settings.gemini_model, "Using Gemini reasoning oracle");
            Arc::new(GeminiClient::new(settings.gemini_api_key.clone(), &settings.gemini_model)?)
        } else {
            warn!("GEMINI_API_KEY not set, every utterance will be routed to clarification");
            Arc::new(MockOracle::new())
        };

        let store: Arc<dyn SessionStore> = match settings.database_url.as_deref() {
            Some(url) => {
                info!("Using Postgres session store");
                Arc::new(PostgresSessionStore::connect_lazy(url)?)
            }
            None => {
                info!("Using in-memory session store");
                Arc::new(InMemorySessionStore::new())
            }
        };

        Ok(Self::from_settings(settings, oracle, Arc::new(MockOfficeSystem::new()), store))
    }

    pub fn with_document_extractor(mut self, documents: Arc<dyn DocumentExtractor>) -> Self {
        self.documents = documents;
        self
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    /// Run one turn for `request.session_id`.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        if request.utterance.trim().is_empty() {
            return Err(OrchestrationError::InvalidRequest(
                "utterance must not be empty".to_string(),
            ));
        }

        let start_time = Instant::now();
        let session_id = request.session_id.as_str();

        // Held until the end of the turn
        let _guard = self.store.lock(session_id).await;

        let mut state = match self.store.load(session_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(session_id, "New session");
                ConversationState::new(session_id)
            }
            Err(e) => {
                error!(session_id, error = %e, "Failed to load session");
                return Ok(TurnResponse {
                    session_id: session_id.to_string(),
                    response_text: STORE_UNAVAILABLE_REPLY.to_string(),
                    detected_intent: None,
                    intent_confidence: 0.0,
                    workflow_status: WorkflowStatus::Error,
                    handler: None,
                });
            }
        };

        info!(
            session_id,
            entry = state.is_awaiting_input(),
            history = state.message_count(),
            "Orchestrator: turn started"
        );

        // === ENTRY ===
        state.push_message(ChatMessage::user(request.utterance.as_str()));
        let turn_start = state.message_count();

        if let Some(document) = request.document.as_deref() {
            self.intake_document(&mut state, document);
        }

        // === CLASSIFY ===
        if state.is_awaiting_input() {
            self.classify(&mut state, &request.utterance).await;
        }

        // === ROUTE ===
        let decision = self.router.resolve(&state);
        info!(
            session_id,
            handler = %decision.handler,
            reason = %decision.reason,
            intent = ?state.detected_intent,
            confidence = state.intent_confidence,
            "Route resolved"
        );

        // === HANDLE ===
        let handler = self.handlers.get(decision.handler);
        let snapshot = state.clone();
        let outcome = tokio::spawn(async move { handler.handle(&snapshot).await }).await;

        // === MERGE ===
        match outcome {
            Ok(Ok(update)) => {
                if update.workflow_status == Some(WorkflowStatus::Error) {
                    warn!(
                        session_id,
                        handler = %decision.handler,
                        error = ?update.error_message,
                        "Handler reported a failure"
                    );
                }
                state.apply(decision.handler, update);
            }
            Ok(Err(e)) => {
                error!(session_id, handler = %decision.handler, error = %e, "Handler returned an error");
                state.apply_fault(
                    decision.handler,
                    FAULT_REPLY,
                    format!("orchestrator fault: handler {} failed: {}", decision.handler, e),
                );
            }
            Err(join_error) => {
                error!(session_id, handler = %decision.handler, error = %join_error, "Handler task aborted");
                state.apply_fault(
                    decision.handler,
                    FAULT_REPLY,
                    OrchestrationError::Unknown(format!(
                        "orchestrator fault: handler {} aborted: {}",
                        decision.handler, join_error
                    ))
                    .to_string(),
                );
            }
        }

        let has_reply = state.messages()[turn_start..]
            .iter()
            .any(|m| m.role == MessageRole::Assistant);
        if !has_reply {
            warn!(session_id, handler = %decision.handler, "Turn produced no reply");
            state.push_message(ChatMessage::assistant(NO_REPLY_FALLBACK));
        }

        let mut response_text = state
            .last_assistant_message()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| NO_REPLY_FALLBACK.to_string());

        // === PERSIST ===
        let mut workflow_status = state.workflow_status;
        if let Err(e) = self.store.save(session_id, &mut state).await {
            error!(session_id, error = %e, "Failed to save session");
            workflow_status = WorkflowStatus::Error;
            response_text = format!("{}\n\n{}", response_text, NOT_SAVED_NOTICE);
        }

        info!(
            session_id,
            handler = %decision.handler,
            status = %workflow_status,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Orchestrator: turn finished"
        );

        // === RESPOND ===
        Ok(TurnResponse {
            session_id: session_id.to_string(),
            response_text,
            detected_intent: state.detected_intent,
            intent_confidence: state.intent_confidence,
            workflow_status,
            handler: Some(decision.handler),
        })
    }

    async fn classify(&self, state: &mut ConversationState, utterance: &str) {
        let awaiting: Vec<String> = state
            .shared_context
            .awaiting_flags()
            .into_iter()
            .map(str::to_string)
            .collect();
        let awaiting: Vec<&str> = awaiting.iter().map(String::as_str).collect();

        // The utterance itself was already appended
        let prior = &state.messages()[..state.message_count().saturating_sub(1)];

        let outcome = match self.classifier.classify(utterance, prior, &awaiting).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "Classifier rejected the utterance");
                state.record_classification(&crate::models::Classification::unclear(e.to_string()));
                state.merge_context(ContextPatch::new().set(keys::ENTRY_ERROR, e.to_string()));
                return;
            }
        };

        state.record_classification(&outcome.classification);

        match outcome.failure {
            Some(reason) => {
                warn!(session_id = %state.session_id, %reason, "Classification failed closed");
                state.merge_context(ContextPatch::new().set(keys::ENTRY_ERROR, reason));
            }
            None if state.shared_context.contains(keys::ENTRY_ERROR) => {
                state.merge_context(ContextPatch::new().set(keys::ENTRY_ERROR, Value::Null));
            }
            None => {}
        }
    }

    fn intake_document(&self, state: &mut ConversationState, document: &str) {
        match self.documents.extract(document) {
            Ok(doc) if doc.confidence >= DOCUMENT_CONFIDENCE_THRESHOLD => {
                info!(
                    session_id = %state.session_id,
                    document_type = doc.document_type.as_str(),
                    confidence = doc.confidence,
                    "Document fields extracted"
                );
                let patch = doc
                    .fields
                    .to_patch()
                    .set(keys::DOCUMENT_TYPE, doc.document_type.as_str())
                    .set(keys::DOCUMENT_CONFIDENCE, doc.confidence);
                state.merge_context(patch);
            }
            Ok(doc) => {
                warn!(
                    session_id = %state.session_id,
                    confidence = doc.confidence,
                    "Document extraction below confidence threshold, fields ignored"
                );
                state.merge_context(
                    ContextPatch::new()
                        .set(keys::DOCUMENT_TYPE, doc.document_type.as_str())
                        .set(keys::DOCUMENT_CONFIDENCE, doc.confidence),
                );
            }
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "Document extraction failed");
                state.merge_context(ContextPatch::new().set(keys::DOCUMENT_ERROR, e.to_string()));
            }
        }
    }
}
