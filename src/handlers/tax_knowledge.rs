//! General tax-code questions answered by the reasoning oracle.

use crate::error::OrchestrationError;
use crate::handlers::Handler;
use crate::models::{HandlerId, WorkflowStatus};
use crate::oracle::ReasoningOracle;
use crate::state::{keys, ContextPatch, ConversationState, StateUpdate};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const TAX_KNOWLEDGE_PROMPT: &str = "You are an expert in Romanian tax legislation (Codul Fiscal).
Answer the user's question about tax rules, procedures, deadlines, rates and thresholds.
Be precise and cite the relevant articles when you can. If you are not sure, say so.
Always add that complex cases should be reviewed by a licensed tax advisor.";

pub const FALLBACK_REPLY: &str = "I can't answer tax questions right now. Please check anaf.ro or ask a licensed tax advisor, and try again later.";

/// Prior messages sent along with the question
const CONTEXT_MESSAGES: usize = 6;

pub struct TaxKnowledgeHandler {
    oracle: Arc<dyn ReasoningOracle>,
    timeout: Duration,
}

impl TaxKnowledgeHandler {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }
}

#[async_trait]
impl Handler for TaxKnowledgeHandler {
    fn id(&self) -> HandlerId {
        HandlerId::TaxKnowledge
    }

    async fn handle(&self, state: &ConversationState) -> Result<StateUpdate> {
        let question = state
            .last_user_message()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let messages = state.recent_messages(CONTEXT_MESSAGES);

        let failure = match tokio::time::timeout(self.timeout, self.oracle.invoke(TAX_KNOWLEDGE_PROMPT, messages)).await {
            Ok(Ok(reply)) if !reply.content.trim().is_empty() => {
                info!(chars = reply.content.len(), "Tax question answered");
                return Ok(StateUpdate::new()
                    .reply(reply.content)
                    .context(
                        ContextPatch::new()
                            .set(keys::TAX_GUIDANCE_PROVIDED, true)
                            .set(keys::LAST_TAX_QUESTION, question),
                    )
                    .status(WorkflowStatus::Completed));
            }
            Ok(Ok(_)) => "oracle returned an empty answer".to_string(),
            Ok(Err(e)) => format!("oracle error: {}", e),
            Err(_) => OrchestrationError::Timeout(self.timeout.as_millis() as u64).to_string(),
        };

        warn!(reason = %failure, "Tax question could not be answered");
        Ok(StateUpdate::failure(FALLBACK_REPLY, failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;
    use crate::oracle::{MockOracle, MockResponse};

    fn asking(question: &str) -> ConversationState {
        let mut state = ConversationState::new("kb");
        state.push_message(ChatMessage::user(question));
        state
    }

    #[tokio::test]
    async fn test_answer_is_recorded() {
        let oracle = MockOracle::new().push_text(MockResponse::Text("The D212 deadline is 25 May.".into()));
        let handler = TaxKnowledgeHandler::new(Arc::new(oracle), Duration::from_millis(200));

        let update = handler.handle(&asking("When is the D212 deadline?")).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Completed));
        assert_eq!(update.messages[0].content, "The D212 deadline is 25 May.");
        assert_eq!(
            update.context.get(keys::LAST_TAX_QUESTION),
            Some(&serde_json::json!("When is the D212 deadline?"))
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back() {
        let oracle = MockOracle::new().push_text(MockResponse::Fail("503".into()));
        let handler = TaxKnowledgeHandler::new(Arc::new(oracle), Duration::from_millis(200));

        let update = handler.handle(&asking("What is the VAT rate?")).await.unwrap();

        assert_eq!(update.workflow_status, Some(WorkflowStatus::Error));
        assert_eq!(update.messages[0].content, FALLBACK_REPLY);
        assert!(update.error_message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_slow_oracle_times_out() {
        let oracle = MockOracle::new().push_text(MockResponse::Delayed(
            Duration::from_millis(500),
            Box::new(MockResponse::Text("late".into())),
        ));
        let handler = TaxKnowledgeHandler::new(Arc::new(oracle), Duration::from_millis(50));

        let update = handler.handle(&asking("What is the VAT rate?")).await.unwrap();
        assert!(update.error_message.unwrap().contains("timed out"));
    }
}
