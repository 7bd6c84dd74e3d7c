//! Assistant Facade
//!
//! Entry point of the business-query assistant. Each question runs once
//! through an acyclic pipeline:
//!
//! ```text
//! ReceivedQuestion -> Translating -> SqlPath -> Composing -> Done
//!                                 \-> FallbackPath -----------> Done
//! ```
//!
//! Every outcome, including failures, is shaped into an [`AssistantResponse`].

use crate::composer::{Composition, ResponseComposer};
use crate::config::{AssistantConfig, Timeouts};
use crate::db::audit::AuditSink;
use crate::db::executor::{ExecutionOutcome, QueryStore};
use crate::error::AssistantError;
use crate::fallback::ConversationalFallback;
use crate::llm::CompletionService;
use crate::readiness::{ReadinessState, ServiceReadiness};
use crate::reinforcement::ReinforcementLogger;
use crate::schema_context::SchemaContext;
use crate::security::policy::CallerContext;
use crate::security::query_guards::QueryGuards;
use crate::security::scope::{resolve_scope, RestrictionDescriptor};
use crate::translator::{QueryTranslator, TranslationResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Direct,
    Sql,
}

/// The only value returned to callers. Successes carry `answer` and
/// `source`; failures carry only `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AnswerSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssistantResponse {
    pub fn answered(answer: String, source: AnswerSource) -> Self {
        Self {
            success: true,
            answer: Some(answer),
            source: Some(source),
            error: None,
        }
    }

    pub fn failed(error: &AssistantError) -> Self {
        Self {
            success: false,
            answer: None,
            source: None,
            error: Some(public_message(error)),
        }
    }
}

/// Caller-facing text for an error. Internal details stay in the logs.
fn public_message(error: &AssistantError) -> String {
    match error {
        AssistantError::ExecutionFailed(explanation) => explanation.clone(),
        AssistantError::ServiceUnavailable(_) => {
            "The assistant is not available right now. Please try again later.".to_string()
        }
        AssistantError::CompositionFailed(_) => {
            "The data was found but the answer could not be written. Please ask again.".to_string()
        }
        AssistantError::TranslationUnavailable(reason) if reason == EMPTY_QUESTION => reason.clone(),
        _ => "The question could not be processed right now. Please ask again.".to_string(),
    }
}

const EMPTY_QUESTION: &str = "Please write a question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivedQuestion,
    Translating,
    SqlPath,
    FallbackPath,
    Composing,
    Done,
}

/// Response plus the stages the question went through.
#[derive(Debug)]
pub struct AskOutcome {
    pub response: AssistantResponse,
    pub stages: Vec<Stage>,
    /// The background reinforcement task, when one was started. Dropping it
    /// leaves the task running.
    pub reinforcement: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantStatus {
    pub ready: bool,
    pub readiness: ReadinessState,
    pub model: String,
}

pub struct AssistantFacade {
    llm: Arc<dyn CompletionService>,
    store: Arc<dyn QueryStore>,
    schema: Arc<SchemaContext>,
    reinforcement: ReinforcementLogger,
    readiness: ServiceReadiness,
    timeouts: Timeouts,
    max_result_rows: usize,
}

impl AssistantFacade {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        store: Arc<dyn QueryStore>,
        audit: Arc<dyn AuditSink>,
        config: &AssistantConfig,
    ) -> Self {
        let schema = SchemaContext::shared();
        let reinforcement = ReinforcementLogger::new(
            Arc::clone(&llm),
            audit,
            Arc::clone(&schema),
            config.timeouts.composition,
        );

        Self {
            llm,
            store,
            schema,
            reinforcement,
            readiness: ServiceReadiness::new(config.timeouts.probe),
            timeouts: config.timeouts,
            max_result_rows: config.max_result_rows,
        }
    }

    /// One-time connectivity probe. Questions are refused until it succeeds.
    pub async fn initialize(&self) -> bool {
        self.readiness.probe(self.llm.as_ref()).await
    }

    /// Whether the assistant can take questions, re-probing if it could not before.
    pub async fn check_ready(&self) -> bool {
        self.readiness.ensure(self.llm.as_ref()).await
    }

    pub async fn status(&self) -> AssistantStatus {
        let readiness = self.readiness.state().await;
        AssistantStatus {
            ready: readiness == ReadinessState::Ready,
            readiness,
            model: self.llm.model().to_string(),
        }
    }

    pub async fn ask(&self, question: &str, role: &str, location_id: Option<i64>) -> AssistantResponse {
        self.ask_with_trace(question, role, location_id).await.response
    }

    pub async fn ask_with_trace(&self, question: &str, role: &str, location_id: Option<i64>) -> AskOutcome {
        let caller = CallerContext::new(role, location_id);
        let span = info_span!("ask", request_id = %Uuid::new_v4(), role = caller.role.as_str());
        self.run(question.trim(), &caller).instrument(span).await
    }

    async fn run(&self, question: &str, caller: &CallerContext) -> AskOutcome {
        let mut stages = vec![Stage::ReceivedQuestion];

        if !self.readiness.is_ready().await {
            let error = AssistantError::ServiceUnavailable("LLM service probe has not succeeded".to_string());
            warn!("{}", error);
            return AskOutcome { response: AssistantResponse::failed(&error), stages, reinforcement: None };
        }
        if question.is_empty() {
            let error = AssistantError::TranslationUnavailable(EMPTY_QUESTION.to_string());
            return AskOutcome { response: AssistantResponse::failed(&error), stages, reinforcement: None };
        }

        info!("Question received: {}", question);
        let restriction = resolve_scope(caller);
        debug!("Restriction: {:?}", restriction);

        stages.push(Stage::Translating);
        let translator = QueryTranslator::new(self.llm.as_ref(), &self.schema, self.timeouts.translation);
        let mut reinforcement = None;
        let response = match translator.translate(question, restriction).await {
            TranslationResult::Translatable { query } => {
                stages.push(Stage::SqlPath);
                let (executed, outcome) = self.run_query(&query, restriction).await;
                if matches!(&outcome, ExecutionOutcome::Rows(rows) if !rows.is_empty()) {
                    reinforcement = Some(self.reinforcement.record(question, &executed));
                }

                stages.push(Stage::Composing);
                self.compose(question, &executed, &outcome).await
            }
            TranslationResult::Untranslatable { explanation } => {
                info!("Falling back to a direct answer: {}", explanation);
                stages.push(Stage::FallbackPath);
                let fallback = ConversationalFallback::new(self.llm.as_ref(), self.timeouts.fallback);
                match fallback.answer(question).await {
                    Ok(answer) => AssistantResponse::answered(answer, AnswerSource::Direct),
                    Err(e) => AssistantResponse::failed(&e),
                }
            }
        };

        stages.push(Stage::Done);
        debug!("Stages: {:?}", stages);
        AskOutcome { response, stages, reinforcement }
    }

    /// Guard, then execute. Returns the query text actually used and the outcome.
    async fn run_query(
        &self,
        query: &str,
        restriction: RestrictionDescriptor,
    ) -> (String, ExecutionOutcome) {
        let validated = match QueryGuards::new(&self.schema).validate(query, restriction) {
            Ok(validated) => validated,
            Err(rejection) => {
                warn!("Generated query rejected: {} | {}", rejection, query);
                let message = format!("The generated query was rejected before execution: {}", rejection);
                return (query.to_string(), ExecutionOutcome::Error(message));
            }
        };

        info!("Executing generated query: {}", validated.as_str());
        let outcome = match self.store.execute(validated.as_str()).await {
            Ok(rows) => {
                info!("Query returned {} rows", rows.len());
                ExecutionOutcome::Rows(rows)
            }
            Err(e) => {
                warn!("Query execution failed: {}", e);
                ExecutionOutcome::Error(e.to_string())
            }
        };
        (validated.as_str().to_string(), outcome)
    }

    async fn compose(&self, question: &str, query: &str, outcome: &ExecutionOutcome) -> AssistantResponse {
        let composer = ResponseComposer::new(self.llm.as_ref(), self.timeouts.composition, self.max_result_rows);
        match composer.compose(question, query, outcome).await {
            Ok(Composition::Answer(answer)) => AssistantResponse::answered(answer, AnswerSource::Sql),
            Ok(Composition::FailureExplanation(explanation)) => {
                AssistantResponse::failed(&AssistantError::ExecutionFailed(explanation))
            }
            Err(e) => AssistantResponse::failed(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape_omits_absent_fields() {
        let ok = serde_json::to_value(AssistantResponse::answered("Hay 3 pedidos".to_string(), AnswerSource::Sql)).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "answer": "Hay 3 pedidos", "source": "sql"}));

        let err = serde_json::to_value(AssistantResponse::failed(&AssistantError::ServiceUnavailable("x".to_string()))).unwrap();
        assert_eq!(err["success"], false);
        assert!(err.get("answer").is_none());
        assert!(err.get("source").is_none());
        assert!(err["error"].as_str().unwrap().contains("not available"));
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let message = public_message(&AssistantError::CompositionFailed("HTTP 502 from upstream".to_string()));
        assert!(!message.contains("502"));
        let message = public_message(&AssistantError::TranslationUnavailable("connection refused".to_string()));
        assert!(!message.contains("refused"));
        assert_eq!(
            public_message(&AssistantError::ExecutionFailed("Try naming the supplier.".to_string())),
            "Try naming the supplier."
        );
    }
}
