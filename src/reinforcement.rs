//! Reinforcement Logging
//!
//! After a query returns data, a detached task replays the exchange to the
//! model with an affirming turn and appends an audit record. The task's
//! output is `()`: nothing it does can reach the caller.

use crate::db::audit::{AuditRecord, AuditSink};
use crate::llm::{ChatMessage, CompletionService};
use crate::schema_context::SchemaContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const AFFIRMATION: &str = "Correct. That query returned exactly the data that was asked for. \
Keep answering similar questions with the same tables, joins and filters.";

const REINFORCEMENT_TEMPERATURE: f32 = 0.0;
const REINFORCEMENT_MAX_TOKENS: u32 = 16;

#[derive(Clone)]
pub struct ReinforcementLogger {
    llm: Arc<dyn CompletionService>,
    audit: Arc<dyn AuditSink>,
    schema: Arc<SchemaContext>,
    timeout: Duration,
}

impl ReinforcementLogger {
    pub fn new(
        llm: Arc<dyn CompletionService>,
        audit: Arc<dyn AuditSink>,
        schema: Arc<SchemaContext>,
        timeout: Duration,
    ) -> Self {
        Self { llm, audit, schema, timeout }
    }

    /// The synthetic exchange sent to the model.
    pub fn exchange(&self, question: &str, query: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(format!(
                "You translate business questions into PostgreSQL for this schema.\n\n{}",
                self.schema.catalogue()
            )),
            ChatMessage::user(question),
            ChatMessage::assistant(query),
            ChatMessage::user(AFFIRMATION),
        ]
    }

    /// Fire and forget. The handle may be dropped; tests await it.
    pub fn record(&self, question: &str, query: &str) -> JoinHandle<()> {
        let logger = self.clone();
        let question = question.to_string();
        let query = query.to_string();
        tokio::spawn(async move { logger.run(&question, &query).await })
    }

    async fn run(&self, question: &str, query: &str) {
        let messages = self.exchange(question, query);
        let call = self.llm.chat(&messages, REINFORCEMENT_TEMPERATURE, REINFORCEMENT_MAX_TOKENS);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(_)) => debug!("Reinforcement exchange accepted"),
            Ok(Err(e)) => warn!("Reinforcement exchange failed: {}", e),
            Err(_) => warn!("Reinforcement exchange timed out after {:?}", self.timeout),
        }

        if let Err(e) = self.audit.append(&AuditRecord::now(question, query)).await {
            warn!("Failed to write audit record: {}", e);
        }
    }
}
