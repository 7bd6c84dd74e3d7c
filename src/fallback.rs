//! Conversational fallback: answers directly when no query can be built.

use crate::error::{AssistantError, Result};
use crate::llm::CompletionService;
use std::time::Duration;
use tracing::warn;

pub const FALLBACK_TEMPERATURE: f32 = 0.7;
const FALLBACK_MAX_TOKENS: u32 = 600;

const EXAMPLE_QUESTIONS: &[&str] = &[
    "Muestra los pedidos del proveedor Acme",
    "¿Cuánto vendimos en los últimos 30 días?",
    "¿Qué artículos están por debajo del stock mínimo?",
    "¿Qué pedidos están retrasados?",
    "Top 5 artículos más vendidos este mes",
];

fn persona() -> String {
    let examples = EXAMPLE_QUESTIONS
        .iter()
        .map(|q| format!("- {}", q))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are the assistant of an inventory and order management platform.
You can help with:
- Orders: purchases from suppliers and sales, their status and totals.
- Inventory: stock per article and location, low-stock alerts.
- Sales metrics: revenue, best-selling articles, trends by period.
- Delivery tracking: expected and actual delivery dates, late orders.

Questions you can answer from the data, for example:
{examples}

Rules:
- Answer in the same language as the user, briefly and in a friendly tone.
- Never invent figures, names or dates.
- If the user mentions a specific entity (a supplier, location, article or order) without enough detail to look it up, ask for the missing identifier (exact name, id or period) instead of guessing.
- If the request is outside these topics, say so and suggest a question you can answer."#
    )
}

pub struct ConversationalFallback<'a> {
    llm: &'a dyn CompletionService,
    timeout: Duration,
}

impl<'a> ConversationalFallback<'a> {
    pub fn new(llm: &'a dyn CompletionService, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn answer(&self, question: &str) -> Result<String> {
        let persona = persona();
        let call = self.llm.complete(&persona, question, FALLBACK_TEMPERATURE, FALLBACK_MAX_TOKENS);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(Ok(_)) => Err(AssistantError::TranslationUnavailable("empty direct answer".to_string())),
            Ok(Err(e)) => {
                warn!("Fallback call failed: {}", e);
                Err(AssistantError::TranslationUnavailable(e.to_string()))
            }
            Err(_) => Err(AssistantError::TranslationUnavailable(format!(
                "direct answer timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
