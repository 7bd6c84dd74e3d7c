//! Response Composer
//!
//! Second LLM call of the SQL path: explains the rows a query returned, or
//! explains why the query failed without echoing the store's message.

use crate::db::executor::{ExecutionOutcome, Row};
use crate::error::{AssistantError, Result};
use crate::llm::CompletionService;
use std::time::Duration;
use tracing::warn;

/// Stands in for the data block when a query returned nothing.
pub const NO_RESULTS: &str = "NO_RESULTS";

pub const COMPOSITION_TEMPERATURE: f32 = 0.5;
const COMPOSITION_MAX_TOKENS: u32 = 1000;

const ANALYST_PERSONA: &str = "You are a business analyst for an inventory and order management company. \
You explain database results to managers in plain language. Always answer in the same language as the question.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Composition {
    /// Explanation of the returned rows.
    Answer(String),
    /// Rephrased account of a failed query, with hints to ask again.
    FailureExplanation(String),
}

/// Compact JSON rendering of at most `max_rows` rows.
pub fn render_rows(rows: &[Row], max_rows: usize) -> String {
    if rows.is_empty() {
        return NO_RESULTS.to_string();
    }

    let shown = &rows[..rows.len().min(max_rows)];
    let json = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());
    if shown.len() < rows.len() {
        format!("{}\n(showing {} of {} rows)", json, shown.len(), rows.len())
    } else {
        json
    }
}

pub struct ResponseComposer<'a> {
    llm: &'a dyn CompletionService,
    timeout: Duration,
    max_rows: usize,
}

impl<'a> ResponseComposer<'a> {
    pub fn new(llm: &'a dyn CompletionService, timeout: Duration, max_rows: usize) -> Self {
        Self { llm, timeout, max_rows }
    }

    pub async fn compose(&self, question: &str, query: &str, outcome: &ExecutionOutcome) -> Result<Composition> {
        match outcome {
            ExecutionOutcome::Rows(rows) => {
                let prompt = results_prompt(question, query, &render_rows(rows, self.max_rows), rows.is_empty());
                self.call(&prompt).await.map(Composition::Answer)
            }
            ExecutionOutcome::Error(message) => {
                let prompt = failure_prompt(question, query, message);
                self.call(&prompt).await.map(Composition::FailureExplanation)
            }
        }
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let call = self.llm.complete(ANALYST_PERSONA, prompt, COMPOSITION_TEMPERATURE, COMPOSITION_MAX_TOKENS);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(Ok(_)) => Err(AssistantError::CompositionFailed("empty reply".to_string())),
            Ok(Err(e)) => {
                warn!("Composition call failed: {}", e);
                Err(AssistantError::CompositionFailed(e.to_string()))
            }
            Err(_) => {
                warn!("Composition call timed out after {:?}", self.timeout);
                Err(AssistantError::CompositionFailed(format!("timed out after {:?}", self.timeout)))
            }
        }
    }
}

fn results_prompt(question: &str, query: &str, data: &str, empty: bool) -> String {
    let empty_hint = if empty {
        format!(
            "\nThe data block is {}: the query matched no rows. Say so clearly and suggest a plausible \
business reason (for example no activity in the period, a misspelled name, or a filter that is too narrow).",
            NO_RESULTS
        )
    } else {
        String::new()
    };

    format!(
        r#"Question: {question}

SQL that was executed:
{query}

Data returned (JSON):
{data}

Answer the question using only this data.
- Cite concrete figures: counts, totals and amounts.
- Name the entities involved (suppliers, locations, articles) and the date range when it is known.
- Keep it short: one paragraph, or a brief list for several items.
- Do not mention SQL, tables or JSON.{empty_hint}"#
    )
}

fn failure_prompt(question: &str, query: &str, error: &str) -> String {
    format!(
        r#"A manager asked: {question}

The following SQL was generated for it but could not be run:
{query}

Database diagnostic (internal, do not quote it): {error}

In two or three sentences explain, without technical jargon, why this question could not be answered,
and suggest how to rephrase it (for example naming the exact supplier, location, article or period)."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_rows_empty_uses_sentinel() {
        assert_eq!(render_rows(&[], 10), NO_RESULTS);
    }

    #[test]
    fn test_render_rows_is_compact_json() {
        let rows = vec![row(json!({"supplier": "Acme", "total": 120.5}))];
        assert_eq!(render_rows(&rows, 10), r#"[{"supplier":"Acme","total":120.5}]"#);
    }

    #[test]
    fn test_render_rows_caps_and_notes_truncation() {
        let rows: Vec<Row> = (0..5).map(|i| row(json!({ "id": i }))).collect();
        let rendered = render_rows(&rows, 2);
        assert!(rendered.starts_with(r#"[{"id":0},{"id":1}]"#));
        assert!(rendered.ends_with("(showing 2 of 5 rows)"));
    }

    #[test]
    fn test_empty_results_prompt_asks_for_business_reason() {
        let prompt = results_prompt("¿Ventas de ayer?", "SELECT 1", NO_RESULTS, true);
        assert!(prompt.contains("plausible"));
        assert!(!results_prompt("q", "SELECT 1", "[]", false).contains("plausible"));
    }
}
