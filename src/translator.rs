//! Query Translator
//!
//! Turns a business question into a candidate SQL query with one low-temperature
//! LLM call. Replies are decoded in exactly one place, `decode_translation`.

use crate::llm::CompletionService;
use crate::schema_context::SchemaContext;
use crate::security::scope::RestrictionDescriptor;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix the model must use when the question cannot be answered with SQL.
pub const CANNOT_TRANSLATE: &str = "CANNOT_TRANSLATE:";

pub const TRANSLATION_TEMPERATURE: f32 = 0.1;
const TRANSLATION_MAX_TOKENS: u32 = 800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationResult {
    Translatable { query: String },
    Untranslatable { explanation: String },
}

/// Decodes a raw model reply. A leading sentinel (any case) means
/// untranslatable; anything else is taken verbatim as the query, minus an
/// enclosing markdown code fence.
pub fn decode_translation(reply: &str) -> TranslationResult {
    let trimmed = reply.trim();

    let prefix_len = CANNOT_TRANSLATE.len();
    if trimmed.len() >= prefix_len
        && trimmed.is_char_boundary(prefix_len)
        && trimmed[..prefix_len].eq_ignore_ascii_case(CANNOT_TRANSLATE)
    {
        let reason = trimmed[prefix_len..].trim();
        return TranslationResult::Untranslatable {
            explanation: if reason.is_empty() {
                "The question cannot be answered from the database".to_string()
            } else {
                reason.to_string()
            },
        };
    }

    let query = strip_code_fence(trimmed).trim();
    if query.is_empty() {
        return TranslationResult::Untranslatable {
            explanation: "The model returned an empty query".to_string(),
        };
    }

    TranslationResult::Translatable { query: query.to_string() }
}

fn strip_code_fence(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```[A-Za-z]*\s*\n?(.*?)\s*```$").expect("static regex")
    });
    fence
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

pub struct QueryTranslator<'a> {
    llm: &'a dyn CompletionService,
    schema: &'a SchemaContext,
    timeout: Duration,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(llm: &'a dyn CompletionService, schema: &'a SchemaContext, timeout: Duration) -> Self {
        Self { llm, schema, timeout }
    }

    pub fn system_prompt(&self, restriction: RestrictionDescriptor) -> String {
        format!(
            r#"You are a PostgreSQL expert that translates business questions about an inventory and order management system into a single SQL query.

{catalogue}
## Access restriction
{restriction}

## Output rules
- Reply with the SQL query only: no explanations, no markdown.
- Generate exactly one read-only SELECT statement (WITH clauses are allowed).
- Use PostgreSQL date arithmetic: CURRENT_DATE - INTERVAL '30 days', date_trunc('month', CURRENT_DATE), EXTRACT(...).
- Limit row listings with LIMIT (50 rows unless the question asks for another amount).
- Prefer explicit JOINs over ambiguous column references; always qualify columns with table aliases.
- Match names with ILIKE '%name%' instead of exact equality.
- If the question cannot be answered with this schema, reply with "{sentinel}" followed by a short reason."#,
            catalogue = self.schema.catalogue(),
            restriction = restriction.prompt_clause(),
            sentinel = CANNOT_TRANSLATE,
        )
    }

    /// Never fails: service errors and timeouts become `Untranslatable`.
    pub async fn translate(&self, question: &str, restriction: RestrictionDescriptor) -> TranslationResult {
        let system = self.system_prompt(restriction);
        let user = format!("Question: {}\nSQL:", question);

        let call = self.llm.complete(&system, &user, TRANSLATION_TEMPERATURE, TRANSLATION_MAX_TOKENS);
        let reply = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("Translation call failed: {}", e);
                return TranslationResult::Untranslatable { explanation: e.to_string() };
            }
            Err(_) => {
                warn!("Translation call timed out after {:?}", self.timeout);
                return TranslationResult::Untranslatable {
                    explanation: format!("translation timed out after {:?}", self.timeout),
                };
            }
        };

        let result = decode_translation(&reply);
        debug!("Translation result: {:?}", result);
        result
    }
}
