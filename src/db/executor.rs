//! Query execution against the relational store
//!
//! One round trip per query: no retries, no pagination, no transaction.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// One result row keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("{0}")]
    Store(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected row format: {0}")]
    Decode(String),
}

/// What the SQL path hands to the composer.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(Vec<Row>),
    Error(String),
}

#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, ExecutionError>;
}

pub struct PgQueryStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgQueryStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

/// Wraps a query so each row comes back as one JSON document, whatever the column types.
pub fn wrap_as_json_rows(query: &str) -> String {
    format!("SELECT row_to_json(t)::text FROM ({}) AS t", query)
}

fn decode_row(text: &str) -> Result<Row, ExecutionError> {
    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExecutionError::Decode(format!("expected a JSON object, got {}", other))),
        Err(e) => Err(ExecutionError::Decode(e.to_string())),
    }
}

#[async_trait]
impl QueryStore for PgQueryStore {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, ExecutionError> {
        let wrapped = wrap_as_json_rows(query);
        let fetch = sqlx::query_scalar::<_, String>(&wrapped).fetch_all(&self.pool);

        let raw_rows = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| ExecutionError::Timeout(self.timeout))?
            .map_err(|e| ExecutionError::Store(e.to_string()))?;

        debug!("Query returned {} rows", raw_rows.len());
        raw_rows.iter().map(|text| decode_row(text)).collect()
    }
}
