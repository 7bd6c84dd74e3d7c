//! Audit trail for questions answered from the database
//!
//! Append-only; the assistant never reads these records back.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub question: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn now(question: &str, query: &str) -> Self {
        Self {
            question: question.to_string(),
            query: query.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Writes audit records to the log stream under the `audit` target.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        info!(
            target: "audit",
            question = %record.question,
            query = %record.query,
            timestamp = %record.timestamp.to_rfc3339(),
            "successful assistant query"
        );
        Ok(())
    }
}

/// One JSON document per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, write_lock: Mutex::new(()) }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Inserts into `assistant_audit(question, query_text, recorded_at)`.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assistant_audit (question, query_text, recorded_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&record.question)
        .bind(&record.query)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
