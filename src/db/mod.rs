//! Database module for PostgreSQL connection and operations
//! 
//! Query execution for generated SQL and the append-only audit trail.

pub mod audit;
pub mod connection;
pub mod executor;

pub use audit::{AuditRecord, AuditSink, JsonlAuditSink, PgAuditSink, TracingAuditSink};
pub use connection::{init_pool, lazy_pool, DbPool};
pub use executor::{ExecutionError, ExecutionOutcome, PgQueryStore, QueryStore, Row};
