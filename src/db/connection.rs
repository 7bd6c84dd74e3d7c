//! Database connection management using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::time::Duration;

pub type DbPool = PgPool;

/// With `read_only` every session defaults to read-only transactions, so
/// generated SQL cannot write even if it slips past the query guards.
fn pool_options(read_only: bool) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if read_only {
                    conn.execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY").await?;
                }
                Ok(())
            })
        })
}

/// Initialize a connection pool and check it answers.
pub async fn init_pool(database_url: &str, read_only: bool) -> Result<PgPool, sqlx::Error> {
    let pool = pool_options(read_only).connect(database_url).await?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await?;

    Ok(pool)
}

/// A pool that opens its first connection only when a query needs it.
pub fn lazy_pool(database_url: &str, read_only: bool) -> Result<PgPool, sqlx::Error> {
    pool_options(read_only).connect_lazy(database_url)
}
