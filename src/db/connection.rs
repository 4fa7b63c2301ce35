//! Database connection management using sqlx

use crate::config::HarnessConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::time::Duration;
use tracing::{debug, info};

/// Initialize the database connection pool
///
/// The pool holds a single connection: every step of a run is sequential and
/// timing measurements must not share the server with a second session of
/// ours. Planner settings are applied on connect so they survive reconnects.
pub async fn init_pool(config: &HarnessConfig) -> Result<PgPool, sqlx::Error> {
    let disable_parallel = config.disable_parallel;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if disable_parallel {
                    conn.execute("SET max_parallel_workers_per_gather = 0").await?;
                }
                conn.execute("SET jit = off").await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    info!("Connected to {}", config.redacted_url());
    debug!(disable_parallel, "session settings applied");

    Ok(pool)
}
