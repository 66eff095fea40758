use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Connections beyond the evaluation gate, for candidate queries and the HTTP surface.
const SPARE_CONNECTIONS: u32 = 4;

/// Connects to the job store. Sized so every in-flight evaluation can write back
/// without queueing behind candidate queries.
pub async fn create_pool(database_url: &str, concurrency: usize) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let max_connections = u32::try_from(concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(SPARE_CONNECTIONS);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!("PostgreSQL connection pool established ({max_connections} connections)");
    Ok(pool)
}
