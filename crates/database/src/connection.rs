use crate::error::DbError;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// Reads `DATABASE_URL` from the environment (the binary loads `.env`
/// first) and returns a pool sized for the engine's concurrent writers:
/// the evaluator's stat stamps, the notifier's lookups, and one flush per
/// bot executor.
pub async fn connect() -> Result<PgPool, DbError> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_e| DbError::ConnectionConfigError("DATABASE_URL must be set.".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    Ok(pool)
}

/// Runs database migrations automatically.
///
/// Ensures the schema is up-to-date when the engine starts, which matters
/// most in production deployments where nobody runs migrations by hand.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
