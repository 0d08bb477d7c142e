//! SQLite pool construction and schema bootstrap
//!
//! The subsystem owns only its own tables (users, sessions, permissions,
//! role grants, audit sinks); the wider member/plan/payment schema lives
//! in the excluded data layer.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// DDL for the auth-subsystem tables.
const SCHEMA: &str = include_str!("schema.sql");

/// Connect to the given SQLite database URL.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Connect to a private in-memory database.
///
/// Pinned to a single connection: every connection to `sqlite::memory:`
/// gets its own database, so a wider pool would see empty tables.
pub async fn connect_memory() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
}

/// Create the auth-subsystem tables if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_applies_cleanly() {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        // Idempotent: IF NOT EXISTS everywhere.
        init_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
