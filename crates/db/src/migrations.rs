use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Names from `tables` that have no matching table in the schema.
pub async fn missing_tables(pool: &DbPool, tables: &[&str]) -> Result<Vec<String>, sqlx::Error> {
    let mut missing = Vec::new();
    for table in tables {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;
        if count == 0 {
            missing.push((*table).to_string());
        }
    }
    Ok(missing)
}
