//! Shared test helpers for the encounter store
//!
//! Tests run against `Database::new(None)` so they see exactly the
//! production schema.

use sqlx::SqlitePool;

use super::Database;

/// In-memory pool with migrations applied
pub async fn test_pool() -> SqlitePool {
    let db = Database::new(None)
        .await
        .expect("Failed to create test database");
    db.pool().clone()
}

/// Number of persisted encounter snapshots
pub async fn encounter_rows(pool: &SqlitePool) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM encounters")
        .fetch_one(pool)
        .await
        .expect("Failed to count encounters");
    count
}

/// Version of the stored snapshot for `id`, if there is one
pub async fn stored_version(pool: &SqlitePool, id: &str) -> Option<i64> {
    sqlx::query_as::<_, (i64,)>("SELECT version FROM encounters WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .expect("Failed to read encounter version")
        .map(|(version,)| version)
}
