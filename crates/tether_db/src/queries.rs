//! Resource queries.

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;

use crate::error::DbResult;
use crate::models::StoredResource;

/// Insert or replace the row for `key`.
pub async fn upsert_resource(
    pool: &SqlitePool,
    key: &str,
    source_type: &str,
    origin: Option<&str>,
    payload: &serde_json::Value,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO resources (key, source_type, origin, payload, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            source_type = excluded.source_type,
            origin = excluded.origin,
            payload = excluded.payload,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(source_type)
    .bind(origin)
    .bind(Json(payload))
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Get a resource by key.
pub async fn get_resource(pool: &SqlitePool, key: &str) -> DbResult<Option<StoredResource>> {
    let resource = sqlx::query_as::<_, StoredResource>(
        r#"
        SELECT key, source_type, origin, payload, updated_at
        FROM resources WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(resource)
}

/// Delete one row. Returns whether it existed.
pub async fn delete_resource(pool: &SqlitePool, key: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM resources WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete `key` and every indexed slot under it (`key:*`).
pub async fn delete_resource_family(pool: &SqlitePool, key: &str) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM resources WHERE key = ? OR substr(key, 1, ?) = ?")
        .bind(key)
        .bind(key.chars().count() as i64 + 1)
        .bind(format!("{key}:"))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Keys of all cached resources, oldest first.
pub async fn list_resource_keys(pool: &SqlitePool) -> DbResult<Vec<String>> {
    let keys: Vec<(String,)> =
        sqlx::query_as("SELECT key FROM resources ORDER BY updated_at ASC, key ASC")
            .fetch_all(pool)
            .await?;
    Ok(keys.into_iter().map(|(key,)| key).collect())
}
