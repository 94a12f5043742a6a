use crate::application::ports::key_value_store::KeyValueStore;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

/// [`KeyValueStore`] over the `kv_store` table.
pub struct SqliteKeyValueStore {
    pool: Pool<Sqlite>,
}

impl SqliteKeyValueStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, AppError> {
        let now = Utc::now().timestamp_millis();
        let affected = match (expected, new) {
            (None, Some(new)) => sqlx::query(
                r#"
                INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO NOTHING
                "#,
            )
            .bind(key)
            .bind(new)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            (Some(expected), Some(new)) => sqlx::query(
                "UPDATE kv_store SET value = ?1, updated_at = ?2 WHERE key = ?3 AND value = ?4",
            )
            .bind(new)
            .bind(now)
            .bind(key)
            .bind(expected)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            (Some(expected), None) => {
                sqlx::query("DELETE FROM kv_store WHERE key = ?1 AND value = ?2")
                    .bind(key)
                    .bind(expected)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            (None, None) => {
                let (count,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM kv_store WHERE key = ?1")
                        .bind(key)
                        .fetch_one(&self.pool)
                        .await?;
                u64::from(count == 0)
            }
        };
        Ok(affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::ConnectionPool;

    async fn setup_store() -> SqliteKeyValueStore {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        SqliteKeyValueStore::new(pool.get_pool().clone())
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = setup_store().await;
        assert_eq!(store.get("queue").await.unwrap(), None);

        store.set("queue", "[]").await.unwrap();
        store.set("queue", "[1]").await.unwrap();
        assert_eq!(store.get("queue").await.unwrap().as_deref(), Some("[1]"));

        store.delete("queue").await.unwrap();
        assert_eq!(store.get("queue").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compare_and_swap_only_applies_on_match() {
        let store = setup_store().await;

        assert!(store.compare_and_swap("lease", None, Some("a")).await.unwrap());
        assert!(!store.compare_and_swap("lease", None, Some("b")).await.unwrap());
        assert!(!store
            .compare_and_swap("lease", Some("b"), Some("c"))
            .await
            .unwrap());
        assert!(store
            .compare_and_swap("lease", Some("a"), Some("c"))
            .await
            .unwrap());
        assert!(store.compare_and_swap("lease", Some("c"), None).await.unwrap());
        assert_eq!(store.get("lease").await.unwrap(), None);
        assert!(store.compare_and_swap("lease", None, None).await.unwrap());
    }
}
