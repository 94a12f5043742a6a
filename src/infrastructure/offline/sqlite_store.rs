use super::mappers::{
    bucket_usage_from_row, cached_record_from_row, cached_records_from_rows, freshness_from_row,
    group_indexes, timestamp_to_datetime,
};
use super::rows::{BucketUsageRow, CacheMetadataRow, CachedRecordRow, RecordIndexRow};
use crate::application::ports::local_store::LocalStructuredStore;
use crate::domain::entities::{
    BucketStatus, BucketUsage, CacheStatusSnapshot, CachedRecord, FreshnessMarker,
};
use crate::domain::value_objects::{BucketName, RecordKey};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, Transaction};
use std::sync::Arc;

/// SQLite-backed [`LocalStructuredStore`].
///
/// Records live in `cached_records`, their secondary index values in `record_indexes` and the
/// per-bucket freshness/access bookkeeping in `cache_metadata`. Timestamps are unix millis.
pub struct SqliteLocalStore {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
    quota_bytes: Option<u64>,
}

impl SqliteLocalStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: Pool<Sqlite>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            quota_bytes: None,
        }
    }

    /// Caps the total cached payload size; writes that would exceed it fail with
    /// [`AppError::StorageExhausted`].
    pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Current time truncated to the precision freshness markers are stored with.
    fn now_stored(&self) -> Result<DateTime<Utc>, AppError> {
        timestamp_to_datetime(self.now_millis())
    }

    async fn upsert_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        record: &CachedRecord,
        now: i64,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_string(record.payload.as_json())?;
        let payload_bytes = payload.len() as i64;

        sqlx::query(
            r#"
            INSERT INTO cached_records (bucket, primary_key, payload, payload_bytes, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(bucket, primary_key) DO UPDATE SET
                payload = excluded.payload,
                payload_bytes = excluded.payload_bytes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.bucket.as_str())
        .bind(record.primary_key.as_str())
        .bind(&payload)
        .bind(payload_bytes)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        sqlx::query("DELETE FROM record_indexes WHERE bucket = ?1 AND primary_key = ?2")
            .bind(record.bucket.as_str())
            .bind(record.primary_key.as_str())
            .execute(&mut **tx)
            .await?;

        for (index_name, index_value) in &record.indexes {
            sqlx::query(
                r#"
                INSERT INTO record_indexes (bucket, primary_key, index_name, index_value)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(record.bucket.as_str())
            .bind(record.primary_key.as_str())
            .bind(index_name)
            .bind(index_value)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    async fn enforce_quota(&self, tx: &mut Transaction<'_, Sqlite>) -> Result<(), AppError> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };

        let (used,): (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(payload_bytes), 0) FROM cached_records")
                .fetch_one(&mut **tx)
                .await?;

        if used.max(0) as u64 > quota {
            tracing::warn!(
                target: "offline::store",
                used_bytes = used,
                quota_bytes = quota,
                "local store quota exceeded"
            );
            return Err(AppError::StorageExhausted(format!(
                "cached payloads would use {used} of {quota} bytes"
            )));
        }
        Ok(())
    }

    async fn index_rows_for(
        &self,
        bucket: &BucketName,
        primary_key: &RecordKey,
    ) -> Result<Vec<RecordIndexRow>, AppError> {
        let rows = sqlx::query_as::<_, RecordIndexRow>(
            r#"
            SELECT primary_key, index_name, index_value
            FROM record_indexes
            WHERE bucket = ?1 AND primary_key = ?2
            "#,
        )
        .bind(bucket.as_str())
        .bind(primary_key.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl LocalStructuredStore for SqliteLocalStore {
    async fn put(&self, record: &CachedRecord) -> Result<(), AppError> {
        let now = self.now_millis();
        let mut tx = self.pool.begin().await?;
        Self::upsert_in_tx(&mut tx, record, now).await?;
        self.enforce_quota(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_bulk(
        &self,
        bucket: &BucketName,
        records: &[CachedRecord],
    ) -> Result<(), AppError> {
        if let Some(foreign) = records.iter().find(|record| &record.bucket != bucket) {
            return Err(AppError::ValidationError(format!(
                "record {} belongs to bucket {}, not {}",
                foreign.primary_key, foreign.bucket, bucket
            )));
        }

        let now = self.now_millis();
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::upsert_in_tx(&mut tx, record, now).await?;
        }
        self.enforce_quota(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(
            target: "offline::store",
            bucket = %bucket,
            count = records.len(),
            "bulk upsert committed"
        );
        Ok(())
    }

    async fn get(
        &self,
        bucket: &BucketName,
        primary_key: &RecordKey,
    ) -> Result<Option<CachedRecord>, AppError> {
        let row = sqlx::query_as::<_, CachedRecordRow>(
            r#"
            SELECT bucket, primary_key, payload
            FROM cached_records
            WHERE bucket = ?1 AND primary_key = ?2
            "#,
        )
        .bind(bucket.as_str())
        .bind(primary_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut grouped = group_indexes(self.index_rows_for(bucket, primary_key).await?);
        let indexes = grouped.remove(primary_key.as_str()).unwrap_or_default();
        cached_record_from_row(row, indexes).map(Some)
    }

    async fn get_all(&self, bucket: &BucketName) -> Result<Vec<CachedRecord>, AppError> {
        let rows = sqlx::query_as::<_, CachedRecordRow>(
            r#"
            SELECT bucket, primary_key, payload
            FROM cached_records
            WHERE bucket = ?1
            ORDER BY primary_key ASC
            "#,
        )
        .bind(bucket.as_str())
        .fetch_all(&self.pool)
        .await?;

        let index_rows = sqlx::query_as::<_, RecordIndexRow>(
            r#"
            SELECT primary_key, index_name, index_value
            FROM record_indexes
            WHERE bucket = ?1
            "#,
        )
        .bind(bucket.as_str())
        .fetch_all(&self.pool)
        .await?;

        cached_records_from_rows(rows, index_rows)
    }

    async fn get_by_index(
        &self,
        bucket: &BucketName,
        index_name: &str,
        value: &str,
    ) -> Result<Vec<CachedRecord>, AppError> {
        let rows = sqlx::query_as::<_, CachedRecordRow>(
            r#"
            SELECT r.bucket, r.primary_key, r.payload
            FROM cached_records r
            JOIN record_indexes i
              ON i.bucket = r.bucket AND i.primary_key = r.primary_key
            WHERE i.bucket = ?1 AND i.index_name = ?2 AND i.index_value = ?3
            ORDER BY r.primary_key ASC
            "#,
        )
        .bind(bucket.as_str())
        .bind(index_name)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        let index_rows = sqlx::query_as::<_, RecordIndexRow>(
            r#"
            SELECT primary_key, index_name, index_value
            FROM record_indexes
            WHERE bucket = ?1 AND primary_key IN (
                SELECT primary_key FROM record_indexes
                WHERE bucket = ?1 AND index_name = ?2 AND index_value = ?3
            )
            "#,
        )
        .bind(bucket.as_str())
        .bind(index_name)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        cached_records_from_rows(rows, index_rows)
    }

    async fn delete(
        &self,
        bucket: &BucketName,
        primary_key: &RecordKey,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM record_indexes WHERE bucket = ?1 AND primary_key = ?2")
            .bind(bucket.as_str())
            .bind(primary_key.as_str())
            .execute(&mut *tx)
            .await?;
        let result =
            sqlx::query("DELETE FROM cached_records WHERE bucket = ?1 AND primary_key = ?2")
                .bind(bucket.as_str())
                .bind(primary_key.as_str())
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, bucket: &BucketName) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM record_indexes WHERE bucket = ?1")
            .bind(bucket.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM cached_records WHERE bucket = ?1")
            .bind(bucket.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cache_metadata WHERE bucket = ?1")
            .bind(bucket.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            target: "offline::store",
            bucket = %bucket,
            removed = result.rows_affected(),
            "bucket cleared"
        );
        Ok(result.rows_affected())
    }

    async fn mark_fresh(&self, bucket: &BucketName) -> Result<(), AppError> {
        let now = self.now_millis();
        sqlx::query(
            r#"
            INSERT INTO cache_metadata (bucket, last_synced_at, last_accessed_at, data_version)
            VALUES (?1, ?2, ?2, 1)
            ON CONFLICT(bucket) DO UPDATE SET
                last_synced_at = excluded.last_synced_at,
                data_version = data_version + 1
            "#,
        )
        .bind(bucket.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_fresh(&self, bucket: &BucketName, max_age_minutes: u32) -> Result<bool, AppError> {
        let now = self.now_stored()?;
        Ok(self
            .freshness(bucket)
            .await?
            .map(|marker| marker.is_fresh_at(now, max_age_minutes))
            .unwrap_or(false))
    }

    async fn freshness(&self, bucket: &BucketName) -> Result<Option<FreshnessMarker>, AppError> {
        let row = sqlx::query_as::<_, CacheMetadataRow>(
            r#"
            SELECT bucket, last_synced_at, last_accessed_at, data_version
            FROM cache_metadata
            WHERE bucket = ?1
            "#,
        )
        .bind(bucket.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => freshness_from_row(row),
            None => Ok(None),
        }
    }

    async fn has_cached(&self, bucket: &BucketName) -> Result<bool, AppError> {
        if self.freshness(bucket).await?.is_some() {
            return Ok(true);
        }
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM cached_records WHERE bucket = ?1")
                .bind(bucket.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn touch(&self, bucket: &BucketName) -> Result<(), AppError> {
        let now = self.now_millis();
        sqlx::query(
            r#"
            INSERT INTO cache_metadata (bucket, last_synced_at, last_accessed_at, data_version)
            VALUES (?1, NULL, ?2, 0)
            ON CONFLICT(bucket) DO UPDATE SET last_accessed_at = excluded.last_accessed_at
            "#,
        )
        .bind(bucket.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bucket_usage(&self) -> Result<Vec<BucketUsage>, AppError> {
        let rows = sqlx::query_as::<_, BucketUsageRow>(
            r#"
            SELECT
                b.bucket AS bucket,
                (SELECT COUNT(*) FROM cached_records r WHERE r.bucket = b.bucket) AS record_count,
                (SELECT COALESCE(SUM(r.payload_bytes), 0) FROM cached_records r
                    WHERE r.bucket = b.bucket) AS payload_bytes,
                m.last_synced_at AS last_synced_at,
                m.last_accessed_at AS last_accessed_at
            FROM (
                SELECT bucket FROM cached_records
                UNION
                SELECT bucket FROM cache_metadata
            ) b
            LEFT JOIN cache_metadata m ON m.bucket = b.bucket
            ORDER BY b.bucket ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(bucket_usage_from_row).collect()
    }

    async fn cache_status(&self, max_age_minutes: u32) -> Result<CacheStatusSnapshot, AppError> {
        let now = self.now_stored()?;
        let buckets = self
            .bucket_usage()
            .await?
            .into_iter()
            .map(|usage| {
                let is_stale = match usage.last_synced_at {
                    Some(last_synced_at) => {
                        !FreshnessMarker::new(usage.bucket.clone(), last_synced_at)
                            .is_fresh_at(now, max_age_minutes)
                    }
                    None => true,
                };
                BucketStatus { usage, is_stale }
            })
            .collect();

        Ok(CacheStatusSnapshot::new(buckets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::SyncPayload;
    use crate::infrastructure::database::ConnectionPool;
    use crate::shared::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    async fn setup_store() -> (SqliteLocalStore, Arc<ManualClock>) {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = SqliteLocalStore::with_clock(pool.get_pool().clone(), clock.clone());
        (store, clock)
    }

    fn bucket(name: &str) -> BucketName {
        BucketName::parse(name).unwrap()
    }

    fn student(id: &str, class_name: &str) -> CachedRecord {
        CachedRecord::new(
            bucket("students"),
            RecordKey::parse(id).unwrap(),
            SyncPayload::new(json!({"id": id, "className": class_name})).unwrap(),
        )
        .with_index("className", class_name)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let (store, _) = setup_store().await;
        let record = student("s1", "JSS1");

        store.put(&record).await.unwrap();

        let loaded = store
            .get(&bucket("students"), &RecordKey::parse("s1").unwrap())
            .await
            .unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn test_get_missing_key_returns_none() {
        let (store, _) = setup_store().await;
        let loaded = store
            .get(&bucket("students"), &RecordKey::parse("ghost").unwrap())
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_put_is_upsert_and_replaces_indexes() {
        let (store, _) = setup_store().await;
        store.put(&student("s1", "JSS1")).await.unwrap();
        store.put(&student("s1", "JSS2")).await.unwrap();

        let all = store.get_all(&bucket("students")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].index_value("className"), Some("JSS2"));

        let old = store
            .get_by_index(&bucket("students"), "className", "JSS1")
            .await
            .unwrap();
        assert!(old.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_index_filters_bucket_records() {
        let (store, _) = setup_store().await;
        let records = vec![
            student("s1", "JSS1"),
            student("s2", "JSS2"),
            student("s3", "JSS1"),
        ];
        store.put_bulk(&bucket("students"), &records).await.unwrap();

        let jss1 = store
            .get_by_index(&bucket("students"), "className", "JSS1")
            .await
            .unwrap();
        let keys: Vec<_> = jss1.iter().map(|r| r.primary_key.as_str()).collect();
        assert_eq!(keys, vec!["s1", "s3"]);
        assert_eq!(jss1[0].index_value("className"), Some("JSS1"));
    }

    #[tokio::test]
    async fn test_put_bulk_rejects_foreign_records() {
        let (store, _) = setup_store().await;
        let err = store
            .put_bulk(&bucket("scores"), &[student("s1", "JSS1")])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(store.get_all(&bucket("scores")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (store, _) = setup_store().await;
        store
            .put_bulk(&bucket("students"), &[student("s1", "A"), student("s2", "A")])
            .await
            .unwrap();
        store.mark_fresh(&bucket("students")).await.unwrap();

        assert!(store
            .delete(&bucket("students"), &RecordKey::parse("s1").unwrap())
            .await
            .unwrap());
        assert!(!store
            .delete(&bucket("students"), &RecordKey::parse("s1").unwrap())
            .await
            .unwrap());

        let removed = store.clear(&bucket("students")).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.has_cached(&bucket("students")).await.unwrap());
        assert!(store.freshness(&bucket("students")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_freshness_expires_with_simulated_time() {
        let (store, clock) = setup_store().await;
        let students = bucket("students");

        assert!(!store.is_fresh(&students, 60).await.unwrap());

        store.mark_fresh(&students).await.unwrap();
        assert!(store.is_fresh(&students, 60).await.unwrap());

        clock.advance(Duration::minutes(60));
        assert!(store.is_fresh(&students, 60).await.unwrap());

        clock.advance(Duration::seconds(1));
        assert!(!store.is_fresh(&students, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let (store, _) = setup_store().await;
        let store = store.with_quota(Some(64));

        store.put(&student("s1", "A")).await.unwrap();
        let big = CachedRecord::new(
            bucket("students"),
            RecordKey::parse("s2").unwrap(),
            SyncPayload::new(json!({"notes": "x".repeat(200)})).unwrap(),
        );

        let err = store.put(&big).await.unwrap_err();
        assert!(err.is_storage_exhausted());
        assert!(store
            .get(&bucket("students"), &RecordKey::parse("s2").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_bucket_usage_and_cache_status() {
        let (store, clock) = setup_store().await;
        store
            .put_bulk(&bucket("students"), &[student("s1", "A"), student("s2", "B")])
            .await
            .unwrap();
        store.mark_fresh(&bucket("students")).await.unwrap();
        store.touch(&bucket("classes")).await.unwrap();

        let usage = store.bucket_usage().await.unwrap();
        assert_eq!(usage.len(), 2);
        let students = usage
            .iter()
            .find(|u| u.bucket.as_str() == "students")
            .unwrap();
        assert_eq!(students.record_count, 2);
        assert!(students.payload_bytes > 0);
        assert!(students.last_synced_at.is_some());

        clock.advance(Duration::minutes(5));
        let status = store.cache_status(60).await.unwrap();
        assert_eq!(status.total_records, 2);
        // classes was only touched, never refreshed
        assert_eq!(status.stale_buckets, 1);
    }

    #[tokio::test]
    async fn test_cache_status_boundary_ignores_sub_millisecond_clock() {
        let pool = ConnectionPool::from_memory().await.unwrap();
        pool.migrate().await.unwrap();
        let start = Utc.timestamp_opt(1_772_438_400, 123_456_789).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = SqliteLocalStore::with_clock(pool.get_pool().clone(), clock.clone());
        let students = bucket("students");

        store.put(&student("s1", "A")).await.unwrap();
        store.mark_fresh(&students).await.unwrap();

        clock.advance(Duration::minutes(60));
        assert!(store.is_fresh(&students, 60).await.unwrap());
        assert_eq!(store.cache_status(60).await.unwrap().stale_buckets, 0);

        clock.advance(Duration::milliseconds(1));
        assert!(!store.is_fresh(&students, 60).await.unwrap());
        assert_eq!(store.cache_status(60).await.unwrap().stale_buckets, 1);
    }
}
