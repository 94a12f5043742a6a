use crate::domain::entities::{BucketUsage, CacheStatusSnapshot, CachedRecord, FreshnessMarker};
use crate::domain::value_objects::{BucketName, RecordKey};
use crate::shared::error::AppError;
use async_trait::async_trait;

/// Durable, indexed cache of the last-known-good server state, partitioned by bucket.
///
/// Writes are upserts keyed by `(bucket, primary_key)` and are durable once the call returns.
/// A write rejected for lack of space fails with [`AppError::StorageExhausted`].
#[async_trait]
pub trait LocalStructuredStore: Send + Sync {
    async fn put(&self, record: &CachedRecord) -> Result<(), AppError>;
    /// Upserts every record in one durable unit; all records must belong to `bucket`.
    async fn put_bulk(&self, bucket: &BucketName, records: &[CachedRecord])
        -> Result<(), AppError>;
    async fn get(
        &self,
        bucket: &BucketName,
        primary_key: &RecordKey,
    ) -> Result<Option<CachedRecord>, AppError>;
    async fn get_all(&self, bucket: &BucketName) -> Result<Vec<CachedRecord>, AppError>;
    async fn get_by_index(
        &self,
        bucket: &BucketName,
        index_name: &str,
        value: &str,
    ) -> Result<Vec<CachedRecord>, AppError>;
    async fn delete(&self, bucket: &BucketName, primary_key: &RecordKey)
        -> Result<bool, AppError>;
    /// Removes every record of the bucket together with its freshness marker.
    async fn clear(&self, bucket: &BucketName) -> Result<u64, AppError>;

    async fn mark_fresh(&self, bucket: &BucketName) -> Result<(), AppError>;
    async fn is_fresh(&self, bucket: &BucketName, max_age_minutes: u32) -> Result<bool, AppError>;
    async fn freshness(&self, bucket: &BucketName) -> Result<Option<FreshnessMarker>, AppError>;
    /// True once the bucket was refreshed at least once or holds any record.
    async fn has_cached(&self, bucket: &BucketName) -> Result<bool, AppError>;
    async fn touch(&self, bucket: &BucketName) -> Result<(), AppError>;
    async fn bucket_usage(&self) -> Result<Vec<BucketUsage>, AppError>;
    async fn cache_status(&self, max_age_minutes: u32) -> Result<CacheStatusSnapshot, AppError>;
}
