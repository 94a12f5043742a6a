use crate::domain::value_objects::BucketName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping row recorded whenever a bucket is fully refreshed from the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreshnessMarker {
    pub bucket: BucketName,
    pub last_synced_at: DateTime<Utc>,
}

impl FreshnessMarker {
    pub fn new(bucket: BucketName, last_synced_at: DateTime<Utc>) -> Self {
        Self {
            bucket,
            last_synced_at,
        }
    }

    /// A marker exactly `max_age_minutes` old still counts as fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, max_age_minutes: u32) -> bool {
        now.signed_duration_since(self.last_synced_at)
            <= chrono::Duration::minutes(i64::from(max_age_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketUsage {
    pub bucket: BucketName,
    pub record_count: u64,
    pub payload_bytes: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketStatus {
    pub usage: BucketUsage,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStatusSnapshot {
    pub total_records: u64,
    pub total_bytes: u64,
    pub stale_buckets: u64,
    pub buckets: Vec<BucketStatus>,
}

impl CacheStatusSnapshot {
    pub fn new(buckets: Vec<BucketStatus>) -> Self {
        let total_records = buckets.iter().map(|b| b.usage.record_count).sum();
        let total_bytes = buckets.iter().map(|b| b.usage.payload_bytes).sum();
        let stale_buckets = buckets.iter().filter(|b| b.is_stale).count() as u64;
        Self {
            total_records,
            total_bytes,
            stale_buckets,
            buckets,
        }
    }
}
