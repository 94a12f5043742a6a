use super::rows::{BucketUsageRow, CacheMetadataRow, CachedRecordRow, RecordIndexRow};
use crate::domain::entities::{BucketUsage, CachedRecord, FreshnessMarker};
use crate::domain::value_objects::{BucketName, RecordKey, SyncPayload};
use crate::shared::error::AppError;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};

pub(crate) fn timestamp_to_datetime(millis: i64) -> Result<DateTime<Utc>, AppError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp: {millis}")))
}

pub(crate) fn optional_timestamp(
    millis: Option<i64>,
) -> Result<Option<DateTime<Utc>>, AppError> {
    millis.map(timestamp_to_datetime).transpose()
}

pub(crate) fn bucket_from_str(value: &str) -> Result<BucketName, AppError> {
    BucketName::parse(value).map_err(AppError::Database)
}

/// Groups index rows by primary key.
pub(crate) fn group_indexes(
    rows: Vec<RecordIndexRow>,
) -> HashMap<String, BTreeMap<String, String>> {
    let mut grouped: HashMap<String, BTreeMap<String, String>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.primary_key)
            .or_default()
            .insert(row.index_name, row.index_value);
    }
    grouped
}

pub(crate) fn cached_record_from_row(
    row: CachedRecordRow,
    indexes: BTreeMap<String, String>,
) -> Result<CachedRecord, AppError> {
    let bucket = bucket_from_str(&row.bucket)?;
    let primary_key = RecordKey::new(row.primary_key).map_err(AppError::Database)?;
    let payload = SyncPayload::from_json_str(&row.payload).map_err(AppError::Database)?;

    Ok(CachedRecord {
        bucket,
        primary_key,
        payload,
        indexes,
    })
}

pub(crate) fn cached_records_from_rows(
    rows: Vec<CachedRecordRow>,
    index_rows: Vec<RecordIndexRow>,
) -> Result<Vec<CachedRecord>, AppError> {
    let mut grouped = group_indexes(index_rows);
    rows.into_iter()
        .map(|row| {
            let indexes = grouped.remove(&row.primary_key).unwrap_or_default();
            cached_record_from_row(row, indexes)
        })
        .collect()
}

pub(crate) fn freshness_from_row(
    row: CacheMetadataRow,
) -> Result<Option<FreshnessMarker>, AppError> {
    let bucket = bucket_from_str(&row.bucket)?;
    Ok(optional_timestamp(row.last_synced_at)?
        .map(|last_synced_at| FreshnessMarker::new(bucket, last_synced_at)))
}

pub(crate) fn bucket_usage_from_row(row: BucketUsageRow) -> Result<BucketUsage, AppError> {
    Ok(BucketUsage {
        bucket: bucket_from_str(&row.bucket)?,
        record_count: row.record_count.max(0) as u64,
        payload_bytes: row.payload_bytes.max(0) as u64,
        last_synced_at: optional_timestamp(row.last_synced_at)?,
        last_accessed_at: optional_timestamp(row.last_accessed_at)?,
    })
}
