use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct CachedRecordRow {
    pub bucket: String,
    pub primary_key: String,
    pub payload: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct RecordIndexRow {
    pub primary_key: String,
    pub index_name: String,
    pub index_value: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CacheMetadataRow {
    pub bucket: String,
    pub last_synced_at: Option<i64>,
    pub last_accessed_at: Option<i64>,
    pub data_version: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct BucketUsageRow {
    pub bucket: String,
    pub record_count: i64,
    pub payload_bytes: i64,
    pub last_synced_at: Option<i64>,
    pub last_accessed_at: Option<i64>,
}
