use crate::domain::value_objects::{BucketName, RecordKey, SyncPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of a local store bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedRecord {
    pub bucket: BucketName,
    pub primary_key: RecordKey,
    pub payload: SyncPayload,
    /// Secondary index values keyed by index name.
    #[serde(default)]
    pub indexes: BTreeMap<String, String>,
}

impl CachedRecord {
    pub fn new(bucket: BucketName, primary_key: RecordKey, payload: SyncPayload) -> Self {
        Self {
            bucket,
            primary_key,
            payload,
            indexes: BTreeMap::new(),
        }
    }

    pub fn with_index(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.indexes.insert(name.into(), value.into());
        self
    }

    pub fn index_value(&self, name: &str) -> Option<&str> {
        self.indexes.get(name).map(String::as_str)
    }
}
