use crate::domain::value_objects::{BucketName, OperationKind};
use serde::{Deserialize, Serialize};

/// How much a bucket is worth keeping when local storage runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketPriority {
    Expendable,
    Standard,
    Essential,
}

/// Secondary index over one or more payload fields. Multi-field values are joined with `|`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn single(field: &str) -> Self {
        Self {
            name: field.to_string(),
            fields: vec![field.to_string()],
        }
    }

    pub fn composite(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSchema {
    pub bucket: BucketName,
    pub primary_key_field: String,
    pub indexes: Vec<IndexSpec>,
    /// Remote operation returning the bucket's records.
    pub fetch_operation: String,
    pub priority: BucketPriority,
}

/// A remote write the gateway knows how to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOperation {
    pub kind: OperationKind,
    pub remote_operation: String,
    /// Bucket refreshed from the confirmed response, if any.
    pub target_bucket: Option<BucketName>,
}
