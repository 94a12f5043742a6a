use crate::domain::entities::{
    BucketPriority, BucketSchema, CachedRecord, IndexSpec, WriteOperation,
};
use crate::domain::value_objects::{BucketName, OperationKind, RecordKey, SyncPayload};
use crate::shared::error::AppError;
use serde_json::Value;
use std::collections::HashMap;

const INDEX_VALUE_SEPARATOR: &str = "|";

/// Known buckets and remote writes of the school administration service.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    buckets: HashMap<String, BucketSchema>,
    writes: HashMap<String, WriteOperation>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Result<Self, AppError> {
        let mut registry = Self::new();
        for schema in default_bucket_schemas()? {
            registry.register_bucket(schema);
        }
        for operation in default_write_operations()? {
            registry.register_write(operation);
        }
        Ok(registry)
    }

    pub fn register_bucket(&mut self, schema: BucketSchema) {
        self.buckets.insert(schema.bucket.as_str().to_string(), schema);
    }

    pub fn register_write(&mut self, operation: WriteOperation) {
        self.writes
            .insert(operation.kind.as_str().to_string(), operation);
    }

    pub fn bucket(&self, bucket: &BucketName) -> Option<&BucketSchema> {
        self.buckets.get(bucket.as_str())
    }

    pub fn require_bucket(&self, bucket: &BucketName) -> Result<&BucketSchema, AppError> {
        self.bucket(bucket)
            .ok_or_else(|| AppError::NotFound(format!("unknown bucket '{bucket}'")))
    }

    pub fn write_operation(&self, kind: &OperationKind) -> Option<&WriteOperation> {
        self.writes.get(kind.as_str())
    }

    /// Unregistered buckets are treated as standard.
    pub fn priority_of(&self, bucket: &BucketName) -> BucketPriority {
        self.bucket(bucket)
            .map(|schema| schema.priority)
            .unwrap_or(BucketPriority::Standard)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &BucketSchema> {
        self.buckets.values()
    }
}

/// Turns remote JSON into cached records: an array yields one record per object, an object
/// yields a single record. Entries without a usable primary key are skipped.
pub fn records_from_value(schema: &BucketSchema, data: &Value) -> Vec<CachedRecord> {
    match data {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| record_from_object(schema, item))
            .collect(),
        Value::Object(_) => record_from_object(schema, data).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn record_from_object(schema: &BucketSchema, item: &Value) -> Option<CachedRecord> {
    let Some(key) = item
        .get(&schema.primary_key_field)
        .and_then(scalar_to_string)
    else {
        tracing::warn!(
            target: "offline::gateway",
            bucket = %schema.bucket,
            field = %schema.primary_key_field,
            "skipping record without primary key"
        );
        return None;
    };
    let primary_key = RecordKey::new(key).ok()?;
    let payload = SyncPayload::new(item.clone()).ok()?;

    let mut record = CachedRecord::new(schema.bucket.clone(), primary_key, payload);
    for index in &schema.indexes {
        if let Some(value) = index_value(index, item) {
            record = record.with_index(index.name.clone(), value);
        }
    }
    Some(record)
}

/// Joined value of every field of the index, or `None` when any field is missing.
pub fn index_value(index: &IndexSpec, item: &Value) -> Option<String> {
    let parts = index
        .fields
        .iter()
        .map(|field| item.get(field).and_then(scalar_to_string))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join(INDEX_VALUE_SEPARATOR))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn bucket_schema(
    bucket: &str,
    primary_key_field: &str,
    indexes: Vec<IndexSpec>,
    fetch_operation: &str,
    priority: BucketPriority,
) -> Result<BucketSchema, AppError> {
    Ok(BucketSchema {
        bucket: BucketName::parse(bucket).map_err(AppError::ConfigurationError)?,
        primary_key_field: primary_key_field.to_string(),
        indexes,
        fetch_operation: fetch_operation.to_string(),
        priority,
    })
}

fn write_operation(
    kind: &str,
    remote_operation: &str,
    target_bucket: Option<&str>,
) -> Result<WriteOperation, AppError> {
    Ok(WriteOperation {
        kind: OperationKind::parse(kind).map_err(AppError::ConfigurationError)?,
        remote_operation: remote_operation.to_string(),
        target_bucket: target_bucket
            .map(BucketName::parse)
            .transpose()
            .map_err(AppError::ConfigurationError)?,
    })
}

pub fn default_bucket_schemas() -> Result<Vec<BucketSchema>, AppError> {
    use BucketPriority::{Essential, Expendable, Standard};

    Ok(vec![
        bucket_schema(
            "classes",
            "classId",
            vec![IndexSpec::single("teacherId")],
            "list-classes",
            Essential,
        )?,
        bucket_schema(
            "teachers",
            "teacherId",
            vec![IndexSpec::single("email")],
            "list-teachers",
            Essential,
        )?,
        bucket_schema(
            "subjects",
            "subjectId",
            vec![IndexSpec::single("classId")],
            "list-subjects",
            Essential,
        )?,
        bucket_schema("metadata", "key", Vec::new(), "get-metadata", Essential)?,
        bucket_schema(
            "students",
            "studentId",
            vec![IndexSpec::single("classId")],
            "list-students",
            Standard,
        )?,
        bucket_schema(
            "scores",
            "scoreId",
            vec![
                IndexSpec::single("studentId"),
                IndexSpec::composite("class_subject", &["classId", "subjectId"]),
            ],
            "list-scores",
            Standard,
        )?,
        bucket_schema(
            "remarks",
            "remarkId",
            vec![
                IndexSpec::single("studentId"),
                IndexSpec::composite("class_term", &["classId", "term"]),
            ],
            "list-remarks",
            Standard,
        )?,
        bucket_schema(
            "student_scores",
            "studentId",
            vec![IndexSpec::single("classId")],
            "get-student-scores",
            Expendable,
        )?,
    ])
}

pub fn default_write_operations() -> Result<Vec<WriteOperation>, AppError> {
    Ok(vec![
        write_operation("update-scores", "save-scores", Some("scores"))?,
        write_operation("update-remarks", "save-remarks", Some("remarks"))?,
        write_operation("update-student", "save-student", Some("students"))?,
        write_operation("update-class", "save-class", Some("classes"))?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> OperationRegistry {
        OperationRegistry::with_defaults().unwrap()
    }

    #[test]
    fn test_defaults_cover_core_buckets() {
        let registry = registry();
        assert_eq!(registry.buckets().count(), 8);
        assert_eq!(
            registry.priority_of(&BucketName::parse("classes").unwrap()),
            BucketPriority::Essential
        );
        assert_eq!(
            registry.priority_of(&BucketName::parse("student_scores").unwrap()),
            BucketPriority::Expendable
        );
        assert_eq!(
            registry.priority_of(&BucketName::parse("unregistered").unwrap()),
            BucketPriority::Standard
        );
        let op = registry
            .write_operation(&OperationKind::parse("update-scores").unwrap())
            .unwrap();
        assert_eq!(op.remote_operation, "save-scores");
        assert!(registry
            .write_operation(&OperationKind::parse("delete-school").unwrap())
            .is_none());
    }

    #[test]
    fn test_records_from_array_with_composite_index() {
        let registry = registry();
        let schema = registry
            .bucket(&BucketName::parse("scores").unwrap())
            .unwrap();
        let data = json!([
            { "scoreId": "sc1", "studentId": "s1", "classId": "c1", "subjectId": 7, "score": 81 },
            { "scoreId": 2, "studentId": "s2", "classId": "c1" },
            { "studentId": "s3" }
        ]);

        let records = records_from_value(schema, &data);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].primary_key.as_str(), "sc1");
        assert_eq!(records[0].index_value("class_subject"), Some("c1|7"));
        assert_eq!(records[1].primary_key.as_str(), "2");
        assert_eq!(records[1].index_value("studentId"), Some("s2"));
        assert_eq!(records[1].index_value("class_subject"), None);
    }

    #[test]
    fn test_single_object_yields_one_record() {
        let registry = registry();
        let schema = registry
            .bucket(&BucketName::parse("students").unwrap())
            .unwrap();
        let records = records_from_value(schema, &json!({ "studentId": "s9", "classId": "c2" }));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index_value("classId"), Some("c2"));

        assert!(records_from_value(schema, &json!("nope")).is_empty());
    }
}
