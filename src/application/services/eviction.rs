use crate::application::services::operation_registry::OperationRegistry;
use crate::domain::entities::{BucketPriority, BucketUsage};
use crate::domain::value_objects::BucketName;

/// Chooses which buckets to clear when the local store runs out of space.
#[derive(Debug, Clone, Default)]
pub struct EvictionPolicy;

impl EvictionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Every non-empty expendable bucket, or failing that the least recently accessed non-empty
    /// standard bucket. Essential buckets and `protected` are never selected.
    pub fn select_victims(
        &self,
        usage: &[BucketUsage],
        protected: &BucketName,
        registry: &OperationRegistry,
    ) -> Vec<BucketName> {
        let candidates: Vec<&BucketUsage> = usage
            .iter()
            .filter(|u| u.record_count > 0 && &u.bucket != protected)
            .collect();

        let expendable: Vec<BucketName> = candidates
            .iter()
            .filter(|u| registry.priority_of(&u.bucket) == BucketPriority::Expendable)
            .map(|u| u.bucket.clone())
            .collect();
        if !expendable.is_empty() {
            return expendable;
        }

        // never-accessed buckets sort first
        candidates
            .into_iter()
            .filter(|u| registry.priority_of(&u.bucket) == BucketPriority::Standard)
            .min_by_key(|u| u.last_accessed_at)
            .map(|u| vec![u.bucket.clone()])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn usage(bucket: &str, records: u64, accessed_minutes_ago: Option<i64>) -> BucketUsage {
        BucketUsage {
            bucket: BucketName::parse(bucket).unwrap(),
            record_count: records,
            payload_bytes: records * 100,
            last_synced_at: None,
            last_accessed_at: accessed_minutes_ago.map(|m| Utc::now() - Duration::minutes(m)),
        }
    }

    fn bucket(name: &str) -> BucketName {
        BucketName::parse(name).unwrap()
    }

    #[test]
    fn test_expendable_buckets_go_first() {
        let registry = OperationRegistry::with_defaults().unwrap();
        let usage = vec![
            usage("classes", 10, Some(500)),
            usage("students", 10, Some(300)),
            usage("student_scores", 40, Some(1)),
        ];

        let victims = EvictionPolicy::new().select_victims(&usage, &bucket("scores"), &registry);
        assert_eq!(victims, vec![bucket("student_scores")]);
    }

    #[test]
    fn test_least_recently_accessed_standard_bucket_when_no_expendable() {
        let registry = OperationRegistry::with_defaults().unwrap();
        let usage = vec![
            usage("classes", 10, Some(900)),
            usage("students", 10, Some(30)),
            usage("remarks", 10, Some(120)),
            usage("student_scores", 0, None),
        ];

        let victims = EvictionPolicy::new().select_victims(&usage, &bucket("scores"), &registry);
        assert_eq!(victims, vec![bucket("remarks")]);
    }

    #[test]
    fn test_protected_and_essential_buckets_are_kept() {
        let registry = OperationRegistry::with_defaults().unwrap();
        let usage = vec![usage("classes", 10, Some(900)), usage("scores", 10, Some(60))];

        let victims = EvictionPolicy::new().select_victims(&usage, &bucket("scores"), &registry);
        assert!(victims.is_empty());
    }
}
