pub mod offline;

pub use offline::{
    BucketPriority, BucketSchema, BucketStatus, BucketUsage, CacheStatusSnapshot, CachedRecord,
    FailureKind, FreshnessMarker, IndexSpec, MutationFailure, PendingMutation, SyncOutcome,
    WriteOperation,
};
