pub mod cache_status;
pub mod cached_record;
pub mod pending_mutation;
pub mod schema;
pub mod sync_outcome;

pub use cache_status::{BucketStatus, BucketUsage, CacheStatusSnapshot, FreshnessMarker};
pub use cached_record::CachedRecord;
pub use pending_mutation::PendingMutation;
pub use schema::{BucketPriority, BucketSchema, IndexSpec, WriteOperation};
pub use sync_outcome::{FailureKind, MutationFailure, SyncOutcome};
