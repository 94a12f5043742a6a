pub mod entities;
pub mod value_objects;

pub use entities::{CachedRecord, PendingMutation, SyncOutcome};
pub use value_objects::{BucketName, MutationId, OperationKind, RecordKey, SyncPayload};
