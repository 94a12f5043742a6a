pub mod offline;

pub use offline::{BucketName, MutationId, OperationKind, RecordKey, SyncPayload};
