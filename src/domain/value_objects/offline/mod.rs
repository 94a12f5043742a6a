pub mod bucket_name;
pub mod mutation_id;
pub mod operation_kind;
pub mod payload;
pub mod record_key;

pub use bucket_name::BucketName;
pub use mutation_id::MutationId;
pub use operation_kind::OperationKind;
pub use payload::SyncPayload;
pub use record_key::RecordKey;
