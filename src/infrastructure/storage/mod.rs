pub mod memory_key_value;
pub mod sqlite_key_value;

pub use memory_key_value::InMemoryKeyValueStore;
pub use sqlite_key_value::SqliteKeyValueStore;
