use crate::shared::error::AppError;
use async_trait::async_trait;

/// Flat persistent key → string store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    /// Atomically replaces the value at `key` when it currently equals `expected`
    /// (`None` meaning absent). `new = None` deletes the key. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, AppError>;
}
