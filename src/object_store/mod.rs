//! Storage for generated poster images
//!
//! Objects are addressed by slash separated keys and are publicly readable
//! once written.

mod local;

pub use local::LocalObjectStore;

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Component, Path};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("object storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the public URL
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str)
        -> Result<String, StorageError>;

    /// Remove `key`. Removing a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Fresh key for a poster image owned by `user_id`:
/// `posters/{user_id}/{unix_millis}_{random}.png`
pub fn poster_key(user_id: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "posters/{}/{}_{}.png",
        user_id,
        Utc::now().timestamp_millis(),
        &random[..8]
    )
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    let all_normal = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if key.is_empty() || !all_normal || key.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) use memory::MemoryObjectStore;
