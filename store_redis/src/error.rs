use liquid_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisStoreError {
    /// Could not reach the server (refused, dropped, timed out).
    #[error("redis unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Command(String),

    #[error("malformed value at {key}: {detail}")]
    Malformed { key: String, detail: String },
}

impl From<redis::RedisError> for RedisStoreError {
    fn from(e: redis::RedisError) -> Self {
        if is_connectivity(&e) {
            RedisStoreError::Unavailable(e.to_string())
        } else {
            RedisStoreError::Command(e.to_string())
        }
    }
}

impl From<RedisStoreError> for StoreError {
    fn from(e: RedisStoreError) -> Self {
        match e {
            RedisStoreError::Unavailable(m) => StoreError::Unavailable(m),
            RedisStoreError::Command(m) => StoreError::Backend(m),
            m @ RedisStoreError::Malformed { .. } => StoreError::Corruption(m.to_string()),
        }
    }
}

pub(crate) fn is_connectivity(e: &redis::RedisError) -> bool {
    e.kind() == redis::ErrorKind::IoError
        || e.is_connection_refusal()
        || e.is_io_error()
        || e.is_timeout()
        || e.is_connection_dropped()
}
