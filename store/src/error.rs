use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database is corrupted: {0}")]
    Corruption(String),
}

/// Closed classification of store failures.
///
/// Callers branch on this instead of inspecting backend-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unavailable,
    Backend,
    Serialization,
    Corruption,
}

impl ErrorKind {
    /// Stable label used in error records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "store_unavailable",
            ErrorKind::Backend => "backend",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Corruption => "corruption",
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Duplicate(_) => ErrorKind::Conflict,
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::Backend(_) => ErrorKind::Backend,
            StoreError::Serialization(_) => ErrorKind::Serialization,
            StoreError::Corruption(_) => ErrorKind::Corruption,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}
