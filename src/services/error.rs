//! Link handshake errors

/// Failures of the session, handshake and device operations.
///
/// `Storage` is transient and may be retried. `SessionAlreadyClaimed` is a
/// final answer and must never be retried.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Session never existed, has expired, or was cancelled
    #[error("Session expired or unknown")]
    SessionExpiredOrUnknown,

    /// Session was already consumed by another scan
    #[error("Session already claimed")]
    SessionAlreadyClaimed,

    /// Underlying store failed or timed out
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Device absent or owned by someone else
    #[error("Not found")]
    NotFound,

    /// Missing or invalid credentials
    #[error("Unauthorized")]
    Unauthorized,
}

impl LinkError {
    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(LinkError::Storage(anyhow::anyhow!("db down")).is_retryable());
        assert!(!LinkError::SessionAlreadyClaimed.is_retryable());
        assert!(!LinkError::SessionExpiredOrUnknown.is_retryable());
        assert!(!LinkError::NotFound.is_retryable());
    }
}
