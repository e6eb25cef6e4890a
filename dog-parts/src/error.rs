use std::sync::Arc;
use thiserror::Error;

/// Result type for part coordination
pub type PartResult<T> = Result<T, PartError>;

/// Error shared between every caller waiting on the same session open
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while assembling parts into objects
#[derive(Error, Debug)]
pub enum PartError {
    #[error("Failed to open streaming upload for {key}: {source}")]
    SessionOpen {
        key: String,
        #[source]
        source: SharedError,
    },

    #[error("Failed to upload part {part_index} of {key}: {source}")]
    PartUpload {
        key: String,
        part_index: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to finalize upload of {key}: {source}")]
    Finalize {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Upload session for {key} was cancelled before its transport opened")]
    Cancelled { key: String },

    #[error("Invalid part: {message}")]
    Invalid { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PartError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid part error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Wrap a transport-open failure; the source is shared with all waiters
    pub fn session_open<S: Into<String>>(key: S, source: SharedError) -> Self {
        Self::SessionOpen {
            key: key.into(),
            source,
        }
    }

    /// Wrap a failed part write
    pub fn part_upload<S, E>(key: S, part_index: u64, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::PartUpload {
            key: key.into(),
            part_index,
            source: Box::new(error),
        }
    }

    /// Wrap a failed commit
    pub fn finalize<S, E>(key: S, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Finalize {
            key: key.into(),
            source: Box::new(error),
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(key: S) -> Self {
        Self::Cancelled { key: key.into() }
    }

    pub fn is_session_open(&self) -> bool {
        matches!(self, Self::SessionOpen { .. })
    }

    pub fn is_part_upload(&self) -> bool {
        matches!(self, Self::PartUpload { .. })
    }

    pub fn is_finalize(&self) -> bool {
        matches!(self, Self::Finalize { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Object key the error relates to, when known
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::SessionOpen { key, .. }
            | Self::PartUpload { key, .. }
            | Self::Finalize { key, .. }
            | Self::Cancelled { key } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_reported_for_session_errors() {
        let err = PartError::session_open("a/b", Arc::new(PartError::invalid("denied")));
        assert!(err.is_session_open());
        assert_eq!(err.key(), Some("a/b"));
        assert!(err.to_string().contains("denied"));

        let err = PartError::invalid("bad index");
        assert_eq!(err.key(), None);
    }

    #[test]
    fn test_part_upload_carries_index() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset");
        let err = PartError::part_upload("k", 7, io);
        assert!(err.is_part_upload());
        assert_eq!(err.to_string(), "Failed to upload part 7 of k: reset");
    }
}
