use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable object produced by finalizing a streaming upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub key: String,
    pub size_bytes: u64,
    /// Number of byte-carrying parts the store accepted
    pub parts: u32,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub location: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl RemoteObject {
    pub fn new<K: Into<String>>(key: K, size_bytes: u64, parts: u32) -> Self {
        Self {
            key: key.into(),
            size_bytes,
            parts,
            etag: None,
            version_id: None,
            location: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_version_id<S: Into<String>>(mut self, version_id: S) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    pub fn with_location<S: Into<String>>(mut self, location: S) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Result of handing one part to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// The object for `key` still has outstanding parts
    Incomplete { key: String },
    /// The object was committed by this call
    Completed {
        object: RemoteObject,
        file_number: u64,
    },
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Incomplete { key } => key,
            Self::Completed { object, .. } => &object.key,
        }
    }

    /// The committed object, if this outcome completed one
    pub fn into_object(self) -> Option<RemoteObject> {
        match self {
            Self::Completed { object, .. } => Some(object),
            Self::Incomplete { .. } => None,
        }
    }
}
