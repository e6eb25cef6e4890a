use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{PartError, PartResult};

/// User metadata attached to an object when its upload is opened
pub type ObjectMetadata = BTreeMap<String, String>;

/// Metadata key carrying the stream generation that wrote an object
pub const GENERATION_ID_METADATA_KEY: &str = "ab-generation-id";

/// One chunk of an object under assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Destination object key; groups parts of the same object
    pub key: String,
    /// Opaque correlation id handed back with the completed object
    pub file_number: u64,
    /// Position of this part within its object
    pub part_index: u64,
    /// Payload; `None` (or empty) marks a placeholder part
    pub bytes: Option<Bytes>,
    /// Closes the sequence for `key`
    pub is_final: bool,
}

impl Part {
    pub fn new<K: Into<String>>(key: K, part_index: u64) -> Self {
        Self {
            key: key.into(),
            file_number: 0,
            part_index,
            bytes: None,
            is_final: false,
        }
    }

    pub fn with_bytes<B: Into<Bytes>>(mut self, bytes: B) -> Self {
        self.bytes = Some(bytes.into());
        self
    }

    pub fn with_file_number(mut self, file_number: u64) -> Self {
        self.file_number = file_number;
        self
    }

    pub fn final_part(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// True when the part carries no payload
    pub fn is_empty(&self) -> bool {
        self.bytes.as_ref().map_or(true, Bytes::is_empty)
    }

    /// Payload size in bytes (0 for placeholders)
    pub fn size(&self) -> usize {
        self.bytes.as_ref().map_or(0, Bytes::len)
    }
}

/// Hands out consecutive parts for a single object
#[derive(Debug)]
pub struct PartFactory {
    key: String,
    file_number: u64,
    next_index: u64,
    total_size: u64,
    finished: bool,
    part_size: Option<u64>,
}

impl PartFactory {
    pub fn new<K: Into<String>>(key: K, file_number: u64) -> Self {
        Self {
            key: key.into(),
            file_number,
            next_index: 0,
            total_size: 0,
            finished: false,
            part_size: None,
        }
    }

    /// Cap the payload of each part produced by [`PartFactory::split`]
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size.max(1));
        self
    }

    /// Produce the next part in sequence. No parts may follow a final one.
    pub fn next_part(&mut self, bytes: Option<Bytes>, is_final: bool) -> PartResult<Part> {
        if self.finished {
            return Err(PartError::invalid(format!(
                "Final part already issued for {}",
                self.key
            )));
        }

        let part = Part {
            key: self.key.clone(),
            file_number: self.file_number,
            part_index: self.next_index,
            bytes,
            is_final,
        };

        self.next_index += 1;
        self.total_size += part.size() as u64;
        self.finished = is_final;
        Ok(part)
    }

    /// Cut `bytes` into consecutive parts of at most the configured part
    /// size. With `is_final`, the last of them carries the final marker; an
    /// empty final payload still yields one (empty) final part.
    pub fn split(&mut self, bytes: Bytes, is_final: bool) -> PartResult<Vec<Part>> {
        let chunk = self
            .part_size
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or(usize::MAX);

        let mut parts = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let end = bytes.len().min(offset.saturating_add(chunk));
            let last = end == bytes.len();
            parts.push(self.next_part(Some(bytes.slice(offset..end)), is_final && last)?);
            offset = end;
        }

        if parts.is_empty() && is_final {
            parts.push(self.next_part(None, true)?);
        }
        Ok(parts)
    }

    pub fn part_size(&self) -> Option<u64> {
        self.part_size
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bytes handed out so far
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// The logical stream a coordinator writes objects for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationStream {
    pub namespace: Option<String>,
    pub name: String,
    pub generation_id: u64,
}

impl DestinationStream {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            generation_id: 0,
        }
    }

    pub fn with_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_generation_id(mut self, generation_id: u64) -> Self {
        self.generation_id = generation_id;
        self
    }
}

impl std::fmt::Display for DestinationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}.{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Object metadata written for every object of `stream`
pub fn metadata_for(stream: &DestinationStream) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new();
    metadata.insert(
        GENERATION_ID_METADATA_KEY.to_string(),
        stream.generation_id.to_string(),
    );
    metadata
}
