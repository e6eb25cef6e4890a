use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{ObjectMetadata, ObjectStorageClient, PartError, PartResult, RemoteObject, StreamingUpload};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    metadata: ObjectMetadata,
    version: u64,
}

#[derive(Debug, Default)]
struct Faults {
    open: HashSet<String>,
    upload: HashSet<String>,
    complete: HashSet<String>,
}

#[derive(Default)]
struct MemoryInner {
    objects: RwLock<HashMap<String, StoredObject>>,
    opens: Mutex<HashMap<String, usize>>,
    upload_calls: Mutex<HashMap<String, Vec<u64>>>,
    faults: Mutex<Faults>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    open_latency: Mutex<Option<Duration>>,
    total_opens: AtomicUsize,
}

/// In-process object store.
///
/// Parts may arrive sparse and in any order; `complete` concatenates the
/// accepted parts in index order. Keeps call counts and supports one-shot
/// fault injection, which makes it the store used throughout the tests.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<MemoryInner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every transport open by `latency`
    pub fn with_open_latency(self, latency: Duration) -> Self {
        *self.inner.open_latency.lock() = Some(latency);
        self
    }

    /// Block opens for `key` until the returned gate is notified with
    /// `notify_one`, or `release_opens` is called
    pub fn hold_opens(&self, key: &str) -> Arc<Notify> {
        self.inner
            .gates
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn release_opens(&self, key: &str) {
        if let Some(gate) = self.inner.gates.lock().remove(key) {
            gate.notify_waiters();
        }
    }

    pub fn fail_next_open(&self, key: &str) {
        self.inner.faults.lock().open.insert(key.to_string());
    }

    pub fn fail_next_upload(&self, key: &str) {
        self.inner.faults.lock().upload.insert(key.to_string());
    }

    pub fn fail_next_complete(&self, key: &str) {
        self.inner.faults.lock().complete.insert(key.to_string());
    }

    /// Committed content of `key`
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.inner.objects.read().get(key).map(|o| o.bytes.clone())
    }

    pub fn object_metadata(&self, key: &str) -> Option<ObjectMetadata> {
        self.inner.objects.read().get(key).map(|o| o.metadata.clone())
    }

    /// How many times `key` has been committed
    pub fn object_version(&self, key: &str) -> Option<u64> {
        self.inner.objects.read().get(key).map(|o| o.version)
    }

    /// Transport opens attempted for `key`
    pub fn open_count(&self, key: &str) -> usize {
        self.inner.opens.lock().get(key).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.inner.total_opens.load(Ordering::SeqCst)
    }

    /// Indices passed to `upload_part` for `key`, in call order
    pub fn upload_calls(&self, key: &str) -> Vec<u64> {
        self.inner
            .upload_calls
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn injected(kind: &str, key: &str) -> PartError {
        PartError::backend(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("injected {} failure for {}", kind, key),
        ))
    }
}

#[async_trait]
impl ObjectStorageClient for MemoryObjectStore {
    async fn start_streaming_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> PartResult<Box<dyn StreamingUpload>> {
        *self.inner.opens.lock().entry(key.to_string()).or_insert(0) += 1;
        self.inner.total_opens.fetch_add(1, Ordering::SeqCst);

        let gate = self.inner.gates.lock().get(key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let latency = *self.inner.open_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.inner.faults.lock().open.remove(key) {
            return Err(Self::injected("open", key));
        }

        Ok(Box::new(MemoryUpload {
            inner: self.inner.clone(),
            key: key.to_string(),
            upload_id: format!("mem_{}", Uuid::new_v4().simple()),
            metadata: metadata.clone(),
            parts: Mutex::new(BTreeMap::new()),
            completed: AtomicBool::new(false),
        }))
    }
}

struct MemoryUpload {
    inner: Arc<MemoryInner>,
    key: String,
    upload_id: String,
    metadata: ObjectMetadata,
    parts: Mutex<BTreeMap<u64, Bytes>>,
    completed: AtomicBool,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn upload_part(&self, bytes: Bytes, index: u64) -> PartResult<()> {
        self.inner
            .upload_calls
            .lock()
            .entry(self.key.clone())
            .or_default()
            .push(index);

        if self.inner.faults.lock().upload.remove(&self.key) {
            return Err(MemoryObjectStore::injected("upload", &self.key));
        }
        if self.completed.load(Ordering::Acquire) {
            return Err(PartError::invalid(format!(
                "Upload {} of {} is already completed",
                self.upload_id, self.key
            )));
        }

        self.parts.lock().insert(index, bytes);
        Ok(())
    }

    async fn complete(&self) -> PartResult<RemoteObject> {
        if self.inner.faults.lock().complete.remove(&self.key) {
            return Err(MemoryObjectStore::injected("complete", &self.key));
        }
        if self.completed.swap(true, Ordering::AcqRel) {
            return Err(PartError::invalid(format!(
                "Upload {} of {} is already completed",
                self.upload_id, self.key
            )));
        }

        let (bytes, parts) = {
            let parts = self.parts.lock();
            let mut buf = BytesMut::with_capacity(parts.values().map(Bytes::len).sum());
            for chunk in parts.values() {
                buf.extend_from_slice(chunk);
            }
            (buf.freeze(), parts.len() as u32)
        };

        let version = {
            let mut objects = self.inner.objects.write();
            let version = objects.get(&self.key).map_or(1, |o| o.version + 1);
            objects.insert(
                self.key.clone(),
                StoredObject {
                    bytes: bytes.clone(),
                    metadata: self.metadata.clone(),
                    version,
                },
            );
            version
        };

        Ok(RemoteObject::new(&self.key, bytes.len() as u64, parts)
            .with_etag(format!("\"{}-{}\"", self.upload_id, parts))
            .with_version_id(version.to_string())
            .with_location(format!("memory://{}", self.key)))
    }

    fn upload_id(&self) -> Option<&str> {
        Some(&self.upload_id)
    }
}
