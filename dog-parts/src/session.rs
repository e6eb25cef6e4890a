use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SharedError;
use crate::{CompletenessTracker, PartError, PartResult, StreamingUpload};

/// Published outcome of opening a session's transport
#[derive(Clone)]
enum TransportState {
    Ready(Arc<dyn StreamingUpload>),
    Failed(SharedError),
    Cancelled,
}

/// In-flight upload state for one object key
pub struct UploadSession {
    key: String,
    id: Uuid,
    created_at: Instant,
    started: AtomicBool,
    transport: watch::Sender<Option<TransportState>>,
    tracker: CompletenessTracker,
    finalizing: AtomicBool,
    completed: AtomicBool,
    uploads: Semaphore,
    upload_slots: u32,
}

impl UploadSession {
    pub fn new<K: Into<String>>(key: K, max_concurrent_part_uploads: usize) -> Self {
        let (transport, _) = watch::channel(None);
        let upload_slots = u32::try_from(max_concurrent_part_uploads.max(1)).unwrap_or(u32::MAX);
        Self {
            key: key.into(),
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            started: AtomicBool::new(false),
            transport,
            tracker: CompletenessTracker::new(),
            finalizing: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            uploads: Semaphore::new(upload_slots as usize),
            upload_slots,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Identifies this session apart from earlier sessions for the same key
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn tracker(&self) -> &CompletenessTracker {
        &self.tracker
    }

    /// Wins the right to open the transport. True for exactly one caller.
    pub fn try_start(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Wait for the opener to publish the transport.
    ///
    /// Every waiter observes the same handle, or the same failure.
    pub async fn transport(&self) -> PartResult<Arc<dyn StreamingUpload>> {
        let mut rx = self.transport.subscribe();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PartError::cancelled(&self.key))?
            .clone();

        match state {
            Some(TransportState::Ready(upload)) => Ok(upload),
            Some(TransportState::Failed(source)) => Err(PartError::session_open(&self.key, source)),
            Some(TransportState::Cancelled) | None => Err(PartError::cancelled(&self.key)),
        }
    }

    fn publish(&self, state: TransportState) {
        // send_replace stores the value even while nobody is subscribed
        self.transport.send_replace(Some(state));
    }

    /// Bound concurrent part writes for this key
    pub async fn acquire_upload_slot(&self) -> PartResult<SemaphorePermit<'_>> {
        self.uploads
            .acquire()
            .await
            .map_err(|_| PartError::cancelled(&self.key))
    }

    /// Take every upload slot, waiting for part writes already in flight.
    /// While held, no part write for this key can start.
    pub async fn drain_uploads(&self) -> PartResult<SemaphorePermit<'_>> {
        self.uploads
            .acquire_many(self.upload_slots)
            .await
            .map_err(|_| PartError::cancelled(&self.key))
    }

    /// One-time gate for committing the upload. Held until dropped or
    /// marked committed; a dropped gate lets a later caller try again.
    pub fn try_begin_finalize(&self) -> Option<FinalizeGuard<'_>> {
        self.finalizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FinalizeGuard {
                session: self,
                committed: false,
            })
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("started", &self.is_started())
            .field("completed", &self.is_completed())
            .field("received", &self.tracker.received_count())
            .field("final_index", &self.tracker.final_index())
            .finish()
    }
}

/// Exclusive right to finalize a session
pub struct FinalizeGuard<'a> {
    session: &'a UploadSession,
    committed: bool,
}

impl FinalizeGuard<'_> {
    /// The remote object exists; no caller may finalize again
    pub fn commit(mut self) {
        self.committed = true;
        self.session.completed.store(true, Ordering::Release);
    }
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.session.finalizing.store(false, Ordering::Release);
        }
    }
}

/// Process-wide map from object key to its in-flight session
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<UploadSession>>,
    max_concurrent_part_uploads: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_part_uploads: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_concurrent_part_uploads: max_concurrent_part_uploads.max(1),
        }
    }

    /// Existing session for `key`, or a freshly installed one.
    /// Concurrent callers for the same key always get the same session.
    pub fn get_or_create(&self, key: &str) -> Arc<UploadSession> {
        if let Some(existing) = self.sessions.get(key) {
            return existing.value().clone();
        }

        self.sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating upload session for {}", key);
                Arc::new(UploadSession::new(key, self.max_concurrent_part_uploads))
            })
            .value()
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<Arc<UploadSession>> {
        self.sessions.get(key).map(|s| s.value().clone())
    }

    /// Drop whatever session is registered for `key`
    pub fn remove(&self, key: &str) -> Option<Arc<UploadSession>> {
        self.sessions.remove(key).map(|(_, session)| session)
    }

    /// Drop `session` only if it is still the one registered for `key`,
    /// leaving any newer session for the same key alone
    pub fn evict(&self, key: &str, session: &Arc<UploadSession>) -> bool {
        self.sessions
            .remove_if(key, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(crate::UploadConfig::default().max_concurrent_part_uploads)
    }
}

/// Held by the caller opening a session's transport. Publishes the result
/// to every waiter; if dropped unpublished, waiters are released with
/// `Cancelled` and the session is evicted.
pub(crate) struct OpenGuard<'a> {
    registry: &'a SessionRegistry,
    session: &'a Arc<UploadSession>,
    published: bool,
}

impl<'a> OpenGuard<'a> {
    pub(crate) fn new(registry: &'a SessionRegistry, session: &'a Arc<UploadSession>) -> Self {
        Self {
            registry,
            session,
            published: false,
        }
    }

    pub(crate) fn ready(mut self, upload: Arc<dyn StreamingUpload>) {
        self.published = true;
        self.session.publish(TransportState::Ready(upload));
    }

    /// Broadcast the failure, then evict so the next part can retry the open
    pub(crate) fn failed(mut self, source: SharedError) {
        self.published = true;
        self.session.publish(TransportState::Failed(source));
        self.registry.evict(self.session.key(), self.session);
    }
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            warn!(
                "Opening upload for {} was cancelled; releasing waiters",
                self.session.key()
            );
            self.session.publish(TransportState::Cancelled);
            self.registry.evict(self.session.key(), self.session);
        }
    }
}
