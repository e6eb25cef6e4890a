use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::SharedError;
use crate::session::OpenGuard;
use crate::{
    metadata_for, DestinationStream, ObjectStorageClient, Part, PartCoordinator, PartError,
    PartFactory, PartResult, SessionRegistry, StreamingUpload, UploadConfig, UploadOutcome, UploadSession,
};

/// Default coordinator: one streaming upload per key, opened by the first
/// part to arrive and committed by the part that completes the object
pub struct DefaultPartCoordinator {
    stream: DestinationStream,
    client: Arc<dyn ObjectStorageClient>,
    registry: Arc<SessionRegistry>,
    config: UploadConfig,
}

impl DefaultPartCoordinator {
    pub fn new<C>(stream: DestinationStream, client: C, config: UploadConfig) -> PartResult<Self>
    where
        C: ObjectStorageClient + 'static,
    {
        config.validate()?;
        client.check_config(&config)?;
        Ok(Self {
            stream,
            client: Arc::new(client),
            registry: Arc::new(SessionRegistry::new(config.max_concurrent_part_uploads)),
            config,
        })
    }

    pub fn stream(&self) -> &DestinationStream {
        &self.stream
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Part factory for `key` that splits payloads at the configured part size
    pub fn part_factory<K: Into<String>>(&self, key: K, file_number: u64) -> PartFactory {
        PartFactory::new(key, file_number).with_part_size(self.config.part_size_bytes)
    }

    /// Open the transport if this caller won the start race, otherwise wait
    /// for whoever did
    async fn resolve_transport(
        &self,
        session: &Arc<UploadSession>,
    ) -> PartResult<Arc<dyn StreamingUpload>> {
        if !session.try_start() {
            return session.transport().await;
        }

        let guard = OpenGuard::new(&self.registry, session);
        let metadata = metadata_for(&self.stream);
        let open = self.client.start_streaming_upload(session.key(), &metadata);

        let opened = match self.config.session_open_timeout {
            Some(limit) => match tokio::time::timeout(limit, open).await {
                Ok(result) => result,
                Err(elapsed) => Err(PartError::backend(elapsed)),
            },
            None => open.await,
        };

        match opened {
            Ok(upload) => {
                let upload: Arc<dyn StreamingUpload> = Arc::from(upload);
                info!(
                    "Started streaming upload of {} for stream {} (upload_id={:?})",
                    session.key(),
                    self.stream,
                    upload.upload_id()
                );
                guard.ready(upload.clone());
                Ok(upload)
            }
            Err(err) => {
                warn!("Failed to start streaming upload of {}: {}", session.key(), err);
                let source: SharedError = Arc::new(err);
                guard.failed(source.clone());
                Err(PartError::session_open(session.key(), source))
            }
        }
    }
}

#[async_trait]
impl PartCoordinator for DefaultPartCoordinator {
    #[instrument(skip_all, fields(key = %part.key, part_index = part.part_index))]
    async fn process_part(&self, part: Part) -> PartResult<UploadOutcome> {
        // Held for the whole call; never re-fetched from the registry.
        let session = self.registry.get_or_create(&part.key);
        let upload = self.resolve_transport(&session).await?;

        if session.is_completed() {
            debug!(
                "Ignoring part {} of {}: object already completed",
                part.part_index, part.key
            );
            return Ok(UploadOutcome::Incomplete { key: part.key });
        }

        session.tracker().check(&part)?;

        info!(
            "Processing loadable part {} of {} (empty={} of size {})",
            part.part_index,
            part.key,
            part.is_empty(),
            part.size()
        );

        if let Some(bytes) = part.bytes.as_ref().filter(|b| !b.is_empty()) {
            let _permit = session.acquire_upload_slot().await?;
            // The object may have been committed while this write waited.
            if session.is_completed() {
                debug!(
                    "Dropping late part {} of {}: object already completed",
                    part.part_index, part.key
                );
                return Ok(UploadOutcome::Incomplete { key: part.key });
            }
            if let Err(err) = upload.upload_part(bytes.clone(), part.part_index).await {
                warn!("Upload of part {} of {} failed: {}", part.part_index, part.key, err);
                return Err(PartError::part_upload(&part.key, part.part_index, err));
            }
        }

        // Only parts the transport accepted count toward completeness.
        if !session.tracker().add_and_check(&part)? {
            return Ok(UploadOutcome::Incomplete { key: part.key });
        }

        let Some(gate) = session.try_begin_finalize() else {
            debug!("Upload of {} is already being finalized", part.key);
            return Ok(UploadOutcome::Incomplete { key: part.key });
        };

        // Redelivered parts must not rewrite the upload while it commits.
        let _writes = session.drain_uploads().await?;
        match upload.complete().await {
            Ok(object) => {
                gate.commit();
                self.registry.evict(&part.key, &session);
                info!("Completed upload of {}", object.key);
                Ok(UploadOutcome::Completed {
                    object,
                    file_number: part.file_number,
                })
            }
            Err(err) => {
                warn!("Finalizing upload of {} failed: {}", part.key, err);
                Err(PartError::finalize(&part.key, err))
            }
        }
    }

    fn in_flight_keys(&self) -> Vec<String> {
        self.registry.keys()
    }
}
