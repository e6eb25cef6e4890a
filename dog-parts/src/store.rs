use async_trait::async_trait;
use bytes::Bytes;

use crate::{ObjectMetadata, PartResult, RemoteObject, UploadConfig};

/// Object-store client able to open streaming (multipart) uploads
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// Open a streaming upload for `key`.
    ///
    /// Fails if the session cannot be opened (auth, network, naming conflict).
    async fn start_streaming_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> PartResult<Box<dyn StreamingUpload>>;

    /// Reject upload settings this store cannot honour
    fn check_config(&self, _config: &UploadConfig) -> PartResult<()> {
        Ok(())
    }
}

/// One open upload session for one object key.
///
/// Implementations are shared by every caller handling parts of the same key,
/// so `upload_part` may be invoked concurrently and in any index order.
/// Each adapter documents whether it needs contiguous indices; the adapters
/// in this crate accept sparse ones.
#[async_trait]
pub trait StreamingUpload: Send + Sync {
    /// Store `bytes` as the part at `index`
    async fn upload_part(&self, bytes: Bytes, index: u64) -> PartResult<()>;

    /// Commit every accepted part into the final object.
    ///
    /// Called at most once per handle unless a previous call failed.
    async fn complete(&self) -> PartResult<RemoteObject>;

    /// Store-specific upload identifier, for logging
    fn upload_id(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
impl<T: ObjectStorageClient + ?Sized> ObjectStorageClient for std::sync::Arc<T> {
    async fn start_streaming_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> PartResult<Box<dyn StreamingUpload>> {
        (**self).start_streaming_upload(key, metadata).await
    }

    fn check_config(&self, config: &UploadConfig) -> PartResult<()> {
        (**self).check_config(config)
    }
}
