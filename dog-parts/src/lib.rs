//! # dog-parts: Part-to-object upload coordination
//!
//! `dog-parts` assembles a stream of object *parts* into objects in remote
//! object storage. Parts for the same key may come from many tasks at once;
//! each part is streamed straight into a multipart upload, so no object is
//! ever buffered whole in memory.
//!
//! ## Guarantees
//!
//! - **One upload per key**: the first part for a key opens the streaming
//!   upload; every concurrent part for that key waits for, and shares, it
//! - **Order independent**: an object is complete when its final part and
//!   every index before it have arrived, in whatever order
//! - **Commit exactly once**: the caller whose part completes the object
//!   commits it and gets [`UploadOutcome::Completed`]; everyone else gets
//!   [`UploadOutcome::Incomplete`]
//! - **Retryable failures**: a failed open is reported to every waiter and
//!   forgotten, so the next part retries it; failed part writes and commits
//!   leave the session in place for a redelivery
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_parts::prelude::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> PartResult<()> {
//! let store = MemoryObjectStore::new();
//! let coordinator = DefaultPartCoordinator::new(
//!     DestinationStream::new("users").with_generation_id(1),
//!     store.clone(),
//!     UploadConfig::default(),
//! )?;
//!
//! let mut parts = PartFactory::new("users/2024/file-0.jsonl", 0);
//! let first = parts.next_part(Some(Bytes::from_static(b"{\"id\":1}\n")), false)?;
//! let last = parts.next_part(None, true)?;
//!
//! assert!(!coordinator.process_part(first).await?.is_completed());
//! let outcome = coordinator.process_part(last).await?;
//! assert!(outcome.is_completed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │   PartCoordinator        │  ← process_part: open, write, track, commit
//! ├────────────┬─────────────┤
//! │ Session    │ Completeness│  ← per-key state, sharded by key
//! │ Registry   │ Tracker     │
//! ├────────────┴─────────────┤
//! │   ObjectStorageClient    │  ← S3, in-memory, custom
//! └──────────────────────────┘
//! ```

mod config;
mod coordinator;
mod error;
mod memory_store;
mod receipt;
mod s3_store;
mod session;
pub mod store;
mod tracker;
mod types;
mod upload;

// Re-export main types for clean API
pub use config::{S3Config, UploadConfig};
pub use coordinator::DefaultPartCoordinator;
pub use error::{PartError, PartResult, SharedError};
pub use memory_store::MemoryObjectStore;
pub use receipt::{RemoteObject, UploadOutcome};
pub use s3_store::{S3ObjectStore, S3StreamingUpload, MAX_PART_NUMBER, MIN_PART_SIZE};
pub use session::{FinalizeGuard, SessionRegistry, UploadSession};
pub use store::{ObjectStorageClient, StreamingUpload};
pub use tracker::CompletenessTracker;
pub use types::{
    metadata_for, DestinationStream, ObjectMetadata, Part, PartFactory,
    GENERATION_ID_METADATA_KEY,
};
pub use upload::PartCoordinator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        DefaultPartCoordinator, DestinationStream, MemoryObjectStore, ObjectStorageClient, Part,
        PartCoordinator, PartError, PartFactory, PartResult, RemoteObject, StreamingUpload,
        UploadConfig, UploadOutcome,
    };
}
