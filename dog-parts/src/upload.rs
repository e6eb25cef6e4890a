use async_trait::async_trait;

use crate::{Part, PartResult, UploadOutcome};

/// Turns a stream of parts into committed objects
#[async_trait]
pub trait PartCoordinator: Send + Sync {
    /// Hand one part to the coordinator.
    ///
    /// Safe to call concurrently, including for parts of the same key.
    /// Returns `Completed` for exactly one call per object: the one whose
    /// part made the object complete.
    async fn process_part(&self, part: Part) -> PartResult<UploadOutcome>;

    /// Keys with an upload currently in flight
    fn in_flight_keys(&self) -> Vec<String>;
}
