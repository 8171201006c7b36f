//! Per-device-type reconcilers and the registry that dispatches to them.
use async_trait::async_trait;

use crate::envelope::EventEnvelope;
use crate::error::PipelineError;

mod aggregate;
mod raw_status;
mod registry;

pub use aggregate::{AggregateStateReconciler, OccupancyObservation};
pub use raw_status::RawStatusReconciler;
pub use registry::{ReconcilerRegistry, RegistryBuilder};

/// Merges the payload of an event into the persisted state of one entity kind.
///
/// Extraction and validation happen before any storage call, so a rejected event never
/// mutates state.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The device type this reconciler is registered under. Matched case-sensitively.
    fn device_type(&self) -> &str;

    async fn reconcile(&self, envelope: &EventEnvelope) -> Result<(), PipelineError>;
}
