use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::Reconciler;
use crate::envelope::EventEnvelope;
use crate::error::PipelineError;
use crate::extract::{extract_identifier, require_positive, ROOM_ID_PROPERTY};
use crate::store::{RoomStatusUpdate, StateStore};

/// An occupancy observation reported by a room's center device.
///
/// Occupancy is given either as `occupied` or as `state`, where only `"occupied"` means
/// occupied. `occupied` wins when both are present.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct OccupancyObservation {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub occupied: Option<bool>,
    pub count: i32,
    #[serde(default)]
    pub count_reliable: bool,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub reliability: i32,
    /// Device-side report time. Advisory only, storage time is authoritative.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl OccupancyObservation {
    pub fn is_occupied(&self) -> Option<bool> {
        self.occupied
            .or_else(|| self.state.as_deref().map(|state| state == "occupied"))
    }

    /// Turn the observation into the update for `room_id`, rejecting incomplete observations.
    pub fn into_update(self, room_id: i64) -> Result<RoomStatusUpdate, PipelineError> {
        let occupied = self.is_occupied().ok_or_else(|| {
            PipelineError::InvalidPayload("missing field `occupied` or `state`".to_owned())
        })?;

        if self.count < 0 {
            return Err(PipelineError::InvalidPayload(format!(
                "count must not be negative, got {}",
                self.count
            )));
        }

        Ok(RoomStatusUpdate {
            room_id,
            occupied,
            occupant_count: self.count,
            count_reliable: self.count_reliable,
            count_source: self.source,
            source_reliability: self.reliability,
        })
    }
}

/// Merges occupancy observations into the aggregate state of a room.
pub struct AggregateStateReconciler {
    store: Arc<dyn StateStore>,
}

impl AggregateStateReconciler {
    pub const DEVICE_TYPE: &'static str = "device-center";

    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reconciler for AggregateStateReconciler {
    fn device_type(&self) -> &str {
        Self::DEVICE_TYPE
    }

    async fn reconcile(&self, envelope: &EventEnvelope) -> Result<(), PipelineError> {
        let room_id = require_positive(
            ROOM_ID_PROPERTY,
            extract_identifier(envelope, ROOM_ID_PROPERTY)?,
        )?;
        let observation: OccupancyObservation = envelope.payload_as()?;
        let reported_at = observation.timestamp;
        let update = observation.into_update(room_id)?;

        debug!(
            room_id,
            occupied = update.occupied,
            count = update.occupant_count,
            reported_at = ?reported_at,
            "processing occupancy observation"
        );

        self.store.upsert_room_status(&update).await?;

        info!(
            room_id,
            occupied = update.occupied,
            count = update.occupant_count,
            "updated room status"
        );

        Ok(())
    }
}
