use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Reconciler;
use crate::envelope::EventEnvelope;
use crate::error::PipelineError;
use crate::extract::{extract_identifier, require_positive, validate_json, DEVICE_ID_PROPERTY};
use crate::store::StateStore;

/// Stores the payload of a device verbatim as its status document.
pub struct RawStatusReconciler {
    store: Arc<dyn StateStore>,
}

impl RawStatusReconciler {
    pub const DEVICE_TYPE: &'static str = "normal";

    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Reconciler for RawStatusReconciler {
    fn device_type(&self) -> &str {
        Self::DEVICE_TYPE
    }

    async fn reconcile(&self, envelope: &EventEnvelope) -> Result<(), PipelineError> {
        let device_id = require_positive(
            DEVICE_ID_PROPERTY,
            extract_identifier(envelope, DEVICE_ID_PROPERTY)?,
        )?;
        let status = validate_json(&envelope.payload)?;

        debug!(device_id, "processing device status");

        self.store.replace_device_status(device_id, status).await?;

        info!(device_id, "updated device status");

        Ok(())
    }
}
