use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn};

use crate::envelope::EventEnvelope;
use crate::error::{ErrorClass, PipelineError};
use crate::reconciler::ReconcilerRegistry;

/// Entry point used by the transport: dispatch one event to the reconciler for its device type.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<ReconcilerRegistry>,
}

impl Pipeline {
    pub fn new(registry: ReconcilerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ReconcilerRegistry {
        &self.registry
    }

    pub async fn deliver(
        &self,
        device_type: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PipelineError> {
        let Some(reconciler) = self.registry.lookup(device_type) else {
            let error = PipelineError::UnsupportedDeviceType(device_type.to_owned());
            warn!(device_type, %error, "rejected event");
            // Label unknown types as one bucket to keep metric cardinality bounded.
            record_outcome("unsupported", error.outcome());
            return Err(error);
        };

        let start_time = Instant::now();
        let result = reconciler.reconcile(envelope).await;
        let elapsed_time = start_time.elapsed().as_secs_f64();

        metrics::histogram!(
            "bridge_reconcile_duration_seconds",
            &[("device_type", device_type.to_owned())]
        )
        .record(elapsed_time);
        record_outcome(
            device_type,
            result.as_ref().map_or_else(PipelineError::outcome, |_| "ok"),
        );

        if let Err(ref error) = result {
            match error.class() {
                ErrorClass::ClientInput => warn!(device_type, %error, "rejected event"),
                ErrorClass::SystemFault => error!(device_type, %error, "failed to reconcile event"),
            }
        }

        result
    }
}

fn record_outcome(device_type: &str, outcome: &'static str) {
    let labels = [
        ("device_type", device_type.to_owned()),
        ("outcome", outcome.to_owned()),
    ];

    metrics::counter!("bridge_events_total", &labels).increment(1);
}
