use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, field, info_span, warn, Instrument};

use bridge_common::envelope::EventEnvelope;
use bridge_common::error::{ErrorClass, PipelineError};
use bridge_common::extract::extract_device_type;
use bridge_common::topic::TopicInfo;

use super::app::AppState;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct WebhookResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl WebhookResponse {
    fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
            error: None,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error".to_owned(),
            error: Some(message),
        }
    }
}

type WebhookResult = Result<Json<WebhookResponse>, (StatusCode, Json<WebhookResponse>)>;

/// EMQX does not always label the body as JSON, so the envelope is decoded from the raw bytes
/// whatever the `Content-Type`.
pub async fn post_webhook(State(state): State<AppState>, body: Bytes) -> WebhookResult {
    let envelope = EventEnvelope::from_slice(&body).map_err(|error| {
        warn!(%error, "rejected undecodable event");
        (
            StatusCode::BAD_REQUEST,
            Json(WebhookResponse::error(format!("invalid event envelope: {error}"))),
        )
    })?;

    let device_type = extract_device_type(&envelope).map_err(|error| {
        warn!(topic = %envelope.topic, client_id = %envelope.client_id, %error, "rejected event");
        pipeline_error(error)
    })?;

    let span = info_span!(
        "webhook",
        device_type,
        topic = %envelope.topic,
        client_id = %envelope.client_id,
        room_name = field::Empty,
        device_name = field::Empty,
    );
    if let Ok(topic) = TopicInfo::parse(&state.topic_prefix, &envelope.topic) {
        span.record("room_name", topic.room_name.as_str());
        span.record("device_name", topic.device_name.as_str());
    }

    let delivery = async {
        debug!("received webhook");
        state.pipeline.deliver(device_type, &envelope).await
    }
    .instrument(span);

    // Dropping the delivery abandons it; each write is a single statement, so nothing partial
    // is left behind.
    match tokio::time::timeout(state.request_timeout, delivery).await {
        Ok(Ok(())) => Ok(Json(WebhookResponse::ok())),
        Ok(Err(error)) => Err(pipeline_error(error)),
        Err(_) => {
            error!(device_type, timeout = ?state.request_timeout, "webhook processing timed out");
            Err((
                StatusCode::GATEWAY_TIMEOUT,
                Json(WebhookResponse::error("processing timed out".to_owned())),
            ))
        }
    }
}

fn pipeline_error(error: PipelineError) -> (StatusCode, Json<WebhookResponse>) {
    match error.class() {
        ErrorClass::ClientInput => (
            StatusCode::BAD_REQUEST,
            Json(WebhookResponse::error(error.to_string())),
        ),
        // Storage details stay in the logs.
        ErrorClass::SystemFault => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(WebhookResponse::error("processing error".to_owned())),
        ),
    }
}
