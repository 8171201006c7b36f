use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use bridge_common::metrics::track_metrics;
use bridge_common::pipeline::Pipeline;
use bridge_common::store::PgStateStore;

use super::{health, webhook};

/// Everything a request handler needs. Built once in `main` and cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub store: PgStateStore,
    pub request_timeout: Duration,
    pub topic_prefix: Arc<str>,
}

pub fn add_routes(
    router: Router,
    state: AppState,
    max_body_size: usize,
    concurrency_limit: usize,
    metrics: Option<PrometheusHandle>,
) -> Router {
    router
        .route("/", routing::get(index))
        .route("/health", routing::get(health::health))
        .route("/_liveness", routing::get(health::liveness))
        .route(
            "/_readiness",
            routing::get(health::readiness).with_state(state.clone()),
        )
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .route(
            "/webhook",
            routing::post(webhook::post_webhook)
                .with_state(state)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .layer(axum::middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> &'static str {
    "emqx-pg-bridge"
}
