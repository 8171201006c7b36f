use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use bridge_common::metrics::setup_metrics_recorder;
use bridge_common::pipeline::Pipeline;
use bridge_common::reconciler::{
    AggregateStateReconciler, RawStatusReconciler, ReconcilerRegistry,
};
use bridge_common::store::{PgStateStore, StateStore};

use config::{Config, LogFormat};
use handlers::AppState;

mod config;
mod handlers;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

fn init_tracing(config: &Config) {
    // RUST_LOG wins over LOG_LEVEL when both are set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_ascii_lowercase()));

    let base_layer = fmt::layer().with_target(true).with_level(true);
    let log_layer = match config.log_format {
        LogFormat::Json => base_layer.json().with_filter(filter).boxed(),
        LogFormat::Text => base_layer.with_filter(filter).boxed(),
    };

    tracing_subscriber::registry().with(log_layer).init();
}

fn build_registry(store: &PgStateStore) -> Result<ReconcilerRegistry> {
    let shared: Arc<dyn StateStore> = Arc::new(store.clone());

    let registry = ReconcilerRegistry::builder()
        .register(Arc::new(AggregateStateReconciler::new(shared.clone())))?
        .register(Arc::new(RawStatusReconciler::new(shared)))?
        .build()?;

    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env()?;
    config.validate()?;

    init_tracing(&config);

    let store = PgStateStore::connect(&config.database_url, &config.store_options()).await?;
    info!(
        max_connections = config.max_pg_connections,
        "connected to postgres"
    );

    let registry = build_registry(&store)?;
    info!(device_types = ?registry.device_types(), "reconcilers registered");

    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder()?)
    } else {
        None
    };

    let state = AppState {
        pipeline: Pipeline::new(registry),
        store: store.clone(),
        request_timeout: config.request_timeout.0,
        topic_prefix: Arc::from(config.topic_prefix.as_str()),
    };
    let app = handlers::add_routes(
        Router::new(),
        state,
        config.max_body_size,
        config.concurrency_limit,
        metrics,
    );

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;

    store.close().await;
    info!("database pool closed, exiting");

    Ok(())
}
