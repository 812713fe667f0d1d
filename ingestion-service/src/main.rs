use anyhow::Result;
use ingestion_service::{
    api::{self, AppState},
    buffer::IngestBuffer,
    config::AppConfig,
    metrics_server, observability, schema,
    sinks::{MeterSink, VehicleSink},
};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    metrics_server::install()?;

    let pool = cfg.database.connect().await?;
    schema::ensure_schema(&pool).await?;
    schema::ensure_month_partitions(&pool, OffsetDateTime::now_utc(), cfg.rollup.partitions_ahead)
        .await?;

    let buffer = Arc::new(IngestBuffer::new(
        Arc::new(VehicleSink::new(pool.clone())),
        Arc::new(MeterSink::new(pool.clone())),
        cfg.buffer.flush_size,
    ));
    buffer.start_timer(Duration::from_millis(cfg.buffer.flush_interval_ms));

    let app = api::router(AppState {
        pool,
        buffer: Arc::clone(&buffer),
    });

    let listener = tokio::net::TcpListener::bind(&cfg.http.bind_addr).await?;
    tracing::info!(
        addr = %cfg.http.bind_addr,
        flush_size = cfg.buffer.flush_size,
        flush_interval_ms = cfg.buffer.flush_interval_ms,
        "telemetry ingestion service listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Timer stops first, then one best-effort drain before the process exits.
    buffer.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received, draining buffers");
}
