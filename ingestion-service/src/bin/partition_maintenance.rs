//! Scheduled partition maintenance: provision upcoming monthly partitions,
//! drop those past the retention horizon (non-blocking detach, then drop),
//! and alarm when readings have landed in a default partition, which means a
//! provisioning lapse let timestamps fall outside every defined range.

use anyhow::Result;
use ingestion_service::{config::AppConfig, observability, schema};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let pool = cfg.database.connect().await?;
    let now = OffsetDateTime::now_utc();

    schema::ensure_schema(&pool).await?;
    schema::ensure_month_partitions(&pool, now, cfg.rollup.partitions_ahead).await?;

    let dropped = schema::drop_expired_partitions(&pool, now, cfg.rollup.retention_months).await?;

    for table in schema::READING_TABLES {
        let stray = schema::default_partition_count(&pool, table).await?;
        if stray > 0 {
            tracing::warn!(
                table,
                rows = stray,
                "readings present in the default partition"
            );
        }
    }

    tracing::info!(
        provisioned_ahead = cfg.rollup.partitions_ahead,
        dropped = dropped.len(),
        retention_months = cfg.rollup.retention_months,
        "partition maintenance complete"
    );

    Ok(())
}
