//! Physical schema: range-partitioned reading tables (cold store), per-device
//! current tables (hot store), the vehicle/meter link table, hourly rollup
//! tables and the materialized 24h performance summary, plus the partition
//! provisioning and retention operations.

use anyhow::{Context, Result};
use sqlx::PgPool;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, Time};

pub const VEHICLE_READINGS: &str = "vehicle_readings";
pub const METER_READINGS: &str = "meter_readings";
pub const READING_TABLES: [&str; 2] = [VEHICLE_READINGS, METER_READINGS];

// Reading tables are append-only and partitioned monthly on recorded_at. The
// primary key leads with recorded_at so it stays partition-local; id only
// disambiguates rows within a partition. There is deliberately no unique
// constraint on (device_id, recorded_at): duplicate suppression belongs to
// the sender, and a global tree index would not survive the write rate.
const CREATE_VEHICLE_READINGS: &str = r#"
CREATE TABLE IF NOT EXISTS vehicle_readings (
    id               BIGINT GENERATED ALWAYS AS IDENTITY,
    recorded_at      TIMESTAMPTZ NOT NULL,
    vehicle_id       VARCHAR(64) NOT NULL,
    soc              NUMERIC(5,2) NOT NULL,
    kwh_delivered_dc NUMERIC(10,4) NOT NULL,
    battery_temp     NUMERIC(5,2) NOT NULL,
    ingested_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (recorded_at, id)
) PARTITION BY RANGE (recorded_at)
"#;

const CREATE_METER_READINGS: &str = r#"
CREATE TABLE IF NOT EXISTS meter_readings (
    id              BIGINT GENERATED ALWAYS AS IDENTITY,
    recorded_at     TIMESTAMPTZ NOT NULL,
    meter_id        VARCHAR(64) NOT NULL,
    kwh_consumed_ac NUMERIC(10,4) NOT NULL,
    voltage         NUMERIC(6,2) NOT NULL,
    ingested_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (recorded_at, id)
) PARTITION BY RANGE (recorded_at)
"#;

// The hot tables hold one row per device (~20K rows total) and are served
// from shared buffers; the primary key is the only index they need.
const CREATE_VEHICLE_CURRENT: &str = r#"
CREATE TABLE IF NOT EXISTS vehicle_current (
    vehicle_id       VARCHAR(64) PRIMARY KEY,
    soc              NUMERIC(5,2) NOT NULL,
    kwh_delivered_dc NUMERIC(10,4) NOT NULL,
    battery_temp     NUMERIC(5,2) NOT NULL,
    last_seen_at     TIMESTAMPTZ NOT NULL,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_METER_CURRENT: &str = r#"
CREATE TABLE IF NOT EXISTS meter_current (
    meter_id        VARCHAR(64) PRIMARY KEY,
    kwh_consumed_ac NUMERIC(10,4) NOT NULL,
    voltage         NUMERIC(6,2) NOT NULL,
    last_seen_at    TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_VEHICLE_METER_LINKS: &str = r#"
CREATE TABLE IF NOT EXISTS vehicle_meter_links (
    vehicle_id VARCHAR(64) PRIMARY KEY,
    meter_id   VARCHAR(64) NOT NULL,
    linked_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_VEHICLE_HOURLY_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS vehicle_hourly_stats (
    vehicle_id             VARCHAR(64) NOT NULL,
    hour_bucket            TIMESTAMPTZ NOT NULL,
    sample_count           BIGINT NOT NULL,
    avg_soc                NUMERIC(5,2) NOT NULL,
    min_soc                NUMERIC(5,2) NOT NULL,
    max_soc                NUMERIC(5,2) NOT NULL,
    total_kwh_delivered_dc NUMERIC(14,4) NOT NULL,
    avg_battery_temp       NUMERIC(5,2) NOT NULL,
    PRIMARY KEY (vehicle_id, hour_bucket)
)
"#;

const CREATE_METER_HOURLY_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS meter_hourly_stats (
    meter_id              VARCHAR(64) NOT NULL,
    hour_bucket           TIMESTAMPTZ NOT NULL,
    sample_count          BIGINT NOT NULL,
    total_kwh_consumed_ac NUMERIC(14,4) NOT NULL,
    avg_voltage           NUMERIC(6,2) NOT NULL,
    min_voltage           NUMERIC(6,2) NOT NULL,
    max_voltage           NUMERIC(6,2) NOT NULL,
    PRIMARY KEY (meter_id, hour_bucket)
)
"#;

// Refreshed out-of-band every 15 minutes; the unique index on vehicle_id is
// what allows REFRESH ... CONCURRENTLY.
const CREATE_PERFORMANCE_VIEW: &str = r#"
CREATE MATERIALIZED VIEW IF NOT EXISTS vehicle_performance_24h AS
SELECT
    l.vehicle_id,
    l.meter_id,
    COALESCE(v.total_dc, 0) AS total_dc_delivered_kwh,
    COALESCE(m.total_ac, 0) AS total_ac_consumed_kwh,
    CASE
        WHEN COALESCE(m.total_ac, 0) = 0 THEN 0
        ELSE ROUND(100 * COALESCE(v.total_dc, 0) / m.total_ac, 2)
    END AS efficiency_pct
FROM vehicle_meter_links l
LEFT JOIN (
    SELECT vehicle_id, SUM(kwh_delivered_dc) AS total_dc
    FROM vehicle_readings
    WHERE recorded_at >= NOW() - INTERVAL '24 hours'
    GROUP BY vehicle_id
) v USING (vehicle_id)
LEFT JOIN (
    SELECT meter_id, SUM(kwh_consumed_ac) AS total_ac
    FROM meter_readings
    WHERE recorded_at >= NOW() - INTERVAL '24 hours'
    GROUP BY meter_id
) m USING (meter_id)
"#;

// Catch-all partitions exist solely so a provisioning lapse cannot lose
// readings; rows landing in them are an operational alarm.
const CREATE_DEFAULT_PARTITIONS: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS vehicle_readings_default PARTITION OF vehicle_readings DEFAULT",
    "CREATE TABLE IF NOT EXISTS meter_readings_default PARTITION OF meter_readings DEFAULT",
];

// Secondary indexes. The composite btree serves "latest readings for device
// X in range"; the BRIN indexes stay effective only while physical row order
// correlates with time, which holds because ingestion is near-real-time and
// out-of-order backfill is unsupported.
const CREATE_INDEXES: [&str; 10] = [
    "CREATE INDEX IF NOT EXISTS vehicle_readings_device_ts_idx ON vehicle_readings (vehicle_id, recorded_at DESC)",
    "CREATE INDEX IF NOT EXISTS vehicle_readings_recorded_at_brin ON vehicle_readings USING BRIN (recorded_at)",
    "CREATE INDEX IF NOT EXISTS vehicle_readings_ingested_at_brin ON vehicle_readings USING BRIN (ingested_at)",
    "CREATE INDEX IF NOT EXISTS meter_readings_device_ts_idx ON meter_readings (meter_id, recorded_at DESC)",
    "CREATE INDEX IF NOT EXISTS meter_readings_recorded_at_brin ON meter_readings USING BRIN (recorded_at)",
    "CREATE INDEX IF NOT EXISTS meter_readings_ingested_at_brin ON meter_readings USING BRIN (ingested_at)",
    "CREATE INDEX IF NOT EXISTS vehicle_meter_links_meter_idx ON vehicle_meter_links (meter_id)",
    "CREATE INDEX IF NOT EXISTS vehicle_hourly_stats_hour_idx ON vehicle_hourly_stats (hour_bucket)",
    "CREATE INDEX IF NOT EXISTS meter_hourly_stats_hour_idx ON meter_hourly_stats (hour_bucket)",
    "CREATE UNIQUE INDEX IF NOT EXISTS vehicle_performance_24h_vehicle_idx ON vehicle_performance_24h (vehicle_id)",
];

/// Idempotent schema bootstrap. Partition provisioning is separate
/// (`ensure_month_partitions`); only the catch-all default partitions are
/// created here so no reading is ever lost to a provisioning lapse.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let tables = [
        CREATE_VEHICLE_READINGS,
        CREATE_METER_READINGS,
        CREATE_VEHICLE_CURRENT,
        CREATE_METER_CURRENT,
        CREATE_VEHICLE_METER_LINKS,
        CREATE_VEHICLE_HOURLY_STATS,
        CREATE_METER_HOURLY_STATS,
        CREATE_PERFORMANCE_VIEW,
    ];
    for ddl in tables
        .iter()
        .chain(&CREATE_DEFAULT_PARTITIONS)
        .chain(&CREATE_INDEXES)
    {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("schema DDL failed: {}", first_line(ddl)))?;
    }
    Ok(())
}

fn first_line(sql: &str) -> &str {
    sql.trim_start().lines().next().unwrap_or_default()
}

/// `vehicle_readings_2026_08` style monthly partition name.
pub fn partition_name(table: &str, year: i32, month: u8) -> String {
    format!("{table}_{year:04}_{month:02}")
}

fn month_start(year: i32, month: u8) -> Result<OffsetDateTime> {
    let month = Month::try_from(month).context("month out of range")?;
    let date = Date::from_calendar_date(year, month, 1).context("invalid partition date")?;
    Ok(date.with_time(Time::MIDNIGHT).assume_utc())
}

pub fn next_month(year: i32, month: u8) -> (i32, u8) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

pub fn prev_month(year: i32, month: u8) -> (i32, u8) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Create one monthly partition of `table`, bounds `[month, next month)`.
pub async fn create_month_partition(
    pool: &PgPool,
    table: &str,
    year: i32,
    month: u8,
) -> Result<()> {
    let name = partition_name(table, year, month);
    let (next_year, next_mon) = next_month(year, month);
    let from = month_start(year, month)?.format(&Rfc3339)?;
    let to = month_start(next_year, next_mon)?.format(&Rfc3339)?;

    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {name} PARTITION OF {table} \
         FOR VALUES FROM ('{from}') TO ('{to}')"
    );
    sqlx::query(&ddl)
        .execute(pool)
        .await
        .with_context(|| format!("failed to create partition {name}"))?;
    Ok(())
}

/// Provision the current month plus `months_ahead` future months for both
/// reading tables. Run ahead of time so inserts never fall through to the
/// default partition.
pub async fn ensure_month_partitions(
    pool: &PgPool,
    now: OffsetDateTime,
    months_ahead: u32,
) -> Result<()> {
    for table in READING_TABLES {
        let (mut year, mut month) = (now.year(), now.month() as u8);
        for _ in 0..=months_ahead {
            create_month_partition(pool, table, year, month).await?;
            (year, month) = next_month(year, month);
        }
    }
    Ok(())
}

/// First month that is still retained: everything strictly older is eligible
/// for detach-and-drop.
pub fn retention_cutoff(now: OffsetDateTime, retention_months: u32) -> (i32, u8) {
    let (mut year, mut month) = (now.year(), now.month() as u8);
    for _ in 0..retention_months {
        (year, month) = prev_month(year, month);
    }
    (year, month)
}

/// Parse `<table>_YYYY_MM` back into its month; `None` for the default
/// partition or anything else that is not a monthly partition of `table`.
pub fn parse_partition_month(table: &str, partition: &str) -> Option<(i32, u8)> {
    let suffix = partition.strip_prefix(table)?.strip_prefix('_')?;
    let (year_raw, month_raw) = suffix.split_once('_')?;
    let year: i32 = year_raw.parse().ok()?;
    let month: u8 = month_raw.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

async fn list_partitions(pool: &PgPool, table: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT c.relname
        FROM pg_inherits i
        JOIN pg_class c ON c.oid = i.inhrelid
        JOIN pg_class p ON p.oid = i.inhparent
        WHERE p.relname = $1
        ORDER BY c.relname
        "#,
    )
    .bind(table)
    .persistent(false)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Retention: detach (non-blocking) then drop every monthly partition older
/// than the horizon. Returns the names that were dropped. DETACH CONCURRENTLY
/// must run outside a transaction, which is how these statements execute.
pub async fn drop_expired_partitions(
    pool: &PgPool,
    now: OffsetDateTime,
    retention_months: u32,
) -> Result<Vec<String>> {
    let cutoff = retention_cutoff(now, retention_months);
    let mut dropped = Vec::new();

    for table in READING_TABLES {
        for partition in list_partitions(pool, table).await? {
            let Some(month) = parse_partition_month(table, &partition) else {
                continue;
            };
            if month >= cutoff {
                continue;
            }
            sqlx::query(&format!(
                "ALTER TABLE {table} DETACH PARTITION {partition} CONCURRENTLY"
            ))
            .execute(pool)
            .await
            .with_context(|| format!("failed to detach {partition}"))?;
            sqlx::query(&format!("DROP TABLE {partition}"))
                .execute(pool)
                .await
                .with_context(|| format!("failed to drop {partition}"))?;
            tracing::info!(partition = %partition, "dropped expired partition");
            dropped.push(partition);
        }
    }
    Ok(dropped)
}

/// Rows in a default partition mean a reading arrived outside every
/// provisioned range; the maintenance job alarms on a non-zero count.
pub async fn default_partition_count(pool: &PgPool, table: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}_default"))
        .persistent(false)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn partition_names_are_zero_padded() {
        assert_eq!(
            partition_name(VEHICLE_READINGS, 2026, 8),
            "vehicle_readings_2026_08"
        );
        assert_eq!(
            partition_name(METER_READINGS, 2026, 12),
            "meter_readings_2026_12"
        );
    }

    #[test]
    fn month_arithmetic_rolls_over_years() {
        assert_eq!(next_month(2026, 12), (2027, 1));
        assert_eq!(next_month(2026, 8), (2026, 9));
        assert_eq!(prev_month(2026, 1), (2025, 12));
    }

    #[test]
    fn retention_cutoff_crosses_year_boundary() {
        let now = datetime!(2026-02-15 12:00:00 UTC);
        assert_eq!(retention_cutoff(now, 6), (2025, 8));
        assert_eq!(retention_cutoff(now, 1), (2026, 1));
    }

    #[test]
    fn partition_month_round_trips() {
        let name = partition_name(VEHICLE_READINGS, 2025, 11);
        assert_eq!(
            parse_partition_month(VEHICLE_READINGS, &name),
            Some((2025, 11))
        );
    }

    #[test]
    fn default_partition_is_never_a_monthly_partition() {
        assert_eq!(
            parse_partition_month(VEHICLE_READINGS, "vehicle_readings_default"),
            None
        );
        assert_eq!(
            parse_partition_month(METER_READINGS, "vehicle_readings_2025_11"),
            None
        );
    }

    #[test]
    fn month_bounds_are_half_open() {
        let start = month_start(2026, 12).unwrap();
        assert_eq!(start, datetime!(2026-12-01 00:00:00 UTC));
        let (y, m) = next_month(2026, 12);
        assert_eq!(month_start(y, m).unwrap(), datetime!(2027-01-01 00:00:00 UTC));
    }
}
