use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
    #[serde(default = "defaults::min_connections")]
    pub min_connections: u32,
    #[serde(default = "defaults::statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl DatabaseConfig {
    /// Open a pool against the transaction-mode pooler. Every connection gets
    /// a session statement timeout so a wedged query cannot hold a flush (or
    /// a dashboard read) open past the cap.
    pub async fn connect(&self) -> Result<PgPool> {
        let timeout_ms = self.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {timeout_ms}"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&self.url)
            .await
            .context("failed to connect to database")?;
        Ok(pool)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "defaults::flush_size")]
    pub flush_size: usize,
    #[serde(default = "defaults::flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_size: defaults::flush_size(),
            flush_interval_ms: defaults::flush_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "defaults::window_hours")]
    pub window_hours: u32,
    #[serde(default = "defaults::retention_months")]
    pub retention_months: u32,
    #[serde(default = "defaults::partitions_ahead")]
    pub partitions_ahead: u32,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            window_hours: defaults::window_hours(),
            retention_months: defaults::retention_months(),
            partitions_ahead: defaults::partitions_ahead(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
}

mod defaults {
    pub fn max_connections() -> u32 {
        10
    }
    pub fn min_connections() -> u32 {
        1
    }
    pub fn statement_timeout_ms() -> u64 {
        30_000
    }
    pub fn flush_size() -> usize {
        500
    }
    pub fn flush_interval_ms() -> u64 {
        2_000
    }
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
    pub fn window_hours() -> u32 {
        48
    }
    pub fn retention_months() -> u32 {
        6
    }
    pub fn partitions_ahead() -> u32 {
        3
    }
}

impl AppConfig {
    /// Load configuration from the TOML file named by `INGESTION_CONFIG`
    /// (default `ingestion-config.toml`), then apply environment overrides.
    /// A missing file is tolerated as long as `DATABASE_URL` is set.
    pub fn load() -> Result<Self> {
        let path =
            env::var("INGESTION_CONFIG").unwrap_or_else(|_| "ingestion-config.toml".to_string());
        let mut cfg = if Path::new(&path).exists() {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
            toml::from_str(&contents).with_context(|| format!("failed to parse {path}"))?
        } else {
            AppConfig {
                database: DatabaseConfig {
                    url: String::new(),
                    max_connections: defaults::max_connections(),
                    min_connections: defaults::min_connections(),
                    statement_timeout_ms: defaults::statement_timeout_ms(),
                },
                buffer: BufferConfig::default(),
                http: HttpConfig::default(),
                rollup: RollupConfig::default(),
            }
        };

        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment keys override the file so deployments can tune the flush
    /// policy without shipping a new config.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(raw) = var("BUFFER_FLUSH_SIZE") {
            self.buffer.flush_size = raw
                .parse()
                .with_context(|| format!("invalid BUFFER_FLUSH_SIZE: {raw}"))?;
        }
        if let Some(raw) = var("BUFFER_FLUSH_INTERVAL_MS") {
            self.buffer.flush_interval_ms = raw
                .parse()
                .with_context(|| format!("invalid BUFFER_FLUSH_INTERVAL_MS: {raw}"))?;
        }
        if let Some(raw) = var("STATEMENT_TIMEOUT_MS") {
            self.database.statement_timeout_ms = raw
                .parse()
                .with_context(|| format!("invalid STATEMENT_TIMEOUT_MS: {raw}"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            bail!("database.url is not set (config file or DATABASE_URL)");
        }
        if self.buffer.flush_size == 0 {
            bail!("buffer.flush_size must be at least 1");
        }
        if self.buffer.flush_interval_ms == 0 {
            bail!("buffer.flush_interval_ms must be at least 1");
        }
        if self.database.max_connections < self.database.min_connections {
            bail!("database.max_connections must be >= min_connections");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_file_with_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [database]
            url = "postgres://ingest:pw@localhost:6432/fleet"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.buffer.flush_size, 500);
        assert_eq!(cfg.buffer.flush_interval_ms, 2_000);
        assert_eq!(cfg.database.statement_timeout_ms, 30_000);
        assert_eq!(cfg.rollup.retention_months, 6);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
            [database]
            url = "postgres://file/db"

            [buffer]
            flush_size = 100
            "#,
        )
        .unwrap();

        cfg.apply_overrides(|key| match key {
            "BUFFER_FLUSH_SIZE" => Some("750".to_string()),
            "BUFFER_FLUSH_INTERVAL_MS" => Some("1500".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(cfg.buffer.flush_size, 750);
        assert_eq!(cfg.buffer.flush_interval_ms, 1_500);
        assert_eq!(cfg.database.url, "postgres://file/db");
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let mut cfg: AppConfig = toml::from_str(
            r#"
            [database]
            url = "postgres://file/db"
            "#,
        )
        .unwrap();

        let res =
            cfg.apply_overrides(|key| (key == "BUFFER_FLUSH_SIZE").then(|| "lots".to_string()));
        assert!(res.is_err());
    }

    #[test]
    fn zero_flush_size_fails_validation() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [database]
            url = "postgres://file/db"

            [buffer]
            flush_size = 0
            "#,
        )
        .unwrap();

        assert!(cfg.validate().is_err());
    }
}
