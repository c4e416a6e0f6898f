//! Process configuration. Layered the same way the reference ingest binary
//! layers its config: compiled-in defaults, then an optional TOML file, then
//! environment variables, each layer overriding the last.

use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub amqp_connection: String,
    pub discogs_root: PathBuf,
    pub upstream_base_url: String,
    pub periodic_check_days: i64,
    pub checkpoint_every_records: u64,
    pub checkpoint_every_seconds: u64,
    pub channel_capacity: usize,
    pub publish_confirm_window: usize,
    pub publish_max_retries: u32,
    pub publish_retry_base_delay_ms: u64,
    pub publish_retry_jitter_ms: u64,
    pub health_bind_addr: String,
    pub shutdown_grace_seconds: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            amqp_connection: String::new(),
            discogs_root: PathBuf::from("/discogs-data"),
            upstream_base_url: String::new(),
            periodic_check_days: 15,
            checkpoint_every_records: 10_000,
            checkpoint_every_seconds: 30,
            channel_capacity: 512,
            publish_confirm_window: 1024,
            publish_max_retries: 5,
            publish_retry_base_delay_ms: 500,
            publish_retry_jitter_ms: 250,
            health_bind_addr: "0.0.0.0:8080".to_string(),
            shutdown_grace_seconds: 30,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error loading configuration")]
    Load(#[from] figment::Error),

    #[error("AMQP_CONNECTION is required")]
    MissingAmqpConnection,

    #[error("UPSTREAM_BASE_URL is required")]
    MissingUpstreamBaseUrl,
}

impl ExtractorConfig {
    /// Every environment variable already lowercases to this struct's field
    /// name (`AMQP_CONNECTION` -> `amqp_connection`, `DISCOGS_ROOT` ->
    /// `discogs_root`, ...), so a single unprefixed `Env` provider covers all
    /// of them — mirroring `IngestConfig::figment()`'s
    /// defaults-then-toml-then-env layering, minus a prefix since this
    /// binary's variables aren't namespaced under one.
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("discogsography.toml"))
            .merge(Env::raw())
    }

    pub fn load() -> Result<Self, ConfigError> {
        let config: ExtractorConfig = Self::figment().extract()?;
        if config.amqp_connection.is_empty() {
            return Err(ConfigError::MissingAmqpConnection);
        }
        if config.upstream_base_url.is_empty() {
            return Err(ConfigError::MissingUpstreamBaseUrl);
        }
        Ok(config)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_every_seconds)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs((self.periodic_check_days.max(0) as u64) * 24 * 60 * 60)
    }

    pub fn retry_policy(&self) -> discog_types::RetryPolicy {
        discog_types::RetryPolicy::new(
            self.publish_max_retries,
            Duration::from_millis(self.publish_retry_base_delay_ms),
            Duration::from_millis(self.publish_retry_jitter_ms),
        )
    }

    pub fn downloads_dir(&self, version: discog_types::DumpVersion) -> PathBuf {
        self.discogs_root.join("downloads").join(version.to_string())
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.discogs_root.join("ledger")
    }

    pub fn dedup_dir(&self) -> PathBuf {
        self.discogs_root.join("dedup")
    }

    pub fn last_completed_version_path(&self) -> PathBuf {
        self.discogs_root.join("state").join("last_completed_version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_documented_values() {
        let config = ExtractorConfig::default();
        assert_eq!(config.periodic_check_days, 15);
        assert_eq!(config.checkpoint_every_records, 10_000);
        assert_eq!(config.checkpoint_every_seconds, 30);
        assert_eq!(config.channel_capacity, 512);
        assert_eq!(config.publish_confirm_window, 1024);
        assert_eq!(config.publish_max_retries, 5);
        assert_eq!(config.health_bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn derived_paths_follow_the_documented_layout() {
        let mut config = ExtractorConfig::default();
        config.discogs_root = PathBuf::from("/discogs-data");
        let version = discog_types::DumpVersion::parse("20240601").unwrap();

        assert_eq!(config.downloads_dir(version), PathBuf::from("/discogs-data/downloads/20240601"));
        assert_eq!(config.ledger_dir(), PathBuf::from("/discogs-data/ledger"));
        assert_eq!(config.dedup_dir(), PathBuf::from("/discogs-data/dedup"));
        assert_eq!(
            config.last_completed_version_path(),
            PathBuf::from("/discogs-data/state/last_completed_version")
        );
    }
}
