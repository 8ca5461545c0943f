use crate::chain::Epoch;
use crate::runtime::progress::DEFAULT_METADATA_KEY;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

pub const ENV_START_EPOCH: &str = "EPOCHSYNC_START_EPOCH";
pub const ENV_LOG_LEVEL: &str = "EPOCHSYNC_LOG_LEVEL";
pub const ENV_METRICS_INTERVAL_SECS: &str = "EPOCHSYNC_METRICS_INTERVAL_SECS";
pub const ENV_METADATA_KEY: &str = "EPOCHSYNC_METADATA_KEY";

/// Runtime configuration for the committee synchronizer.
///
/// Instances are validated on construction via [`SyncConfig::builder`] or
/// [`SyncConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    log_level: LevelFilter,
    metrics_interval: Duration,
    metadata_key: String,
    start_epoch: Option<Epoch>,
}

pub struct SyncConfigParams {
    pub log_level: LevelFilter,
    pub metrics_interval: Duration,
    pub metadata_key: String,
    pub start_epoch: Option<Epoch>,
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    pub fn new(params: SyncConfigParams) -> Result<Self> {
        let SyncConfigParams {
            log_level,
            metrics_interval,
            metadata_key,
            start_epoch,
        } = params;

        let config = Self {
            log_level,
            metrics_interval,
            metadata_key: metadata_key.trim().to_owned(),
            start_epoch,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from `EPOCHSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup, using defaults for
    /// anything the lookup does not provide.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(raw) = lookup(ENV_START_EPOCH) {
            let value = i64::from_str(raw.trim())
                .with_context(|| format!("{ENV_START_EPOCH} must be an integer, got {raw:?}"))?;
            builder = builder.start_epoch_sentinel(value);
        }

        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            let level = LevelFilter::from_str(raw.trim())
                .map_err(|_| anyhow::anyhow!("{ENV_LOG_LEVEL} is not a valid level: {raw:?}"))?;
            builder = builder.log_level(level);
        }

        if let Some(raw) = lookup(ENV_METRICS_INTERVAL_SECS) {
            let secs = u64::from_str(raw.trim()).with_context(|| {
                format!("{ENV_METRICS_INTERVAL_SECS} must be a whole number of seconds, got {raw:?}")
            })?;
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        if let Some(raw) = lookup(ENV_METADATA_KEY) {
            builder = builder.metadata_key(raw);
        }

        builder.build()
    }

    /// Verbosity applied to the service's log output.
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Metadata key under which progress is persisted.
    pub fn metadata_key(&self) -> &str {
        &self.metadata_key
    }

    /// Explicit epoch to start catching up from, overriding stored progress.
    pub fn start_epoch(&self) -> Option<Epoch> {
        self.start_epoch
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.metadata_key.trim().is_empty() {
            bail!("metadata_key cannot be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    log_level: Option<LevelFilter>,
    metrics_interval: Option<Duration>,
    metadata_key: Option<String>,
    start_epoch: Option<Epoch>,
}

impl SyncConfigBuilder {
    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn metadata_key(mut self, key: impl Into<String>) -> Self {
        self.metadata_key = Some(key.into());
        self
    }

    pub fn start_epoch(mut self, epoch: Epoch) -> Self {
        self.start_epoch = Some(epoch);
        self
    }

    /// Accepts the signed form used by command lines: any negative value means
    /// "derive the start point from stored progress".
    pub fn start_epoch_sentinel(mut self, value: i64) -> Self {
        self.start_epoch = u64::try_from(value).ok();
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        SyncConfig::new(SyncConfigParams {
            log_level: self.log_level.unwrap_or(LevelFilter::INFO),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            metadata_key: self
                .metadata_key
                .unwrap_or_else(|| DEFAULT_METADATA_KEY.to_owned()),
            start_epoch: self.start_epoch,
        })
    }
}
