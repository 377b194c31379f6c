use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use engine::SyncSettings;
use engine::sync::Backoff;

#[derive(Debug, Clone)]
pub struct Config {
    pub season_year: i32,
    pub document_service_url: Option<String>,
    pub document_service_token: Option<String>,
    pub sync_quota_per_minute: u32,
    pub sync_interval: Duration,
    pub queue_poll: Duration,
    pub sync_max_attempts: u32,
    pub sync_backoff_base: Duration,
    pub sync_backoff_max: Duration,
    pub sync_retry_after: Duration,
    pub sync_recheck_after: Duration,
    pub sync_editor: String,
    pub consumer_lock_key: i64,
    pub run_for: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            season_year: std::env::var("SEASON_YEAR")
                .context("Cannot load SEASON_YEAR env variable")?
                .parse()
                .context("SEASON_YEAR must be a year")?,
            document_service_url: optional("DOCUMENT_SERVICE_URL"),
            document_service_token: optional("DOCUMENT_SERVICE_TOKEN"),
            sync_quota_per_minute: var_or("SYNC_QUOTA_PER_MINUTE", 45)?,
            sync_interval: Duration::from_secs(var_or("SYNC_INTERVAL_SECS", 3)?),
            queue_poll: Duration::from_secs(var_or("QUEUE_POLL_SECS", 3)?),
            sync_max_attempts: var_or("SYNC_MAX_ATTEMPTS", 6)?,
            sync_backoff_base: Duration::from_millis(var_or("SYNC_BACKOFF_BASE_MS", 500)?),
            sync_backoff_max: Duration::from_millis(var_or("SYNC_BACKOFF_MAX_MS", 30_000)?),
            sync_retry_after: Duration::from_secs(var_or("SYNC_RETRY_SECS", 60)?),
            sync_recheck_after: Duration::from_secs(var_or("SYNC_RECHECK_SECS", 600)?),
            sync_editor: optional("SYNC_EDITOR").unwrap_or_else(|| "roster-engine".to_string()),
            consumer_lock_key: var_or("CONSUMER_LOCK_KEY", 7_240_001)?,
            run_for: optional("RUN_FOR_MINUTES")
                .map(|raw| parsed::<u64>("RUN_FOR_MINUTES", Some(raw), 0))
                .transpose()?
                .map(|minutes| Duration::from_secs(minutes * 60)),
        })
    }

    pub fn sync_settings(&self) -> SyncSettings {
        let mut settings = SyncSettings::new(self.season_year);
        settings.editor = self.sync_editor.clone();
        settings.quota_per_minute = self.sync_quota_per_minute;
        settings.interval = self.sync_interval;
        settings.retry_after = self.sync_retry_after;
        settings.recheck_after = self.sync_recheck_after;
        settings.backoff = Backoff {
            max_attempts: self.sync_max_attempts,
            base: self.sync_backoff_base,
            max: self.sync_backoff_max,
        };
        settings
    }
}

fn var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parsed(name, optional(name), default)
}

/// Unset and empty are the same.
fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        None => Ok(default),
    }
}
