//! # Bot Configuration Module
//!
//! This module defines configuration structures for the bot, including
//! retry/backoff settings for the spreadsheet gateway and all deployment
//! values read from the environment at startup.

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use std::env;
use teloxide::types::ChatId;

// Constants for gateway retry behaviour
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 10000;
pub const DEFAULT_RETRY_JITTER_MS: u64 = 250;
pub const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 60;

// Constants for the polling loops
pub const DEFAULT_TASK_POLL_SECS: u64 = 5;
pub const DEFAULT_SUBTASK_POLL_SECS: u64 = 10;

/// Retry configuration for spreadsheet gateway calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts per operation
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Upper bound of the random jitter added to each retry delay
    pub retry_jitter_ms: u64,
    /// Cooldown after a rate-limit signal, in seconds
    pub rate_limit_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay_ms: DEFAULT_BASE_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            retry_jitter_ms: DEFAULT_RETRY_JITTER_MS,
            rate_limit_backoff_secs: DEFAULT_RATE_LIMIT_BACKOFF_SECS,
        }
    }
}

/// Deployment configuration, loaded once at startup.
///
/// Only the bot token and the spreadsheet id are mandatory; everything else
/// has a default matching the observed deployment. Per-deployment variations
/// (invite gate, webhook vs long polling, channel ids) are all plain
/// configuration values.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram bot token (fatal if absent)
    pub token: String,
    /// Public base URL for webhook mode; long polling is used when unset
    pub webhook_url: Option<String>,
    /// Port the webhook server binds to
    pub port: u16,
    /// Target spreadsheet document id
    pub spreadsheet_id: String,
    /// Path to the service-account key file
    pub credentials_path: String,
    /// Invite code; the invite gate is enabled only when this is set
    pub invite_code: Option<String>,
    /// Channel receiving odometer and fuel photos
    pub photo_channel: ChatId,
    /// Channel receiving parcel notices and photos
    pub parcel_channel: ChatId,
    /// Title of the trip log sheet
    pub trip_sheet: String,
    /// Bot timezone as a fixed UTC offset
    pub tz: FixedOffset,
    /// Task polling interval in seconds
    pub task_poll_secs: u64,
    /// Secondary-task polling interval in seconds
    pub subtask_poll_secs: u64,
    /// Locale for user-facing messages ("ru" or "en")
    pub locale: String,
    /// Treat undiscoverable tasks/roster sheets as a startup error
    pub strict_sheets: bool,
    /// Gateway retry settings
    pub retry: RetryConfig,
}

impl BotConfig {
    /// Load the configuration from the environment.
    ///
    /// A missing `TELEGRAM_BOT_TOKEN` or `SPREADSHEET_ID` is a fatal startup
    /// condition; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let token =
            env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;
        let spreadsheet_id =
            env::var("SPREADSHEET_ID").context("SPREADSHEET_ID must be set")?;

        let offset_hours: i32 = env_or("BOT_UTC_OFFSET", 3)?;
        let tz = FixedOffset::east_opt(offset_hours * 3600)
            .ok_or_else(|| anyhow!("BOT_UTC_OFFSET out of range: {offset_hours}"))?;

        Ok(Self {
            token,
            webhook_url: env::var("WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            port: env_or("PORT", 5000)?,
            spreadsheet_id,
            credentials_path: env::var("GOOGLE_CREDENTIALS")
                .unwrap_or_else(|_| "creds.json".to_string()),
            invite_code: env::var("INVITE_CODE").ok().filter(|s| !s.is_empty()),
            photo_channel: ChatId(env_or("PHOTO_CHANNEL_ID", -1002734636283i64)?),
            parcel_channel: ChatId(env_or("PARCEL_CHANNEL_ID", -1002780836350i64)?),
            trip_sheet: env::var("TRIP_SHEET").unwrap_or_else(|_| "Trips".to_string()),
            tz,
            task_poll_secs: env_or("TASK_POLL_SECS", DEFAULT_TASK_POLL_SECS)?,
            subtask_poll_secs: env_or("SUBTASK_POLL_SECS", DEFAULT_SUBTASK_POLL_SECS)?,
            locale: env::var("BOT_LOCALE").unwrap_or_else(|_| "ru".to_string()),
            strict_sheets: env::var("STRICT_SHEETS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            retry: RetryConfig::default(),
        })
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults_reasonable() {
        let retry = RetryConfig::default();

        assert!(retry.max_retries <= 10); // Reasonable upper bound
        assert!(retry.base_retry_delay_ms >= 100);
        assert!(retry.base_retry_delay_ms <= retry.max_retry_delay_ms);
        assert!(retry.rate_limit_backoff_secs >= 10); // Tens of seconds
    }

    #[test]
    fn test_env_or_parses_and_defaults() {
        std::env::remove_var("FLEETBOT_TEST_MISSING");
        let v: u64 = env_or("FLEETBOT_TEST_MISSING", 7).unwrap();
        assert_eq!(v, 7);

        std::env::set_var("FLEETBOT_TEST_SET", "42");
        let v: u64 = env_or("FLEETBOT_TEST_SET", 7).unwrap();
        assert_eq!(v, 42);

        std::env::set_var("FLEETBOT_TEST_BAD", "nope");
        assert!(env_or::<u64>("FLEETBOT_TEST_BAD", 7).is_err());
    }
}
