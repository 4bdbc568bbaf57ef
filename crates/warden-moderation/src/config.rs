use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables for the moderation subsystem.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Most recent section messages handed to filters
    pub history_cap: u32,
    /// Most recently active section participants handed to filters
    pub participant_cap: u32,
    /// Minimum appeal reason length, in characters
    pub appeal_min_reason_len: usize,
    pub context_timeout: Duration,
    pub store_timeout: Duration,
    /// Stats window length in seconds
    pub stats_window_secs: i64,
    pub stats_flush_interval: Duration,
    pub velocity_window_secs: i64,
    /// Messages per velocity window before the author is held for review
    pub velocity_max_messages: usize,
    /// Identical recent messages before the author is held for review
    pub max_duplicate_messages: usize,
    /// Prior violations before every message from the author is flagged
    pub repeat_offender_threshold: u32,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            history_cap: 50,
            participant_cap: 200,
            appeal_min_reason_len: 10,
            context_timeout: Duration::from_millis(2000),
            store_timeout: Duration::from_millis(5000),
            stats_window_secs: 3600,
            stats_flush_interval: Duration::from_secs(60),
            velocity_window_secs: 30,
            velocity_max_messages: 8,
            max_duplicate_messages: 3,
            repeat_offender_threshold: 3,
        }
    }
}

impl ModerationConfig {
    /// Defaults overridden by `WARDEN_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            history_cap: env_or("WARDEN_HISTORY_CAP", d.history_cap),
            participant_cap: env_or("WARDEN_PARTICIPANT_CAP", d.participant_cap),
            appeal_min_reason_len: env_or("WARDEN_APPEAL_MIN_REASON", d.appeal_min_reason_len),
            context_timeout: Duration::from_millis(env_or(
                "WARDEN_CONTEXT_TIMEOUT_MS",
                d.context_timeout.as_millis() as u64,
            )),
            store_timeout: Duration::from_millis(env_or(
                "WARDEN_STORE_TIMEOUT_MS",
                d.store_timeout.as_millis() as u64,
            )),
            stats_window_secs: env_or("WARDEN_STATS_WINDOW_SECS", d.stats_window_secs).max(1),
            stats_flush_interval: Duration::from_secs(
                env_or("WARDEN_STATS_FLUSH_SECS", d.stats_flush_interval.as_secs()).max(1),
            ),
            velocity_window_secs: env_or("WARDEN_VELOCITY_WINDOW_SECS", d.velocity_window_secs),
            velocity_max_messages: env_or("WARDEN_VELOCITY_MAX_MESSAGES", d.velocity_max_messages),
            max_duplicate_messages: env_or("WARDEN_MAX_DUPLICATES", d.max_duplicate_messages),
            repeat_offender_threshold: env_or(
                "WARDEN_REPEAT_OFFENDER_THRESHOLD",
                d.repeat_offender_threshold,
            ),
        }
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("Ignoring {}='{}': not a valid value, using {}", key, raw, default);
        default
    })
}
