use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::engine::Policy;
use crate::limits::*;
use crate::model::{DAY_MS, HOUR_MS, Ms};

/// Daemon settings, read from `SLOTKEEPER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub buffer_minutes: u32,
    pub patient_lead_time_hours: u32,
    pub suggestion_limit: usize,
    pub suggestion_window_days: u32,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            patient_lead_time_hours: (DEFAULT_PATIENT_LEAD_TIME_MS / HOUR_MS) as u32,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
            suggestion_window_days: (DEFAULT_SUGGESTION_WINDOW_MS / DAY_MS) as u32,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take the default; malformed or
    /// out-of-range values are logged and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let mut buffer_minutes = parse_or(&lookup, "SLOTKEEPER_BUFFER_MINUTES", defaults.buffer_minutes);
        if buffer_minutes > MAX_BUFFER_MINUTES {
            warn!("SLOTKEEPER_BUFFER_MINUTES={buffer_minutes} exceeds {MAX_BUFFER_MINUTES}, clamping");
            buffer_minutes = MAX_BUFFER_MINUTES;
        }
        let mut suggestion_limit =
            parse_or(&lookup, "SLOTKEEPER_SUGGESTION_LIMIT", defaults.suggestion_limit);
        if suggestion_limit > MAX_SUGGESTION_LIMIT {
            warn!("SLOTKEEPER_SUGGESTION_LIMIT={suggestion_limit} exceeds {MAX_SUGGESTION_LIMIT}, clamping");
            suggestion_limit = MAX_SUGGESTION_LIMIT;
        }

        Self {
            data_dir: lookup("SLOTKEEPER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            buffer_minutes,
            patient_lead_time_hours: parse_or(
                &lookup,
                "SLOTKEEPER_PATIENT_LEAD_TIME_HOURS",
                defaults.patient_lead_time_hours,
            ),
            suggestion_limit,
            suggestion_window_days: parse_or(
                &lookup,
                "SLOTKEEPER_SUGGESTION_WINDOW_DAYS",
                defaults.suggestion_window_days,
            ),
            compact_threshold: parse_or(
                &lookup,
                "SLOTKEEPER_COMPACT_THRESHOLD",
                defaults.compact_threshold,
            ),
            metrics_port: lookup("SLOTKEEPER_METRICS_PORT").and_then(|raw| match raw.parse() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!("SLOTKEEPER_METRICS_PORT={raw:?} is not a port, metrics disabled");
                    None
                }
            }),
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            patient_lead_time_ms: self.patient_lead_time_hours as Ms * HOUR_MS,
            suggestion_limit: self.suggestion_limit,
            suggestion_window_ms: self.suggestion_window_days as Ms * DAY_MS,
            ..Policy::default()
        }
        .with_buffer_minutes(self.buffer_minutes)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotkeeper.wal")
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{key}={raw:?} is not valid, using default {default}");
            default
        }),
    }
}
