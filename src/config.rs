use std::path::PathBuf;
use std::time::Duration;

use crate::calendar::DayZone;

/// Runtime settings. Every field has a default; `from_env` overrides
/// from `SPACEBOOK_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Compact the WAL once this many records were appended since the last
    /// compaction. `0` disables the background compactor.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    /// Zone used by the scheduler for day queries.
    pub day_zone: DayZone,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            day_zone: DayZone::Utc,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("SPACEBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let compact_threshold = parse_or(&lookup, "SPACEBOOK_COMPACT_THRESHOLD", defaults.compact_threshold);
        let compact_interval = Duration::from_secs(parse_or(
            &lookup,
            "SPACEBOOK_COMPACT_INTERVAL_SECS",
            defaults.compact_interval.as_secs(),
        ));
        let day_zone = match lookup("SPACEBOOK_UTC_OFFSET_MINUTES") {
            None => defaults.day_zone,
            Some(raw) => match raw.trim().parse::<i32>().ok().and_then(DayZone::fixed_minutes) {
                Some(zone) => zone,
                None => {
                    tracing::warn!("ignoring SPACEBOOK_UTC_OFFSET_MINUTES={raw:?}, using UTC");
                    defaults.day_zone
                }
            },
        };

        Self {
            data_dir,
            compact_threshold,
            compact_interval,
            day_zone,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("spacebook.wal")
    }
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring {key}={raw:?}, using default");
            default
        }),
    }
}
