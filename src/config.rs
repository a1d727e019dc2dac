use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Process settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the WAL. `None` runs on the in-memory store.
    pub data_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    /// Extra attempts after a version conflict.
    pub max_retries: u32,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
    pub drill_writers: usize,
    pub drill_rooms: usize,
    pub drill_rounds: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            metrics_port: None,
            max_retries: 3,
            compact_threshold: 1000,
            drill_writers: 8,
            drill_rooms: 4,
            drill_rounds: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("ROOMBOOK_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            metrics_port: parsed(&lookup, "ROOMBOOK_METRICS_PORT"),
            max_retries: parsed(&lookup, "ROOMBOOK_MAX_RETRIES").unwrap_or(defaults.max_retries),
            compact_threshold: parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            drill_writers: positive(&lookup, "ROOMBOOK_DRILL_WRITERS")
                .unwrap_or(defaults.drill_writers),
            drill_rooms: positive(&lookup, "ROOMBOOK_DRILL_ROOMS").unwrap_or(defaults.drill_rooms),
            drill_rounds: positive(&lookup, "ROOMBOOK_DRILL_ROUNDS")
                .unwrap_or(defaults.drill_rounds),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    match parsed::<usize>(lookup, key) {
        Some(0) => {
            warn!("ignoring {key}=0: must be at least 1");
            None
        }
        other => other,
    }
}
