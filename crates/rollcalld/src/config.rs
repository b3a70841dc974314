//! Daemon configuration — optional TOML file, `ROLLCALL_*` env overrides.
//!
//! Precedence per field: environment variable, then config file, then the
//! built-in default.

use rollcall_core::liveness::{self, ChainConfig, StrategyKind};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub struct Config {
    /// Path to the gallery JSON file.
    pub gallery_path: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f32,
    pub movement_threshold: f32,
    pub blink_threshold: f32,
    pub required_blinks: usize,
    pub combined_threshold: f32,
    /// Liveness strategy preference, first available wins.
    pub liveness_order: Vec<StrategyKind>,
    pub abuse_window_secs: u64,
    pub abuse_max_failures: usize,
    pub abuse_block_secs: u64,
    pub extract_timeout_secs: u64,
    pub store_timeout_secs: u64,
}

/// Optional `rollcall.toml`; every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    gallery_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    movement_threshold: Option<f32>,
    blink_threshold: Option<f32>,
    required_blinks: Option<usize>,
    combined_threshold: Option<f32>,
    liveness_order: Option<String>,
    abuse_window_secs: Option<u64>,
    abuse_max_failures: Option<usize>,
    abuse_block_secs: Option<u64>,
    extract_timeout_secs: Option<u64>,
    store_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables layered
    /// over an optional config file, with defaults underneath.
    pub fn load() -> Self {
        let file = load_file_config();

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let gallery_path = std::env::var("ROLLCALL_GALLERY_PATH")
            .map(PathBuf::from)
            .ok()
            .or(file.gallery_path)
            .unwrap_or_else(|| data_dir.join("gallery.json"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .ok()
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("attendance.db"));

        let liveness_order = std::env::var("ROLLCALL_LIVENESS_ORDER")
            .ok()
            .or(file.liveness_order)
            .map(|raw| parse_liveness_order(&raw))
            .unwrap_or_else(|| ChainConfig::default().preference);

        Self {
            gallery_path,
            db_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", file.match_threshold, 0.6),
            movement_threshold: env_f32(
                "ROLLCALL_MOVEMENT_THRESHOLD",
                file.movement_threshold,
                liveness::DEFAULT_MOVEMENT_THRESHOLD,
            ),
            blink_threshold: env_f32(
                "ROLLCALL_BLINK_THRESHOLD",
                file.blink_threshold,
                liveness::DEFAULT_BLINK_THRESHOLD,
            ),
            required_blinks: env_usize(
                "ROLLCALL_REQUIRED_BLINKS",
                file.required_blinks,
                liveness::DEFAULT_REQUIRED_BLINKS,
            ),
            combined_threshold: env_f32(
                "ROLLCALL_COMBINED_THRESHOLD",
                file.combined_threshold,
                liveness::DEFAULT_COMBINED_THRESHOLD,
            ),
            liveness_order,
            abuse_window_secs: env_u64("ROLLCALL_ABUSE_WINDOW_SECS", file.abuse_window_secs, 600),
            abuse_max_failures: env_usize(
                "ROLLCALL_ABUSE_MAX_FAILURES",
                file.abuse_max_failures,
                5,
            ),
            abuse_block_secs: env_u64("ROLLCALL_ABUSE_BLOCK_SECS", file.abuse_block_secs, 3600),
            extract_timeout_secs: env_u64(
                "ROLLCALL_EXTRACT_TIMEOUT_SECS",
                file.extract_timeout_secs,
                5,
            ),
            store_timeout_secs: env_u64("ROLLCALL_STORE_TIMEOUT_SECS", file.store_timeout_secs, 3),
        }
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            movement_threshold: self.movement_threshold,
            blink_threshold: self.blink_threshold,
            required_blinks: self.required_blinks,
            combined_threshold: self.combined_threshold,
            preference: self.liveness_order.clone(),
        }
    }

    pub fn abuse_config(&self) -> crate::abuse::AbuseConfig {
        crate::abuse::AbuseConfig {
            window: chrono::Duration::seconds(self.abuse_window_secs as i64),
            max_failures: self.abuse_max_failures,
            block_duration: chrono::Duration::seconds(self.abuse_block_secs as i64),
        }
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn load_file_config() -> FileConfig {
    let path = std::env::var("ROLLCALL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("rollcall/rollcall.toml")
        });

    if !path.exists() {
        return FileConfig::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(file) => {
                tracing::info!(path = %path.display(), "config file loaded");
                file
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "bad config file; ignoring");
                FileConfig::default()
            }
        },
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "unreadable config file; ignoring");
            FileConfig::default()
        }
    }
}

/// Parse a comma-separated strategy list, skipping unknown names.
pub fn parse_liveness_order(raw: &str) -> Vec<StrategyKind> {
    let mut order = Vec::new();
    for name in raw.split(',').filter(|s| !s.trim().is_empty()) {
        match name.parse::<StrategyKind>() {
            Ok(kind) => order.push(kind),
            Err(err) => tracing::warn!(%err, "ignoring liveness strategy"),
        }
    }
    order
}

fn env_f32(key: &str, file: Option<f32>, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .or(file)
        .unwrap_or(default)
}

fn env_u64(key: &str, file: Option<u64>, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .or(file)
        .unwrap_or(default)
}

fn env_usize(key: &str, file: Option<usize>, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .or(file)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_liveness_order() {
        assert_eq!(
            parse_liveness_order("blink, movement"),
            vec![StrategyKind::Blink, StrategyKind::Movement]
        );
        // Unknown names are skipped, not fatal.
        assert_eq!(
            parse_liveness_order("movement,infrared"),
            vec![StrategyKind::Movement]
        );
        assert!(parse_liveness_order("").is_empty());
    }

    #[test]
    fn test_file_config_parses() {
        let file: FileConfig = toml::from_str(
            r#"
            match_threshold = 0.5
            liveness_order = "blink,movement"
            abuse_max_failures = 3
            "#,
        )
        .unwrap();
        assert_eq!(file.match_threshold, Some(0.5));
        assert_eq!(file.liveness_order.as_deref(), Some("blink,movement"));
        assert_eq!(file.abuse_max_failures, Some(3));
        assert_eq!(file.db_path, None);
    }

    #[test]
    fn test_file_config_rejects_unknown_fields() {
        assert!(toml::from_str::<FileConfig>("no_such_field = 1").is_err());
    }
}
