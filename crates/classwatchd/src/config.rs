use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use classwatch_core::attendance::DEFAULT_PRESENCE_FRACTION;

const DEFAULT_DETECTION_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then an optional TOML file, then environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the REST API listens on (default: 127.0.0.1:3000).
    pub bind_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Fraction of class duration required for Present, in (0, 1].
    pub presence_fraction: f64,
    /// Maximum Euclidean descriptor distance for a match (lower = stricter).
    pub detection_threshold: f32,
    /// Seconds between scheduler reconciliations.
    pub poll_interval_secs: u64,
    /// Per-student detection-log cap within a window; 0 disables the cap.
    pub detection_log_cap: usize,
    /// Maximum rows returned by attendance queries.
    pub query_limit: usize,
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_addr: Option<SocketAddr>,
    db_path: Option<PathBuf>,
    presence_fraction: Option<f64>,
    detection_threshold: Option<f32>,
    poll_interval_secs: Option<u64>,
    detection_log_cap: Option<usize>,
    query_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("classwatch");

        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            db_path: data_dir.join("attendance.db"),
            presence_fraction: DEFAULT_PRESENCE_FRACTION,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            poll_interval_secs: 60,
            detection_log_cap: 5000,
            query_limit: 100,
        }
    }
}

impl Config {
    /// Load configuration. `CLASSWATCH_CONFIG` names an optional TOML file;
    /// `CLASSWATCH_*` variables override it.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("CLASSWATCH_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env();
        config.sanitize();
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = parse_file(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge(file);
        Ok(())
    }

    fn merge(&mut self, file: FileConfig) {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.presence_fraction {
            self.presence_fraction = v;
        }
        if let Some(v) = file.detection_threshold {
            self.detection_threshold = v;
        }
        if let Some(v) = file.poll_interval_secs {
            self.poll_interval_secs = v;
        }
        if let Some(v) = file.detection_log_cap {
            self.detection_log_cap = v;
        }
        if let Some(v) = file.query_limit {
            self.query_limit = v;
        }
    }

    fn apply_env(&mut self) {
        self.bind_addr = env_parse("CLASSWATCH_BIND_ADDR", self.bind_addr);
        if let Ok(path) = std::env::var("CLASSWATCH_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.presence_fraction = env_parse("CLASSWATCH_PRESENCE_FRACTION", self.presence_fraction);
        self.detection_threshold =
            env_parse("CLASSWATCH_DETECTION_THRESHOLD", self.detection_threshold);
        self.poll_interval_secs = env_parse("CLASSWATCH_POLL_INTERVAL_SECS", self.poll_interval_secs);
        self.detection_log_cap = env_parse("CLASSWATCH_DETECTION_LOG_CAP", self.detection_log_cap);
        self.query_limit = env_parse("CLASSWATCH_QUERY_LIMIT", self.query_limit);
    }

    /// Clamp values that would break invariants rather than refusing to start.
    fn sanitize(&mut self) {
        if !(self.presence_fraction > 0.0 && self.presence_fraction <= 1.0) {
            tracing::warn!(
                value = self.presence_fraction,
                "presence_fraction out of range; using default"
            );
            self.presence_fraction = DEFAULT_PRESENCE_FRACTION;
        }
        if !(self.detection_threshold.is_finite() && self.detection_threshold > 0.0) {
            tracing::warn!(
                value = self.detection_threshold,
                "detection_threshold must be positive; using default"
            );
            self.detection_threshold = DEFAULT_DETECTION_THRESHOLD;
        }
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = 1;
        }
        if self.query_limit == 0 {
            self.query_limit = 100;
        }
    }

    /// Log cap as understood by the presence tracker.
    pub fn log_cap(&self) -> Option<usize> {
        (self.detection_log_cap > 0).then_some(self.detection_log_cap)
    }
}

fn parse_file(raw: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(raw)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.presence_fraction, 0.75);
        assert_eq!(config.detection_threshold, 0.6);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.query_limit, 100);
        assert!(config.db_path.ends_with("classwatch/attendance.db"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = parse_file(
            r#"
            bind_addr = "0.0.0.0:8080"
            presence_fraction = 0.8
            detection_log_cap = 0
            "#,
        )
        .unwrap();
        let mut config = Config::default();
        config.merge(file);

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.presence_fraction, 0.8);
        assert_eq!(config.log_cap(), None);
        assert_eq!(config.detection_threshold, 0.6);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(parse_file("presence = 0.5").is_err());
    }

    #[test]
    fn test_sanitize_out_of_range_fraction() {
        let mut config = Config {
            presence_fraction: 1.5,
            poll_interval_secs: 0,
            ..Config::default()
        };
        config.sanitize();
        assert_eq!(config.presence_fraction, 0.75);
        assert_eq!(config.poll_interval_secs, 1);
    }

    #[test]
    fn test_sanitize_unusable_threshold() {
        for bad in [0.0, -0.4, f32::NAN, f32::INFINITY] {
            let mut config = Config {
                detection_threshold: bad,
                ..Config::default()
            };
            config.sanitize();
            assert_eq!(config.detection_threshold, 0.6);
        }

        let mut strict = Config {
            detection_threshold: 0.45,
            ..Config::default()
        };
        strict.sanitize();
        assert_eq!(strict.detection_threshold, 0.45);
    }
}
