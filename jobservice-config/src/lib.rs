use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels accepted by `logging.level`.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker_pool: Option<WorkerPoolSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerPoolSection {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub shutdown_drain_dead_letters: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub default_max_fails: Option<u32>,
    #[serde(default)]
    pub dead_letter_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
    #[serde(default)]
    pub job_log_dir: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try each enabled format in turn.
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    // yaml last: it accepts almost anything
    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Resolved job service configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub worker_pool: WorkerPoolSettings,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerPoolSettings {
    pub workers: usize,
    /// Deliver outstanding dead-letter confirmations before exiting.
    pub shutdown_drain_dead_letters: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryConfig {
    /// Threshold for job types that declare `max_fails() == 0`.
    pub default_max_fails: u32,
    pub dead_letter_grace_ms: u64,
}

impl RetryConfig {
    #[inline]
    pub fn dead_letter_grace(&self) -> Duration {
        Duration::from_millis(self.dead_letter_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// When set, each job run writes its own `<job_id>.log` here.
    pub job_log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool: WorkerPoolSettings {
                workers: 10,
                shutdown_drain_dead_letters: true,
            },
            retry: RetryConfig {
                default_max_fails: 4,
                dead_letter_grace_ms: 2000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
                job_log_dir: None,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(()),
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Merge the sections present in a raw file over `cfg`.
pub fn apply_raw(cfg: &mut Config, raw: RawConfigFile) {
    if let Some(pool) = raw.worker_pool {
        apply_opt!(cfg.worker_pool.workers, pool.workers);
        apply_opt!(
            cfg.worker_pool.shutdown_drain_dead_letters,
            pool.shutdown_drain_dead_letters
        );
    }
    if let Some(retry) = raw.retry {
        apply_opt!(cfg.retry.default_max_fails, retry.default_max_fails);
        apply_opt!(cfg.retry.dead_letter_grace_ms, retry.dead_letter_grace_ms);
    }
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, logging.level);
        apply_opt!(cfg.logging.json, logging.json);
        apply_opt!(cfg.logging.job_log_dir, logging.job_log_dir, wrap);
    }
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();
    if let Some(p) = path {
        apply_raw(&mut cfg, load_raw_from_file(p)?);
    }
    apply_env_overrides(&mut cfg, |key| env::var(key).ok())?;
    Ok(cfg)
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e)))
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).map_err(|_| ConfigError::Parse(format!("invalid {}", key)))
}

/// Apply `JOBSERVICE_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Worker pool
    if let Some(v) = lookup("JOBSERVICE_WORKERS") {
        cfg.worker_pool.workers = parse_var("JOBSERVICE_WORKERS", &v)?;
    }
    if let Some(v) = lookup("JOBSERVICE_SHUTDOWN_DRAIN_DEAD_LETTERS") {
        cfg.worker_pool.shutdown_drain_dead_letters =
            parse_bool_var("JOBSERVICE_SHUTDOWN_DRAIN_DEAD_LETTERS", &v)?;
    }

    // Retry
    if let Some(v) = lookup("JOBSERVICE_DEFAULT_MAX_FAILS") {
        cfg.retry.default_max_fails = parse_var("JOBSERVICE_DEFAULT_MAX_FAILS", &v)?;
    }
    if let Some(v) = lookup("JOBSERVICE_DEAD_LETTER_GRACE_MS") {
        cfg.retry.dead_letter_grace_ms = parse_var("JOBSERVICE_DEAD_LETTER_GRACE_MS", &v)?;
    }

    // Logging
    if let Some(v) = lookup("JOBSERVICE_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = lookup("JOBSERVICE_LOG_JSON") {
        cfg.logging.json = parse_bool_var("JOBSERVICE_LOG_JSON", &v)?;
    }
    if let Some(v) = lookup("JOBSERVICE_JOB_LOG_DIR") {
        cfg.logging.job_log_dir = if v.is_empty() {
            None
        } else {
            Some(PathBuf::from(v))
        };
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.worker_pool.workers == 0 {
        return Err(ConfigError::Validation(
            "worker_pool.workers must be > 0".into(),
        ));
    }
    if cfg.retry.default_max_fails == 0 {
        return Err(ConfigError::Validation(
            "retry.default_max_fails must be > 0".into(),
        ));
    }
    if !LOG_LEVELS.contains(&cfg.logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "invalid logging.level: {} (expected one of {})",
            cfg.logging.level,
            LOG_LEVELS.join(", ")
        )));
    }
    if let Some(dir) = &cfg.logging.job_log_dir {
        if dir.is_file() {
            return Err(ConfigError::Validation(format!(
                "logging.job_log_dir is a file: {}",
                dir.display()
            )));
        }
    }
    Ok(())
}
