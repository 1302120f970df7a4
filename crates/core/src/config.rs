use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub request_timeout_secs: u64,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Bounded retry applied to conflict-classified failures (duplicate
/// sequence codes, concurrent reconciliation inserts).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 25 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://ordertrack.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            retry: RetryConfig::default(),
            request_timeout_secs: 30,
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub retry_max_attempts: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    retry: Option<FileRetry>,
    request_timeout_secs: Option<u64>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRetry {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    format: Option<LogFormat>,
}

/// Load configuration: defaults, then the optional toml file, then
/// `ORDERTRACK_*` environment variables, then explicit overrides.
pub fn load(options: LoadOptions) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();

    if let Some(path) = &options.config_path {
        match fs::read_to_string(path) {
            Ok(raw) => {
                let file: FileConfig = toml::from_str(&raw)
                    .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?;
                apply_file(&mut config, file);
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                if options.require_file {
                    return Err(ConfigError::MissingConfigFile(path.clone()));
                }
            }
            Err(source) => return Err(ConfigError::ReadFile { path: path.clone(), source }),
        }
    }

    apply_env(&mut config)?;
    apply_overrides(&mut config, &options.overrides);
    validate(&config)?;
    Ok(config)
}

fn apply_file(config: &mut AppConfig, file: FileConfig) {
    if let Some(database) = file.database {
        if let Some(url) = database.url {
            config.database.url = url;
        }
        if let Some(max_connections) = database.max_connections {
            config.database.max_connections = max_connections;
        }
        if let Some(timeout_secs) = database.timeout_secs {
            config.database.timeout_secs = timeout_secs;
        }
    }
    if let Some(retry) = file.retry {
        if let Some(max_attempts) = retry.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(base_delay_ms) = retry.base_delay_ms {
            config.retry.base_delay_ms = base_delay_ms;
        }
    }
    if let Some(request_timeout_secs) = file.request_timeout_secs {
        config.request_timeout_secs = request_timeout_secs;
    }
    if let Some(logging) = file.logging {
        if let Some(level) = logging.level {
            config.logging.level = level;
        }
        if let Some(format) = logging.format {
            config.logging.format = format;
        }
    }
}

fn apply_env(config: &mut AppConfig) -> Result<(), ConfigError> {
    if let Ok(url) = env::var("ORDERTRACK_DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(level) = env::var("ORDERTRACK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(raw) = env::var("ORDERTRACK_REQUEST_TIMEOUT_SECS") {
        config.request_timeout_secs = parse_env("ORDERTRACK_REQUEST_TIMEOUT_SECS", &raw)?;
    }
    if let Ok(raw) = env::var("ORDERTRACK_RETRY_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_env("ORDERTRACK_RETRY_MAX_ATTEMPTS", &raw)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn apply_overrides(config: &mut AppConfig, overrides: &ConfigOverrides) {
    if let Some(url) = &overrides.database_url {
        config.database.url = url.clone();
    }
    if let Some(level) = &overrides.log_level {
        config.logging.level = level.clone();
    }
    if let Some(secs) = overrides.request_timeout_secs {
        config.request_timeout_secs = secs;
    }
    if let Some(attempts) = overrides.retry_max_attempts {
        config.retry.max_attempts = attempts;
    }
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.database.url.is_empty() {
        return Err(ConfigError::Validation("database.url must not be empty".to_string()));
    }
    if config.database.max_connections == 0 {
        return Err(ConfigError::Validation("database.max_connections must be >= 1".to_string()));
    }
    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation("retry.max_attempts must be >= 1".to_string()));
    }
    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation("request_timeout_secs must be >= 1".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::{load, ConfigError, ConfigOverrides, LoadOptions, LogFormat, RetryConfig};

    #[test]
    fn defaults_apply_without_a_config_file() {
        let config = load(LoadOptions::default()).expect("load defaults");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "request_timeout_secs = 5\n\n\
             [database]\nurl = \"sqlite::memory:\"\nmax_connections = 2\n\n\
             [retry]\nmax_attempts = 5\nbase_delay_ms = 10\n\n\
             [logging]\nlevel = \"debug\"\nformat = \"json\"\n"
        )
        .expect("write config");

        let config = load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            ..LoadOptions::default()
        })
        .expect("load file config");

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn explicit_overrides_win_over_file_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "[database]\nurl = \"sqlite://from-file.db\"\n").expect("write config");

        let config = load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            overrides: ConfigOverrides {
                database_url: Some("sqlite://from-override.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("load");

        assert_eq!(config.database.url, "sqlite://from-override.db");
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let error = load(LoadOptions {
            config_path: Some("/nonexistent/ordertrack.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        })
        .expect_err("must fail");
        assert!(matches!(error, ConfigError::MissingConfigFile(_)));
    }

    #[test]
    fn zero_retry_attempts_fail_validation() {
        let error = load(LoadOptions {
            overrides: ConfigOverrides {
                retry_max_attempts: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect_err("must fail");
        assert!(matches!(error, ConfigError::Validation(_)));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetryConfig { max_attempts: 4, base_delay_ms: 25 };
        assert_eq!(retry.backoff_delay(1), Duration::from_millis(25));
        assert_eq!(retry.backoff_delay(2), Duration::from_millis(50));
        assert_eq!(retry.backoff_delay(3), Duration::from_millis(100));
    }
}
