//! Configuration layer: typed settings with layered precedence (file → env).

use std::{path::Path, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::pagination::DEFAULT_PER_PAGE;
use crate::cache::CacheConfig;

const LOCAL_CONFIG_BASENAME: &str = "repocache";
const ENV_PREFIX: &str = "REPOCACHE";
const ENV_SEPARATOR: &str = "__";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
    pub repository: RepositoryDefaults,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Defaults applied to repositories built from these settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDefaults {
    pub per_page: u32,
    /// Overrides the cache default TTL for repository reads when set.
    pub ttl: Option<Duration>,
}

impl Default for RepositoryDefaults {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            ttl: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings from `repocache.toml` (optional), an explicit file when
/// given, then `REPOCACHE__*` environment variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, ConfigError> {
        let RawSettings {
            cache,
            logging,
            repository,
        } = raw;

        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;
        let repository = build_repository_defaults(repository)?;

        Ok(Self {
            cache,
            logging,
            repository,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, ConfigError> {
    let defaults = CacheConfig::default();

    let capacity = match cache.capacity {
        Some(0) => {
            return Err(ConfigError::invalid(
                "cache.capacity",
                "must be greater than zero",
            ));
        }
        Some(capacity) => usize::try_from(capacity).map_err(|_| {
            ConfigError::invalid("cache.capacity", "value exceeds supported range")
        })?,
        None => defaults.capacity,
    };

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        default_ttl_seconds: cache
            .default_ttl_seconds
            .unwrap_or(defaults.default_ttl_seconds),
        capacity,
        supports_tags: cache.supports_tags.unwrap_or(defaults.supports_tags),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, ConfigError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            ConfigError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_repository_defaults(
    repository: RawRepositorySettings,
) -> Result<RepositoryDefaults, ConfigError> {
    let per_page = repository.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if per_page == 0 {
        return Err(ConfigError::invalid(
            "repository.per_page",
            "must be greater than zero",
        ));
    }

    Ok(RepositoryDefaults {
        per_page,
        ttl: repository.ttl_seconds.map(Duration::from_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
    repository: RawRepositorySettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    capacity: Option<u64>,
    supports_tags: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRepositorySettings {
    per_page: Option<u32>,
    ttl_seconds: Option<u64>,
}
