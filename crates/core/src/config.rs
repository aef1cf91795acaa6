use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpq::mutation::DEFAULT_TENURE_MONTHS;
use crate::cpq::refresh::DEFAULT_MAX_CONCURRENT_LOOKUPS;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["phasequote.toml", "config/phasequote.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub pricing: PricingConfig,
    pub quotation: QuotationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub source: PricingSource,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_concurrent_lookups: usize,
}

#[derive(Clone, Debug)]
pub struct QuotationConfig {
    pub default_currency: String,
    pub default_tenure_months: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Where item prices are looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingSource {
    Sqlite,
    Http,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub pricing_source: Option<PricingSource>,
    pub pricing_base_url: Option<String>,
    pub pricing_api_token: Option<String>,
    pub default_currency: Option<String>,
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
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://phasequote.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            pricing: PricingConfig {
                source: PricingSource::Sqlite,
                base_url: None,
                api_token: None,
                timeout_secs: 10,
                max_retries: 2,
                max_concurrent_lookups: DEFAULT_MAX_CONCURRENT_LOOKUPS,
            },
            quotation: QuotationConfig {
                default_currency: "USD".to_string(),
                default_tenure_months: DEFAULT_TENURE_MONTHS,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for PricingSource {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported pricing source `{other}` (expected sqlite|http)"
            ))),
        }
    }
}

impl PricingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Http => "http",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(source) = pricing.source {
                self.pricing.source = source;
            }
            if let Some(base_url) = pricing.base_url {
                self.pricing.base_url = Some(base_url);
            }
            if let Some(api_token) = pricing.api_token {
                self.pricing.api_token = Some(secret_value(api_token));
            }
            if let Some(timeout_secs) = pricing.timeout_secs {
                self.pricing.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = pricing.max_retries {
                self.pricing.max_retries = max_retries;
            }
            if let Some(max_concurrent_lookups) = pricing.max_concurrent_lookups {
                self.pricing.max_concurrent_lookups = max_concurrent_lookups;
            }
        }

        if let Some(quotation) = patch.quotation {
            if let Some(default_currency) = quotation.default_currency {
                self.quotation.default_currency = default_currency;
            }
            if let Some(default_tenure_months) = quotation.default_tenure_months {
                self.quotation.default_tenure_months = default_tenure_months;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PHASEQUOTE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PHASEQUOTE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("PHASEQUOTE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PHASEQUOTE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PHASEQUOTE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PHASEQUOTE_PRICING_SOURCE") {
            self.pricing.source = value.parse()?;
        }
        if let Some(value) = read_env("PHASEQUOTE_PRICING_BASE_URL") {
            self.pricing.base_url = Some(value);
        }
        if let Some(value) = read_env("PHASEQUOTE_PRICING_API_TOKEN") {
            self.pricing.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PHASEQUOTE_PRICING_TIMEOUT_SECS") {
            self.pricing.timeout_secs = parse_u64("PHASEQUOTE_PRICING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PHASEQUOTE_PRICING_MAX_RETRIES") {
            self.pricing.max_retries = parse_u32("PHASEQUOTE_PRICING_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PHASEQUOTE_PRICING_MAX_CONCURRENT_LOOKUPS") {
            self.pricing.max_concurrent_lookups =
                parse_usize("PHASEQUOTE_PRICING_MAX_CONCURRENT_LOOKUPS", &value)?;
        }

        if let Some(value) = read_env("PHASEQUOTE_QUOTATION_DEFAULT_CURRENCY") {
            self.quotation.default_currency = value;
        }
        if let Some(value) = read_env("PHASEQUOTE_QUOTATION_DEFAULT_TENURE_MONTHS") {
            self.quotation.default_tenure_months =
                parse_u32("PHASEQUOTE_QUOTATION_DEFAULT_TENURE_MONTHS", &value)?;
        }

        let log_level =
            read_env("PHASEQUOTE_LOGGING_LEVEL").or_else(|| read_env("PHASEQUOTE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PHASEQUOTE_LOGGING_FORMAT").or_else(|| read_env("PHASEQUOTE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(source) = overrides.pricing_source {
            self.pricing.source = source;
        }
        if let Some(base_url) = overrides.pricing_base_url {
            self.pricing.base_url = Some(base_url);
        }
        if let Some(api_token) = overrides.pricing_api_token {
            self.pricing.api_token = Some(secret_value(api_token));
        }
        if let Some(default_currency) = overrides.default_currency {
            self.quotation.default_currency = default_currency;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_pricing(&self.pricing)?;
        validate_quotation(&self.quotation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

impl PricingConfig {
    /// Bearer token, if one is configured and non-blank.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_token
            .as_ref()
            .map(|token| token.expose_secret())
            .filter(|token| !token.trim().is_empty())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.timeout_secs == 0 || pricing.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "pricing.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if pricing.max_concurrent_lookups == 0 {
        return Err(ConfigError::Validation(
            "pricing.max_concurrent_lookups must be greater than zero".to_string(),
        ));
    }

    if let Some(base_url) = &pricing.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "pricing.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if pricing.source == PricingSource::Http {
        let missing = pricing.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "pricing.base_url is required when pricing.source is `http`".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_quotation(quotation: &QuotationConfig) -> Result<(), ConfigError> {
    let currency = quotation.default_currency.trim();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(format!(
            "quotation.default_currency must be a 3-letter uppercase code, got `{currency}`"
        )));
    }

    if quotation.default_tenure_months == 0 {
        return Err(ConfigError::Validation(
            "quotation.default_tenure_months must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    pricing: Option<PricingPatch>,
    quotation: Option<QuotationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    source: Option<PricingSource>,
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_concurrent_lookups: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotationPatch {
    default_currency: Option<String>,
    default_tenure_months: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
