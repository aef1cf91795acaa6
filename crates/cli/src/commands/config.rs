use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use phasequote_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILES};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];

    let config_file_doc = match config_file_path.as_deref().map(load_config_file_doc).transpose() {
        Ok(doc) => doc,
        Err(error) => {
            lines.push(format!("- warning: {error:#}"));
            None
        }
    };

    let api_token = match config.pricing.bearer_token() {
        Some(token) => redact_token(token),
        None => "<unset>".to_string(),
    };

    let fields: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "PHASEQUOTE_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "PHASEQUOTE_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "PHASEQUOTE_DATABASE_TIMEOUT_SECS",
        ),
        ("pricing.source", config.pricing.source.as_str().to_string(), "PHASEQUOTE_PRICING_SOURCE"),
        (
            "pricing.base_url",
            config.pricing.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            "PHASEQUOTE_PRICING_BASE_URL",
        ),
        ("pricing.api_token", api_token, "PHASEQUOTE_PRICING_API_TOKEN"),
        (
            "pricing.timeout_secs",
            config.pricing.timeout_secs.to_string(),
            "PHASEQUOTE_PRICING_TIMEOUT_SECS",
        ),
        (
            "pricing.max_retries",
            config.pricing.max_retries.to_string(),
            "PHASEQUOTE_PRICING_MAX_RETRIES",
        ),
        (
            "pricing.max_concurrent_lookups",
            config.pricing.max_concurrent_lookups.to_string(),
            "PHASEQUOTE_PRICING_MAX_CONCURRENT_LOOKUPS",
        ),
        (
            "quotation.default_currency",
            config.quotation.default_currency.clone(),
            "PHASEQUOTE_QUOTATION_DEFAULT_CURRENCY",
        ),
        (
            "quotation.default_tenure_months",
            config.quotation.default_tenure_months.to_string(),
            "PHASEQUOTE_QUOTATION_DEFAULT_TENURE_MONTHS",
        ),
        ("logging.level", config.logging.level.clone(), "PHASEQUOTE_LOGGING_LEVEL"),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            "PHASEQUOTE_LOGGING_FORMAT",
        ),
    ];

    for (key, value, env_key) in fields {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    raw.parse::<Value>().with_context(|| format!("could not parse `{}`", path.display()))
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps at most a short `prefix_` or `prefix-` marker of the token.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some(index) = trimmed.find(|ch: char| ch == '-' || ch == '_') {
        if index <= 8 {
            return format!("{}***", &trimmed[..=index]);
        }
    }

    "<redacted>".to_string()
}
