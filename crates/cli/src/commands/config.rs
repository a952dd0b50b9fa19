use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use bookworm_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl ToString) -> Self {
        Self { key, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", "BOOKWORM_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "BOOKWORM_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections,
        ),
        Field::new(
            "database.timeout_secs",
            "BOOKWORM_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs,
        ),
        Field::new("llm.provider", "BOOKWORM_LLM_PROVIDER", config.llm.provider.as_str()),
        Field::new("llm.model", "BOOKWORM_LLM_MODEL", &config.llm.model),
        Field::new(
            "llm.base_url",
            "BOOKWORM_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "llm.api_key",
            "BOOKWORM_LLM_API_KEY",
            redact_secret(config.llm.api_key.as_ref()),
        ),
        Field::new("llm.timeout_secs", "BOOKWORM_LLM_TIMEOUT_SECS", config.llm.timeout_secs),
        Field::new("llm.max_retries", "BOOKWORM_LLM_MAX_RETRIES", config.llm.max_retries),
        Field::new(
            "llm.retry_base_delay_ms",
            "BOOKWORM_LLM_RETRY_BASE_DELAY_MS",
            config.llm.retry_base_delay_ms,
        ),
        Field::new("catalog.base_url", "BOOKWORM_CATALOG_BASE_URL", &config.catalog.base_url),
        Field::new(
            "catalog.api_key",
            "BOOKWORM_CATALOG_API_KEY",
            redact_secret(config.catalog.api_key.as_ref()),
        ),
        Field::new(
            "catalog.timeout_secs",
            "BOOKWORM_CATALOG_TIMEOUT_SECS",
            config.catalog.timeout_secs,
        ),
        Field::new(
            "dialogue.greet_on_first_turn",
            "BOOKWORM_DIALOGUE_GREET_ON_FIRST_TURN",
            config.dialogue.greet_on_first_turn,
        ),
        Field::new(
            "dialogue.min_delegate_confidence",
            "BOOKWORM_DIALOGUE_MIN_DELEGATE_CONFIDENCE",
            config.dialogue.min_delegate_confidence,
        ),
        Field::new(
            "dialogue.turn_timeout_secs",
            "BOOKWORM_DIALOGUE_TURN_TIMEOUT_SECS",
            config.dialogue.turn_timeout_secs,
        ),
        Field::new(
            "orders.delivery_lead_days",
            "BOOKWORM_ORDERS_DELIVERY_LEAD_DAYS",
            config.orders.delivery_lead_days,
        ),
        Field::new(
            "orders.history_limit",
            "BOOKWORM_ORDERS_HISTORY_LIMIT",
            config.orders.history_limit,
        ),
        Field::new(
            "server.bind_address",
            "BOOKWORM_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Field::new("server.port", "BOOKWORM_SERVER_PORT", config.server.port),
        Field::new(
            "server.graceful_shutdown_secs",
            "BOOKWORM_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs,
        ),
        Field::new("logging.level", "BOOKWORM_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "BOOKWORM_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("bookworm.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/bookworm.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
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

/// Keeps a short recognisable prefix such as `sk-` and hides the rest.
fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
