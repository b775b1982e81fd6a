use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chatpyme_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: overrides > env > file > default):".to_string()];
    for (key, value, env_keys) in entries(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

/// Reported key, rendered value and the env vars that can set it.
type Entry = (&'static str, String, &'static [&'static str]);

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    (key, value, env_keys)
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let origins = if config.server.cors_allowed_origins.is_empty() {
        "<any>".to_string()
    } else {
        config.server.cors_allowed_origins.join(",")
    };

    vec![
        entry("database.url", config.database.url.clone(), &["CHATPYME_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CHATPYME_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CHATPYME_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "telegram.bot_token",
            redact_bot_token(config.telegram.bot_token.as_ref()),
            &["CHATPYME_TELEGRAM_BOT_TOKEN", "TELEGRAM_TOKEN"],
        ),
        entry(
            "telegram.api_base_url",
            config.telegram.api_base_url.clone(),
            &["CHATPYME_TELEGRAM_API_BASE_URL"],
        ),
        entry(
            "telegram.poll_timeout_secs",
            config.telegram.poll_timeout_secs.to_string(),
            &["CHATPYME_TELEGRAM_POLL_TIMEOUT_SECS"],
        ),
        entry("llm.provider", config.llm.provider.as_str().to_string(), &["CHATPYME_LLM_PROVIDER"]),
        entry("llm.model", config.llm.model.clone(), &["CHATPYME_LLM_MODEL"]),
        entry("llm.base_url", config.llm.effective_base_url().to_string(), &["CHATPYME_LLM_BASE_URL"]),
        entry(
            "llm.api_key",
            redact_secret(config.llm.api_key.as_ref()),
            &["CHATPYME_LLM_API_KEY", "OPENAI_API_KEY"],
        ),
        entry("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["CHATPYME_LLM_TIMEOUT_SECS"]),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["CHATPYME_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["CHATPYME_SERVER_PORT"]),
        entry("server.cors_allowed_origins", origins, &["CHATPYME_SERVER_CORS_ALLOWED_ORIGINS"]),
        entry(
            "assistant.max_turns",
            config.assistant.max_turns.to_string(),
            &["CHATPYME_ASSISTANT_MAX_TURNS"],
        ),
        entry(
            "assistant.context_turns",
            config.assistant.context_turns.to_string(),
            &["CHATPYME_ASSISTANT_CONTEXT_TURNS"],
        ),
        entry(
            "assistant.summary_window_days",
            config.assistant.summary_window_days.to_string(),
            &["CHATPYME_ASSISTANT_SUMMARY_WINDOW_DAYS"],
        ),
        entry(
            "assistant.session_idle_minutes",
            config.assistant.session_idle_minutes.to_string(),
            &["CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES"],
        ),
        entry(
            "assistant.seed_demo_data",
            config.assistant.seed_demo_data.to_string(),
            &["CHATPYME_ASSISTANT_SEED_DEMO_DATA"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["CHATPYME_LOGGING_LEVEL", "CHATPYME_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["CHATPYME_LOGGING_FORMAT", "CHATPYME_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

/// Keeps the public bot id, hides the secret half.
fn redact_bot_token(token: Option<&SecretString>) -> String {
    let Some(token) = token else {
        return "<unset>".to_string();
    };
    match token.expose_secret().trim().split_once(':') {
        Some((bot_id, _)) => format!("{bot_id}:***"),
        None => "<redacted>".to_string(),
    }
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        Some(_) => "<redacted>".to_string(),
        None => "<unset>".to_string(),
    }
}
