use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "chatpyme.toml";
pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub assistant: AssistantConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    /// Absent token puts the bot transport in no-op mode.
    pub bot_token: Option<SecretString>,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Empty list means any origin.
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssistantConfig {
    pub max_turns: usize,
    pub context_turns: usize,
    pub summary_window_days: u32,
    pub recent_movements: u32,
    pub context_excerpt_chars: usize,
    /// Sessions untouched for this long are dropped from memory.
    pub session_idle_minutes: u64,
    pub seed_demo_data: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    Ollama,
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
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub server_port: Option<u16>,
    pub seed_demo_data: Option<bool>,
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
                url: "sqlite://chatpyme.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: None,
                api_base_url: "https://api.telegram.org".to_string(),
                poll_timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
                cors_allowed_origins: Vec::new(),
            },
            assistant: AssistantConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

/// One week.
pub const MAX_SESSION_IDLE_MINUTES: u64 = 10_080;

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            context_turns: 10,
            summary_window_days: 30,
            recent_movements: 10,
            context_excerpt_chars: 100,
            session_idle_minutes: 120,
            seed_demo_data: false,
        }
    }
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

impl LlmConfig {
    /// Configured base url, or the provider's well-known default.
    pub fn effective_base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, LlmProvider::OpenAi) => OPENAI_DEFAULT_BASE_URL,
            (None, LlmProvider::Ollama) => OLLAMA_DEFAULT_BASE_URL,
        }
    }

    /// Whether the provider has what it needs to be called at all.
    pub fn has_credentials(&self) -> bool {
        match self.provider {
            LlmProvider::OpenAi => self
                .api_key
                .as_ref()
                .map(|key| !key.expose_secret().trim().is_empty())
                .unwrap_or(false),
            LlmProvider::Ollama => true,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
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
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
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

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = Some(secret_value(bot_token));
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(origins) = server.cors_allowed_origins {
                self.server.cors_allowed_origins = origins;
            }
        }

        if let Some(assistant) = patch.assistant {
            if let Some(max_turns) = assistant.max_turns {
                self.assistant.max_turns = max_turns;
            }
            if let Some(context_turns) = assistant.context_turns {
                self.assistant.context_turns = context_turns;
            }
            if let Some(summary_window_days) = assistant.summary_window_days {
                self.assistant.summary_window_days = summary_window_days;
            }
            if let Some(recent_movements) = assistant.recent_movements {
                self.assistant.recent_movements = recent_movements;
            }
            if let Some(context_excerpt_chars) = assistant.context_excerpt_chars {
                self.assistant.context_excerpt_chars = context_excerpt_chars;
            }
            if let Some(session_idle_minutes) = assistant.session_idle_minutes {
                self.assistant.session_idle_minutes = session_idle_minutes;
            }
            if let Some(seed_demo_data) = assistant.seed_demo_data {
                self.assistant.seed_demo_data = seed_demo_data;
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
        if let Some(value) = read_env("CHATPYME_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CHATPYME_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_number("CHATPYME_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_number("CHATPYME_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let bot_token =
            read_env("CHATPYME_TELEGRAM_BOT_TOKEN").or_else(|| read_env("TELEGRAM_TOKEN"));
        if let Some(value) = bot_token {
            self.telegram.bot_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CHATPYME_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("CHATPYME_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_number("CHATPYME_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CHATPYME_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let api_key = read_env("CHATPYME_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CHATPYME_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CHATPYME_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CHATPYME_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_number("CHATPYME_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CHATPYME_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CHATPYME_SERVER_PORT") {
            self.server.port = parse_number("CHATPYME_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_number("CHATPYME_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_SERVER_CORS_ALLOWED_ORIGINS") {
            self.server.cors_allowed_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = read_env("CHATPYME_ASSISTANT_MAX_TURNS") {
            self.assistant.max_turns = parse_number("CHATPYME_ASSISTANT_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_ASSISTANT_CONTEXT_TURNS") {
            self.assistant.context_turns =
                parse_number("CHATPYME_ASSISTANT_CONTEXT_TURNS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_ASSISTANT_SUMMARY_WINDOW_DAYS") {
            self.assistant.summary_window_days =
                parse_number("CHATPYME_ASSISTANT_SUMMARY_WINDOW_DAYS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_ASSISTANT_RECENT_MOVEMENTS") {
            self.assistant.recent_movements =
                parse_number("CHATPYME_ASSISTANT_RECENT_MOVEMENTS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_ASSISTANT_CONTEXT_EXCERPT_CHARS") {
            self.assistant.context_excerpt_chars =
                parse_number("CHATPYME_ASSISTANT_CONTEXT_EXCERPT_CHARS", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES") {
            self.assistant.session_idle_minutes =
                parse_number("CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CHATPYME_ASSISTANT_SEED_DEMO_DATA") {
            self.assistant.seed_demo_data =
                parse_number("CHATPYME_ASSISTANT_SEED_DEMO_DATA", &value)?;
        }

        let log_level =
            read_env("CHATPYME_LOGGING_LEVEL").or_else(|| read_env("CHATPYME_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CHATPYME_LOGGING_FORMAT").or_else(|| read_env("CHATPYME_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = Some(secret_value(bot_token));
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(seed_demo_data) = overrides.seed_demo_data {
            self.assistant.seed_demo_data = seed_demo_data;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_assistant(&self.assistant)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    if let Some(token) = &telegram.bot_token {
        let token = token.expose_secret().trim();
        let well_formed = token
            .split_once(':')
            .map(|(bot_id, secret)| {
                !bot_id.is_empty()
                    && bot_id.chars().all(|character| character.is_ascii_digit())
                    && !secret.is_empty()
            })
            .unwrap_or(false);
        if !well_formed {
            return Err(ConfigError::Validation(
                "telegram.bot_token must look like `<bot id>:<secret>`. Get it from @BotFather"
                    .to_string(),
            ));
        }
    }

    if !is_http_url(&telegram.api_base_url) {
        return Err(ConfigError::Validation(
            "telegram.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if telegram.poll_timeout_secs == 0 || telegram.poll_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = &llm.base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(origin) = server.cors_allowed_origins.iter().find(|origin| !is_http_url(origin)) {
        return Err(ConfigError::Validation(format!(
            "server.cors_allowed_origins entry `{origin}` must start with http:// or https://"
        )));
    }

    Ok(())
}

fn validate_assistant(assistant: &AssistantConfig) -> Result<(), ConfigError> {
    if assistant.max_turns == 0 {
        return Err(ConfigError::Validation(
            "assistant.max_turns must be greater than zero".to_string(),
        ));
    }

    if assistant.context_turns == 0 || assistant.context_turns > assistant.max_turns {
        return Err(ConfigError::Validation(
            "assistant.context_turns must be in range 1..=assistant.max_turns".to_string(),
        ));
    }

    if assistant.summary_window_days == 0 {
        return Err(ConfigError::Validation(
            "assistant.summary_window_days must be greater than zero".to_string(),
        ));
    }

    if assistant.context_excerpt_chars == 0 {
        return Err(ConfigError::Validation(
            "assistant.context_excerpt_chars must be greater than zero".to_string(),
        ));
    }

    if !(1..=MAX_SESSION_IDLE_MINUTES).contains(&assistant.session_idle_minutes) {
        return Err(ConfigError::Validation(format!(
            "assistant.session_idle_minutes must be in range 1..={MAX_SESSION_IDLE_MINUTES}"
        )));
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    telegram: Option<TelegramPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    assistant: Option<AssistantPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    cors_allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantPatch {
    max_turns: Option<usize>,
    context_turns: Option<usize>,
    summary_window_days: Option<u32>,
    recent_movements: Option<u32>,
    context_excerpt_chars: Option<usize>,
    session_idle_minutes: Option<u64>,
    seed_demo_data: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const MANAGED_VARS: &[&str] = &[
        "TEST_CHATPYME_BOT_TOKEN",
        "TELEGRAM_TOKEN",
        "OPENAI_API_KEY",
        "CHATPYME_DATABASE_URL",
        "CHATPYME_TELEGRAM_BOT_TOKEN",
        "CHATPYME_LLM_API_KEY",
        "CHATPYME_LLM_PROVIDER",
        "CHATPYME_ASSISTANT_MAX_TURNS",
        "CHATPYME_ASSISTANT_SEED_DEMO_DATA",
        "CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES",
        "CHATPYME_LOG_LEVEL",
        "CHATPYME_LOG_FORMAT",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars() {
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.telegram.bot_token.is_none(), "bot token should default to none")?;
        ensure(!config.llm.has_credentials(), "openai without key has no credentials")?;
        ensure(config.assistant.max_turns == 20, "max turns should default to 20")?;
        ensure(config.assistant.context_turns == 10, "context turns should default to 10")?;
        ensure(config.server.port == 8000, "port should default to 8000")?;
        ensure(
            config.llm.effective_base_url() == "https://api.openai.com/v1",
            "openai base url should be the default",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        env::set_var("TEST_CHATPYME_BOT_TOKEN", "12345:from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("chatpyme.toml");
            fs::write(
                &path,
                r#"
[telegram]
bot_token = "${TEST_CHATPYME_BOT_TOKEN}"

[assistant]
max_turns = 8
context_turns = 4
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config.telegram.bot_token.as_ref().map(|token| token.expose_secret());
            ensure(token == Some("12345:from-env"), "bot token should be interpolated")?;
            ensure(config.assistant.max_turns == 8, "max turns should come from file")?;
            ensure(config.assistant.context_turns == 4, "context turns should come from file")
        })();

        clear_vars();
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("chatpyme.toml");
        fs::write(&path, "[llm]\napi_key = \"${CHATPYME_TEST_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        let result =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
        ensure(
            matches!(
                result,
                Err(ConfigError::MissingEnvInterpolation { ref var }) if var == "CHATPYME_TEST_UNSET_VAR"
            ),
            "unset interpolation variable should fail",
        )
    }

    #[test]
    fn legacy_env_aliases_are_honored() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        env::set_var("TELEGRAM_TOKEN", "987:legacy");
        env::set_var("OPENAI_API_KEY", "sk-legacy");
        env::set_var("CHATPYME_LOG_LEVEL", "warn");
        env::set_var("CHATPYME_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.telegram.bot_token.is_some(), "legacy telegram token should load")?;
            ensure(config.llm.has_credentials(), "legacy openai key should load")?;
            ensure(config.logging.level == "warn", "log level alias should apply")?;
            ensure(matches!(config.logging.format, LogFormat::Pretty), "log format alias")
        })();

        clear_vars();
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        env::set_var("CHATPYME_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CHATPYME_LLM_PROVIDER", "ollama");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("chatpyme.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
provider = "openai"
model = "from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.llm.provider == LlmProvider::Ollama, "env provider should win over file")?;
            ensure(config.llm.model == "from-file", "file model should win over defaults")?;
            ensure(
                config.llm.effective_base_url() == "http://localhost:11434/v1",
                "ollama base url should default",
            )
        })();

        clear_vars();
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        env::set_var("CHATPYME_TELEGRAM_BOT_TOKEN", "not-a-token");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("telegram.bot_token")
                ),
                "validation failure should mention telegram.bot_token",
            )
        })();

        clear_vars();
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        env::set_var("CHATPYME_ASSISTANT_MAX_TURNS", "many");

        let result = AppConfig::load(LoadOptions::default());
        clear_vars();

        ensure(
            matches!(
                result,
                Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "CHATPYME_ASSISTANT_MAX_TURNS"
            ),
            "non-numeric max turns should be rejected",
        )
    }

    #[test]
    fn session_idle_minutes_comes_from_env_and_rejects_zero() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();

        let result = (|| -> Result<(), String> {
            let defaults = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(defaults.assistant.session_idle_minutes == 120, "idle default should be 120")?;

            env::set_var("CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES", "15");
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.assistant.session_idle_minutes == 15, "env idle minutes should apply")?;

            env::set_var("CHATPYME_ASSISTANT_SESSION_IDLE_MINUTES", "0");
            ensure(
                matches!(
                    AppConfig::load(LoadOptions::default()),
                    Err(ConfigError::Validation(ref message))
                        if message.contains("assistant.session_idle_minutes")
                ),
                "zero idle minutes should fail validation",
            )
        })();

        clear_vars();
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars();
        env::set_var("CHATPYME_TELEGRAM_BOT_TOKEN", "4242:telegram-secret-value");
        env::set_var("CHATPYME_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("telegram-secret-value"), "debug leaks bot token")?;
            ensure(!debug.contains("sk-secret-value"), "debug leaks api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars();
        result
    }
}
