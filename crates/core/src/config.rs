use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "idguard.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub notification: NotificationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    /// Model used for identity card extraction. Falls back to `model`.
    pub vision_model: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_turns: u32,
    pub decision_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub enforce_duplicate_notification: bool,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<SecretString>,
    pub sender: String,
    pub recipient: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
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
    pub llm_base_url: Option<String>,
    pub max_turns: Option<u32>,
    pub notification_webhook_url: Option<String>,
    pub notification_recipient: Option<String>,
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
                url: "sqlite://identity_database.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: None,
                model: "gemini-2.0-flash".to_string(),
                vision_model: None,
                timeout_secs: 60,
            },
            agent: AgentConfig {
                max_turns: 8,
                decision_timeout_secs: 60,
                tool_timeout_secs: 30,
                enforce_duplicate_notification: true,
            },
            notification: NotificationConfig {
                enabled: false,
                webhook_url: None,
                webhook_token: None,
                sender: "ID Check Security System".to_string(),
                recipient: None,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                upload_dir: PathBuf::from("uploads"),
                max_upload_bytes: 16 * 1024 * 1024,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|ollama)"
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

impl LlmConfig {
    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.model)
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

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(vision_model) = llm.vision_model {
                self.llm.vision_model = Some(vision_model);
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_turns) = agent.max_turns {
                self.agent.max_turns = max_turns;
            }
            if let Some(decision_timeout_secs) = agent.decision_timeout_secs {
                self.agent.decision_timeout_secs = decision_timeout_secs;
            }
            if let Some(tool_timeout_secs) = agent.tool_timeout_secs {
                self.agent.tool_timeout_secs = tool_timeout_secs;
            }
            if let Some(enforce) = agent.enforce_duplicate_notification {
                self.agent.enforce_duplicate_notification = enforce;
            }
        }

        if let Some(notification) = patch.notification {
            if let Some(enabled) = notification.enabled {
                self.notification.enabled = enabled;
            }
            if let Some(webhook_url) = notification.webhook_url {
                self.notification.webhook_url = Some(webhook_url);
            }
            if let Some(webhook_token_value) = notification.webhook_token {
                self.notification.webhook_token = Some(secret_value(webhook_token_value));
            }
            if let Some(sender) = notification.sender {
                self.notification.sender = sender;
            }
            if let Some(recipient) = notification.recipient {
                self.notification.recipient = Some(recipient);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(upload_dir) = server.upload_dir {
                self.server.upload_dir = upload_dir;
            }
            if let Some(max_upload_bytes) = server.max_upload_bytes {
                self.server.max_upload_bytes = max_upload_bytes;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("IDGUARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("IDGUARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("IDGUARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("IDGUARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("IDGUARD_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("IDGUARD_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("IDGUARD_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("IDGUARD_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("IDGUARD_LLM_VISION_MODEL") {
            self.llm.vision_model = Some(value);
        }
        if let Some(value) = read_env("IDGUARD_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("IDGUARD_LLM_TIMEOUT_SECS", &value)?;
        }
        // Deployments that predate the IDGUARD_ prefix only export GOOGLE_API_KEY.
        if self.llm.api_key.is_none() && self.llm.provider == LlmProvider::Gemini {
            if let Some(value) = read_env("GOOGLE_API_KEY") {
                self.llm.api_key = Some(secret_value(value));
            }
        }

        if let Some(value) = read_env("IDGUARD_AGENT_MAX_TURNS") {
            self.agent.max_turns = parse_u32("IDGUARD_AGENT_MAX_TURNS", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_AGENT_DECISION_TIMEOUT_SECS") {
            self.agent.decision_timeout_secs =
                parse_u64("IDGUARD_AGENT_DECISION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_AGENT_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs = parse_u64("IDGUARD_AGENT_TOOL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_AGENT_ENFORCE_DUPLICATE_NOTIFICATION") {
            self.agent.enforce_duplicate_notification =
                parse_bool("IDGUARD_AGENT_ENFORCE_DUPLICATE_NOTIFICATION", &value)?;
        }

        if let Some(value) = read_env("IDGUARD_NOTIFICATION_ENABLED") {
            self.notification.enabled = parse_bool("IDGUARD_NOTIFICATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_NOTIFICATION_WEBHOOK_URL") {
            self.notification.webhook_url = Some(value);
        }
        if let Some(value) = read_env("IDGUARD_NOTIFICATION_WEBHOOK_TOKEN") {
            self.notification.webhook_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("IDGUARD_NOTIFICATION_SENDER") {
            self.notification.sender = value;
        }
        if let Some(value) = read_env("IDGUARD_NOTIFICATION_RECIPIENT") {
            self.notification.recipient = Some(value);
        }

        if let Some(value) = read_env("IDGUARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("IDGUARD_SERVER_PORT") {
            self.server.port = parse_u16("IDGUARD_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_SERVER_UPLOAD_DIR") {
            self.server.upload_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("IDGUARD_SERVER_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_usize("IDGUARD_SERVER_MAX_UPLOAD_BYTES", &value)?;
        }
        if let Some(value) = read_env("IDGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("IDGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("IDGUARD_LOGGING_LEVEL").or_else(|| read_env("IDGUARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("IDGUARD_LOGGING_FORMAT").or_else(|| read_env("IDGUARD_LOG_FORMAT"));
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
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(max_turns) = overrides.max_turns {
            self.agent.max_turns = max_turns;
        }
        if let Some(webhook_url) = overrides.notification_webhook_url {
            self.notification.webhook_url = Some(webhook_url);
        }
        if let Some(recipient) = overrides.notification_recipient {
            self.notification.recipient = Some(recipient);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_notification(&self.notification)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config/idguard.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::Gemini | LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for gemini/openai providers (set IDGUARD_LLM_API_KEY or GOOGLE_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_turns == 0 || agent.max_turns > 64 {
        return Err(ConfigError::Validation("agent.max_turns must be in range 1..=64".to_string()));
    }

    if agent.decision_timeout_secs == 0 || agent.decision_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agent.decision_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if agent.tool_timeout_secs == 0 || agent.tool_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "agent.tool_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_notification(notification: &NotificationConfig) -> Result<(), ConfigError> {
    if notification.enabled {
        let webhook_url = notification.webhook_url.as_deref().map(str::trim).unwrap_or("");
        if webhook_url.is_empty() {
            return Err(ConfigError::Validation(
                "notification.enabled is true but notification.webhook_url is not set".to_string(),
            ));
        }

        let has_recipient =
            notification.recipient.as_ref().map(|value| !value.trim().is_empty()).unwrap_or(false);
        if !has_recipient {
            return Err(ConfigError::Validation(
                "notification.enabled is true but notification.recipient is not set".to_string(),
            ));
        }
    }

    if let Some(webhook_url) = &notification.webhook_url {
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notification.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.max_upload_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max_upload_bytes must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    notification: Option<NotificationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    vision_model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_turns: Option<u32>,
    decision_timeout_secs: Option<u64>,
    tool_timeout_secs: Option<u64>,
    enforce_duplicate_notification: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    enabled: Option<bool>,
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    upload_dir: Option<PathBuf>,
    max_upload_bytes: Option<usize>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
