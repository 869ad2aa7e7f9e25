use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use idguard_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// One reported setting: dotted key, rendered value and the env override.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(&setting, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", setting.key, setting.value));
    }

    CommandResult::success("config", lines.join("\n"))
}

/// Effective configuration with secrets redacted, for callers that want the
/// listing without the command envelope.
pub fn render(config: &AppConfig) -> Vec<String> {
    settings(config).into_iter().map(|setting| format!("{} = {}", setting.key, setting.value)).collect()
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    vec![
        Setting {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["IDGUARD_DATABASE_URL"],
        },
        Setting {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["IDGUARD_DATABASE_MAX_CONNECTIONS"],
        },
        Setting {
            key: "llm.provider",
            value: format!("{:?}", config.llm.provider),
            env_keys: &["IDGUARD_LLM_PROVIDER"],
        },
        Setting {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["IDGUARD_LLM_MODEL"],
        },
        Setting {
            key: "llm.vision_model",
            value: config.llm.vision_model.clone().unwrap_or_else(|| "<model>".to_string()),
            env_keys: &["IDGUARD_LLM_VISION_MODEL"],
        },
        Setting {
            key: "llm.base_url",
            value: config.llm.base_url.clone().unwrap_or_else(|| "<provider default>".to_string()),
            env_keys: &["IDGUARD_LLM_BASE_URL"],
        },
        Setting {
            key: "llm.api_key",
            value: redact(config.llm.api_key.as_ref()),
            env_keys: &["IDGUARD_LLM_API_KEY", "GOOGLE_API_KEY"],
        },
        Setting {
            key: "agent.max_turns",
            value: config.agent.max_turns.to_string(),
            env_keys: &["IDGUARD_AGENT_MAX_TURNS"],
        },
        Setting {
            key: "agent.decision_timeout_secs",
            value: config.agent.decision_timeout_secs.to_string(),
            env_keys: &["IDGUARD_AGENT_DECISION_TIMEOUT_SECS"],
        },
        Setting {
            key: "agent.tool_timeout_secs",
            value: config.agent.tool_timeout_secs.to_string(),
            env_keys: &["IDGUARD_AGENT_TOOL_TIMEOUT_SECS"],
        },
        Setting {
            key: "agent.enforce_duplicate_notification",
            value: config.agent.enforce_duplicate_notification.to_string(),
            env_keys: &["IDGUARD_AGENT_ENFORCE_DUPLICATE_NOTIFICATION"],
        },
        Setting {
            key: "notification.enabled",
            value: config.notification.enabled.to_string(),
            env_keys: &["IDGUARD_NOTIFICATION_ENABLED"],
        },
        Setting {
            key: "notification.webhook_url",
            value: config.notification.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["IDGUARD_NOTIFICATION_WEBHOOK_URL"],
        },
        Setting {
            key: "notification.webhook_token",
            value: redact(config.notification.webhook_token.as_ref()),
            env_keys: &["IDGUARD_NOTIFICATION_WEBHOOK_TOKEN"],
        },
        Setting {
            key: "notification.recipient",
            value: config.notification.recipient.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["IDGUARD_NOTIFICATION_RECIPIENT"],
        },
        Setting {
            key: "server.bind_address",
            value: format!("{}:{}", config.server.bind_address, config.server.port),
            env_keys: &["IDGUARD_SERVER_BIND_ADDRESS", "IDGUARD_SERVER_PORT"],
        },
        Setting {
            key: "server.upload_dir",
            value: config.server.upload_dir.display().to_string(),
            env_keys: &["IDGUARD_SERVER_UPLOAD_DIR"],
        },
        Setting {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["IDGUARD_LOGGING_LEVEL", "IDGUARD_LOG_LEVEL"],
        },
        Setting {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["IDGUARD_LOGGING_FORMAT", "IDGUARD_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(setting: &Setting, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = setting.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    // server.bind_address is reported with the port; either key counts.
    let in_file = |doc: &Value| match setting.key {
        "server.bind_address" => {
            contains_path(doc, "server.bind_address") || contains_path(doc, "server.port")
        }
        key => contains_path(doc, key),
    };
    if let (Some(doc), Some(path)) = (file_doc, file_path) {
        if in_file(doc) {
            return format!("file ({})", path.display());
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

fn redact(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().len()) {
        None => "<unset>".to_string(),
        Some(0) => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
