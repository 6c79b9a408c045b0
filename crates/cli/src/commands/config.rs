use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadwise_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One rendered setting: dotted key, display value, and its environment override.
struct Field {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

fn field(key: &'static str, value: impl Into<String>, env_key: &'static str) -> Field {
    Field { key, value: value.into(), env_key }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
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

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let api_key = config.llm.api_key.as_ref().map(|key| redact_secret(key.expose_secret()));
    let sites = if config.knowledge.sites.is_empty() {
        "<none>".to_string()
    } else {
        config.knowledge.sites.join(", ")
    };

    vec![
        field("database.url", config.database.url.clone(), "LEADWISE_DATABASE_URL"),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            "LEADWISE_DATABASE_MAX_CONNECTIONS",
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "LEADWISE_DATABASE_TIMEOUT_SECS",
        ),
        field("llm.provider", format!("{:?}", config.llm.provider), "LEADWISE_LLM_PROVIDER"),
        field("llm.model", config.llm.model.clone(), "LEADWISE_LLM_MODEL"),
        field(
            "llm.embedding_model",
            config.llm.embedding_model.clone(),
            "LEADWISE_LLM_EMBEDDING_MODEL",
        ),
        field(
            "llm.base_url",
            config.llm.effective_base_url().unwrap_or_else(|| "<unset>".to_string()),
            "LEADWISE_LLM_BASE_URL",
        ),
        field(
            "llm.api_key",
            api_key.unwrap_or_else(|| "<unset>".to_string()),
            "LEADWISE_LLM_API_KEY",
        ),
        field("knowledge.sites", sites, "LEADWISE_KNOWLEDGE_SITES"),
        field(
            "knowledge.max_depth",
            config.knowledge.max_depth.to_string(),
            "LEADWISE_KNOWLEDGE_MAX_DEPTH",
        ),
        field(
            "knowledge.min_pages",
            config.knowledge.min_pages.to_string(),
            "LEADWISE_KNOWLEDGE_MIN_PAGES",
        ),
        field("knowledge.top_k", config.knowledge.top_k.to_string(), "LEADWISE_KNOWLEDGE_TOP_K"),
        field(
            "escalation.cooldown_minutes",
            config.escalation.cooldown_minutes.to_string(),
            "LEADWISE_ESCALATION_COOLDOWN_MINUTES",
        ),
        field(
            "escalation.fallback_operator_chat_id",
            config
                .escalation
                .fallback_operator_chat_id
                .map(|chat_id| chat_id.to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            "LEADWISE_ESCALATION_FALLBACK_OPERATOR_CHAT_ID",
        ),
        field("logging.level", config.logging.level.clone(), "LEADWISE_LOGGING_LEVEL"),
        field("logging.format", format!("{:?}", config.logging.format), "LEADWISE_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadwise.toml"), PathBuf::from("config/leadwise.toml")]
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

/// Keeps a recognisable key prefix such as `sk-` and hides the rest.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
