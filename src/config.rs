use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

use crate::chat;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Required environment variable is not set.
    MissingVar(&'static str),
    /// Environment variable is set but unusable.
    InvalidVar { name: &'static str, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::MissingVar(name) => write!(f, "environment variable {} is required", name),
            Self::InvalidVar { name, value } => {
                write!(f, "environment variable {} has invalid value '{}'", name, value)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Where tasks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// `tasks.db` in the data directory.
    Sqlite,
    /// Process memory only; tasks and reminders are lost on restart.
    Memory,
}

impl StorageKind {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    owner_id: u64,
    telegram_bot_token: String,
    /// Key for the chat-completions endpoint
    openai_api_key: String,
    /// Directory for state files (database, logs). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_storage")]
    storage: StorageKind,
    chat_model: Option<String>,
    chat_api_url: Option<String>,
    #[serde(default = "default_chat_timeout_secs")]
    chat_timeout_secs: u64,
    #[serde(default = "default_chat_max_retries")]
    chat_max_retries: u32,
}

fn default_storage() -> StorageKind {
    StorageKind::Sqlite
}

fn default_chat_timeout_secs() -> u64 {
    60
}

fn default_chat_max_retries() -> u32 {
    2
}

pub struct Config {
    /// The only user the bot answers.
    pub owner_id: UserId,
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    pub chat_model: String,
    pub chat_api_url: String,
    pub chat_timeout: Duration,
    pub chat_max_retries: u32,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        Self::from_file(file)
    }

    /// Build the config from `TELEGRAM_TOKEN`, `OPENAI_API_KEY`, `OWNER_ID`
    /// and the optional `TASKBOT_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let required = |name: &'static str| var(name).ok_or(ConfigError::MissingVar(name));

        let owner_raw = required("OWNER_ID")?;
        let owner_id = owner_raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidVar { name: "OWNER_ID", value: owner_raw.clone() })?;

        let storage = match var("TASKBOT_STORAGE") {
            Some(raw) => StorageKind::parse(&raw)
                .ok_or(ConfigError::InvalidVar { name: "TASKBOT_STORAGE", value: raw })?,
            None => default_storage(),
        };

        Self::from_file(ConfigFile {
            owner_id,
            telegram_bot_token: required("TELEGRAM_TOKEN")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            data_dir: var("TASKBOT_DATA_DIR"),
            storage,
            chat_model: None,
            chat_api_url: None,
            chat_timeout_secs: default_chat_timeout_secs(),
            chat_max_retries: default_chat_max_retries(),
        })
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        // Validate required fields
        if file.owner_id == 0 {
            return Err(ConfigError::Validation("owner_id must be a Telegram user ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.openai_api_key.trim().is_empty() {
            return Err(ConfigError::Validation("openai_api_key is required".into()));
        }
        if file.chat_timeout_secs == 0 {
            return Err(ConfigError::Validation("chat_timeout_secs must be positive".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            owner_id: UserId(file.owner_id),
            telegram_bot_token: file.telegram_bot_token,
            openai_api_key: file.openai_api_key,
            data_dir,
            storage: file.storage,
            chat_model: file.chat_model.unwrap_or_else(|| chat::DEFAULT_MODEL.to_string()),
            chat_api_url: file.chat_api_url.unwrap_or_else(|| chat::DEFAULT_API_URL.to_string()),
            chat_timeout: Duration::from_secs(file.chat_timeout_secs),
            chat_max_retries: file.chat_max_retries,
        })
    }

    /// Private chat with the owner; reminders go here.
    pub fn owner_chat(&self) -> ChatId {
        ChatId(self.owner_id.0 as i64)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("tasks.db")
    }
}
