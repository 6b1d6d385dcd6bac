//! Layered application configuration.
//!
//! Built-in defaults are overridden by a TOML file and then by environment
//! variables prefixed with `DESKBOT_` (`__` separates nested keys, e.g.
//! `DESKBOT_TELEGRAM__BOT_TOKEN`).

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::tickets::{Category, TransitionPolicy};

pub const DEFAULT_CONFIG_FILE: &str = "deskbot.toml";
pub const ENV_PREFIX: &str = "DESKBOT_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub intake: IntakeConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    Polling,
    Webhook,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_url: String,
    /// The administrator identity: ticket cards, actions and reports live in this chat.
    pub admin_chat_id: i64,
    pub mode: TransportMode,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: "https://api.telegram.org".to_string(),
            admin_chat_id: 0,
            mode: TransportMode::default(),
            webhook_url: None,
            webhook_secret: None,
            poll_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_token: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "requests.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryLabels {
    pub incident: String,
    pub procurement: String,
}

impl Default for CategoryLabels {
    fn default() -> Self {
        Self {
            incident: "🛠 Incident".to_string(),
            procurement: "🛒 Procurement".to_string(),
        }
    }
}

impl CategoryLabels {
    pub fn label(&self, category: Category) -> &str {
        match category {
            Category::Incident => &self.incident,
            Category::Procurement => &self.procurement,
        }
    }

    pub fn parse(&self, input: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|category| self.label(*category) == input)
    }

    pub fn labels(&self) -> Vec<String> {
        Category::ALL
            .iter()
            .map(|category| self.label(*category).to_string())
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub categories: CategoryLabels,
    pub departments: Vec<String>,
    pub attach_label: String,
    pub skip_label: String,
    /// Abandoned drafts expire after this many seconds; unset keeps them forever.
    pub draft_ttl_secs: Option<u64>,
    pub transition_policy: TransitionPolicy,
    pub description_preview_chars: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            categories: CategoryLabels::default(),
            departments: ["IT", "Accounting", "HR", "Marketing", "Sales", "Other"]
                .into_iter()
                .map(String::from)
                .collect(),
            attach_label: "📎 Attach photo".to_string(),
            skip_label: "➡️ Skip".to_string(),
            draft_ttl_secs: None,
            transition_policy: TransitionPolicy::default(),
            description_preview_chars: 100,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Loads defaults, then `path` (or `deskbot.toml` when present), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid("telegram.bot_token is empty".into()));
        }
        if self.telegram.admin_chat_id == 0 {
            return Err(ConfigError::Invalid("telegram.admin_chat_id is not set".into()));
        }
        if self.telegram.mode == TransportMode::Webhook {
            if self.telegram.webhook_url.is_none() {
                return Err(ConfigError::Invalid(
                    "telegram.webhook_url is required in webhook mode".into(),
                ));
            }
            let secret = self.telegram.webhook_secret.as_deref().unwrap_or_default();
            if secret.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "telegram.webhook_secret is required in webhook mode".into(),
                ));
            }
        }
        if self.intake.departments.is_empty() {
            return Err(ConfigError::Invalid("intake.departments is empty".into()));
        }
        let labels = &self.intake.categories;
        if labels.incident == labels.procurement {
            return Err(ConfigError::Invalid(
                "intake.categories labels must differ".into(),
            ));
        }
        if self.intake.attach_label == self.intake.skip_label {
            return Err(ConfigError::Invalid(
                "intake.attach_label and intake.skip_label must differ".into(),
            ));
        }
        Ok(())
    }
}
