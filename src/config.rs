use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub model: String,
    pub url: String,
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub direct: Option<DirectConfig>,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
    #[serde(default)]
    pub group: Option<GroupConfig>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub personality: PersonalityConfig,
    #[serde(default)]
    pub scheduled: Option<ScheduledConfig>,
}

/// The one-to-one partner conversation.
#[derive(Debug, Deserialize, Clone)]
pub struct DirectConfig {
    pub identity: String,
}

/// Operator channel: only messages you send yourself, carrying the prefix, are commands.
#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub identity: String,
    #[serde(default = "default_admin_prefix")]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroupConfig {
    #[serde(default = "default_mention")]
    pub mention: String,
    /// Dedicated number replies are sent to. Defaults to the mentioning sender.
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub personality_path: Option<PathBuf>,
}

/// Keys looked up in the personality file for each mode.
#[derive(Debug, Deserialize, Clone)]
pub struct PersonalityConfig {
    #[serde(default = "default_direct_key")]
    pub direct_key: String,
    #[serde(default = "default_admin_key")]
    pub admin_key: String,
    #[serde(default = "default_direct_key")]
    pub group_key: String,
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            direct_key: default_direct_key(),
            admin_key: default_admin_key(),
            group_key: default_direct_key(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduledConfig {
    pub identity: String,
    pub cron: String,
    #[serde(default = "default_scheduled_prompt")]
    pub prompt: String,
}

fn default_check_timeout_secs() -> u64 {
    15
}

fn default_admin_prefix() -> String {
    "@LLM".to_string()
}

fn default_mention() -> String {
    "@JARVIS".to_string()
}

fn default_direct_key() -> String {
    "girlfriend_personality".to_string()
}

fn default_admin_key() -> String {
    "admin_personality".to_string()
}

fn default_scheduled_prompt() -> String {
    "Generate a cute, sweet message for my girlfriend.".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("~/Library/Messages/chat.db")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("response_cache.json")
}

fn default_personality_path() -> PathBuf {
    PathBuf::from("personality.json")
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.model.trim().is_empty() {
            anyhow::bail!("[backend] model must not be empty");
        }
        if self.backend.url.trim().is_empty() {
            anyhow::bail!("[backend] url must not be empty");
        }
        if self.watched_class_count() == 0 {
            anyhow::bail!("Nothing to watch: configure at least one of [direct], [admin] or [group]");
        }
        if let Some(direct) = &self.direct {
            require_identity("direct", &direct.identity)?;
        }
        if let Some(admin) = &self.admin {
            require_identity("admin", &admin.identity)?;
            if admin.prefix.trim().is_empty() {
                anyhow::bail!("[admin] prefix must not be empty");
            }
        }
        if let Some(group) = &self.group {
            if group.mention.trim().is_empty() {
                anyhow::bail!("[group] mention must not be empty");
            }
            if let Some(reply_to) = &group.reply_to {
                require_identity("group", reply_to)?;
            }
        }
        if let Some(scheduled) = &self.scheduled {
            require_identity("scheduled", &scheduled.identity)?;
            if scheduled.cron.trim().is_empty() {
                anyhow::bail!("[scheduled] cron must not be empty");
            }
        }
        Ok(())
    }

    pub fn watched_class_count(&self) -> usize {
        [
            self.direct.is_some(),
            self.admin.is_some(),
            self.group.is_some(),
        ]
        .iter()
        .filter(|watched| **watched)
        .count()
    }

    /// Poll interval: explicit value, or 3s when several classes share the loop, 5s otherwise.
    pub fn poll_interval_secs(&self) -> u64 {
        self.relay
            .poll_interval_secs
            .unwrap_or(if self.watched_class_count() > 1 { 3 } else { 5 })
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(
            self.relay
                .database_path
                .as_deref()
                .unwrap_or(&default_database_path()),
        )
    }

    pub fn cache_path(&self) -> PathBuf {
        expand_home(
            self.relay
                .cache_path
                .as_deref()
                .unwrap_or(&default_cache_path()),
        )
    }

    pub fn personality_path(&self) -> PathBuf {
        expand_home(
            self.relay
                .personality_path
                .as_deref()
                .unwrap_or(&default_personality_path()),
        )
    }
}

fn require_identity(section: &str, identity: &str) -> Result<()> {
    if !identity.chars().any(|c| c.is_ascii_digit()) {
        anyhow::bail!(
            "[{}] identity '{}' must contain a phone number",
            section,
            identity
        );
    }
    Ok(())
}
