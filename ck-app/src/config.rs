//! cooldown-keeper configuration loader.
//!
//! TOML file, then environment overrides, then validation.

use ck_channels::DISCORD_DEFAULT_INTENTS;
use ck_engine::{ActionSpec, AlreadyActiveDelivery, EngineSettings, default_actions};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MAZOKU_BOT_ID: &str = "1242388858897956906";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CooldownKeeperConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Empty means the built-in catalog.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

fn default_state_file() -> String {
    "~/.cooldown-keeper/state.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    /// Author id of the bot whose replies are observed.
    #[serde(default = "default_watched_bot_id")]
    pub watched_bot_id: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub admin_user_ids: Vec<String>,
    #[serde(default = "default_gateway_intents")]
    pub gateway_intents: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            watched_bot_id: default_watched_bot_id(),
            command_prefix: default_command_prefix(),
            admin_user_ids: Vec::new(),
            gateway_intents: default_gateway_intents(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_watched_bot_id() -> String {
    MAZOKU_BOT_ID.to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_gateway_intents() -> u64 {
    DISCORD_DEFAULT_INTENTS
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub already_active: AlreadyActiveDelivery,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Applied to every action in addition to its own signatures.
    #[serde(default)]
    pub failure_signatures: Vec<String>,
    /// 0 disables the periodic sweep.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_grace_seconds")]
    pub sweep_grace_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_signatures: Vec::new(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            sweep_grace_seconds: default_sweep_grace_seconds(),
        }
    }
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_sweep_grace_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Bearer token for mutating routes. Unset means mutating routes are refused.
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_bind_addr(),
            admin_token: None,
            timeout_seconds: default_http_timeout_seconds(),
            max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

impl CooldownKeeperConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = match path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    config_path = %path.display(),
                    "config file not found; using defaults and environment"
                );
                String::new()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        let mut cfg = Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("DISCORD_BOT_TOKEN").or_else(|| non_empty("DISCORD_TOKEN")) {
            self.discord.bot_token = v.trim().to_string();
        }
        if let Some(v) = non_empty("COOLDOWN_KEEPER_STATE_FILE") {
            self.general.state_file = v;
        }
        if let Some(v) = non_empty("COOLDOWN_KEEPER_ADMIN_TOKEN") {
            self.http.admin_token = Some(v.trim().to_string());
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.state_file.trim().is_empty() {
            return Err(anyhow::anyhow!("general.state_file is required"));
        }
        if self.discord.enabled && self.discord.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "discord.bot_token is required (or set DISCORD_BOT_TOKEN / DISCORD_TOKEN)"
            ));
        }
        if self.discord.watched_bot_id.trim().is_empty() {
            return Err(anyhow::anyhow!("discord.watched_bot_id is required"));
        }
        if self.discord.command_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("discord.command_prefix must not be empty"));
        }

        let mut seen = HashSet::new();
        for spec in &self.actions {
            let name = spec.name.as_str().trim();
            if name.is_empty() {
                return Err(anyhow::anyhow!("actions[].name is required"));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(anyhow::anyhow!("duplicate action name: {name}"));
            }
            if spec.display_name.trim().is_empty() {
                return Err(anyhow::anyhow!("actions.{name}.display_name is required"));
            }
            if spec.duration_seconds == 0 {
                return Err(anyhow::anyhow!("actions.{name}.duration_seconds must be > 0"));
            }
            if spec.triggers.is_empty() && spec.titles.is_empty() {
                return Err(anyhow::anyhow!(
                    "actions.{name} needs at least one trigger or title"
                ));
            }
        }

        if self.http.enabled {
            self.http_bind_addr()?;
            if self.http.timeout_seconds == 0 {
                return Err(anyhow::anyhow!("http.timeout_seconds must be > 0"));
            }
            if self.http.max_in_flight == 0 {
                return Err(anyhow::anyhow!("http.max_in_flight must be > 0"));
            }
        }
        Ok(())
    }

    pub fn http_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.http
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("http.bind_addr {:?}: {e}", self.http.bind_addr))
    }

    pub fn state_file_path(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.general.state_file)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.discord
            .admin_user_ids
            .iter()
            .any(|admin| admin.trim() == user_id)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let actions = if self.actions.is_empty() {
            default_actions()
        } else {
            self.actions.clone()
        };
        EngineSettings {
            actions,
            failure_signatures: self.engine.failure_signatures.clone(),
            already_active: self.notifications.already_active,
            sweep_interval: (self.engine.sweep_interval_seconds > 0)
                .then(|| Duration::from_secs(self.engine.sweep_interval_seconds)),
            sweep_grace: Duration::from_secs(self.engine.sweep_grace_seconds),
        }
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".cooldown-keeper").join("config.toml"))
}

pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen("~", &home, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = CooldownKeeperConfig::from_toml_str("").expect("parse");
        assert!(cfg.discord.enabled);
        assert_eq!(cfg.discord.watched_bot_id, MAZOKU_BOT_ID);
        assert_eq!(cfg.discord.command_prefix, "!");
        assert!(!cfg.http.enabled);
        let settings = cfg.engine_settings();
        assert_eq!(settings.actions.len(), 3);
        assert_eq!(settings.already_active, AlreadyActiveDelivery::Preferred);
        assert_eq!(settings.sweep_interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn parses_sections_and_custom_catalog() {
        let cfg = CooldownKeeperConfig::from_toml_str(
            r#"
            [discord]
            bot_token = "abc"
            admin_user_ids = ["42"]

            [notifications]
            already_active = "silent"

            [engine]
            failure_signatures = ["is on cooldown"]
            sweep_interval_seconds = 0

            [[actions]]
            name = "daily"
            display_name = "Daily"
            duration_seconds = 86400
            triggers = ["daily"]
            "#,
        )
        .expect("parse");
        assert!(cfg.is_admin("42"));
        assert!(!cfg.is_admin("7"));
        let settings = cfg.engine_settings();
        assert_eq!(settings.actions.len(), 1);
        assert_eq!(settings.actions[0].name.as_str(), "daily");
        assert_eq!(settings.already_active, AlreadyActiveDelivery::Silent);
        assert_eq!(settings.failure_signatures, vec!["is on cooldown".to_string()]);
        assert_eq!(settings.sweep_interval, None);
        cfg.validate().expect("valid");
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut cfg = CooldownKeeperConfig::from_toml_str("[discord]\nbot_token = \"file\"")
            .expect("parse");
        cfg.apply_env_overrides(env(&[
            ("DISCORD_TOKEN", " legacy "),
            ("COOLDOWN_KEEPER_STATE_FILE", "/tmp/state.json"),
            ("COOLDOWN_KEEPER_ADMIN_TOKEN", "secret"),
        ]));
        assert_eq!(cfg.discord.bot_token, "legacy");
        assert_eq!(cfg.general.state_file, "/tmp/state.json");
        assert_eq!(cfg.http.admin_token.as_deref(), Some("secret"));

        cfg.apply_env_overrides(env(&[("DISCORD_BOT_TOKEN", "primary"), ("DISCORD_TOKEN", "x")]));
        assert_eq!(cfg.discord.bot_token, "primary");
    }

    #[test]
    fn validation_rejects_bad_input() {
        let cfg = CooldownKeeperConfig::from_toml_str("").expect("parse");
        assert!(cfg.validate().is_err(), "missing token must fail");

        let cfg = CooldownKeeperConfig::from_toml_str(
            r#"
            [discord]
            bot_token = "abc"

            [[actions]]
            name = "a"
            display_name = "A"
            duration_seconds = 0
            triggers = ["a"]
            "#,
        )
        .expect("parse");
        assert!(cfg.validate().is_err(), "zero duration must fail");

        let cfg = CooldownKeeperConfig::from_toml_str(
            r#"
            [discord]
            bot_token = "abc"

            [http]
            enabled = true
            bind_addr = "not an address"
            "#,
        )
        .expect("parse");
        assert!(cfg.validate().is_err(), "bad bind addr must fail");
    }

    #[test]
    fn duplicate_action_names_are_rejected() {
        let cfg = CooldownKeeperConfig::from_toml_str(
            r#"
            [discord]
            enabled = false

            [[actions]]
            name = "summon"
            display_name = "Summon"
            duration_seconds = 10
            triggers = ["summon"]

            [[actions]]
            name = "Summon"
            display_name = "Summon again"
            duration_seconds = 10
            titles = ["Summon"]
            "#,
        )
        .expect("parse");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/state.json").expect("expand"),
            PathBuf::from("/var/lib/state.json")
        );
    }
}
