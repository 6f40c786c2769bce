//! TOML configuration with environment-free defaults and startup/rehash
//! validation, following the existing daemon's `Config::load_from_file` /
//! `validate` split (ambient stack, SPEC_FULL §10).

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    pub listeners: ListenersSection,
    pub limits: LimitsSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub channel: ChannelSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Server name, used as the source of server-originated lines and in
    /// `RPL_MYINFO`/`RPL_ISUPPORT`.
    pub name: String,
    pub motd: Option<String>,
    pub admin: AdminInfo,
    #[serde(default = "default_registration_timeout_seconds")]
    pub registration_timeout_seconds: u64,
    #[serde(default = "default_shutdown_delay_seconds")]
    pub shutdown_delay_seconds: u64,
}

fn default_registration_timeout_seconds() -> u64 {
    60
}

fn default_shutdown_delay_seconds() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminInfo {
    pub location1: String,
    pub location2: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenersSection {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_recvq_bytes")]
    pub recvq_bytes: usize,
    #[serde(default = "default_sendq_bytes")]
    pub sendq_bytes: usize,
    /// Flood meter threshold in bytes/second (component D feed_line).
    #[serde(default = "default_flood_bytes_per_second")]
    pub flood_bytes_per_second: f64,
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
    #[serde(default = "default_ping_timeout_seconds")]
    pub ping_timeout_seconds: u64,
    #[serde(default = "default_ban_list_cap")]
    pub ban_list_cap: usize,
    #[serde(default = "default_max_mode_changes")]
    pub max_mode_changes_per_line: usize,
}

fn default_max_connections() -> usize {
    65_535
}
fn default_recvq_bytes() -> usize {
    64 * 1024
}
fn default_sendq_bytes() -> usize {
    1024 * 1024
}
fn default_flood_bytes_per_second() -> f64 {
    10_240.0
}
fn default_ping_interval_seconds() -> u64 {
    90
}
fn default_ping_timeout_seconds() -> u64 {
    30
}
fn default_ban_list_cap() -> usize {
    100
}
fn default_max_mode_changes() -> usize {
    irc_proto::mode::DEFAULT_MAX_MODE_CHANGES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecuritySection {
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub name: String,
    pub password_hash: String,
    /// `nick!user@host` restriction; `OPER` only succeeds from a matching
    /// source (component A mask matching).
    pub hostmask: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSection {
    #[serde(default = "default_channel_prefixes")]
    pub prefixes: String,
    #[serde(default = "default_mode_prefixes")]
    pub mode_prefixes: String,
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            prefixes: default_channel_prefixes(),
            mode_prefixes: default_mode_prefixes(),
        }
    }
}

fn default_channel_prefixes() -> String {
    "#".to_string()
}
fn default_mode_prefixes() -> String {
    "~&@%+".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection {
                name: "rustircd".to_string(),
                motd: None,
                admin: AdminInfo {
                    location1: "Unconfigured server".to_string(),
                    location2: "Unconfigured".to_string(),
                    email: "admin@localhost".to_string(),
                },
                registration_timeout_seconds: default_registration_timeout_seconds(),
                shutdown_delay_seconds: default_shutdown_delay_seconds(),
            },
            listeners: ListenersSection {
                bind: "127.0.0.1:6667".to_string(),
            },
            limits: LimitsSection {
                max_connections: default_max_connections(),
                recvq_bytes: default_recvq_bytes(),
                sendq_bytes: default_sendq_bytes(),
                flood_bytes_per_second: default_flood_bytes_per_second(),
                ping_interval_seconds: default_ping_interval_seconds(),
                ping_timeout_seconds: default_ping_timeout_seconds(),
                ban_list_cap: default_ban_list_cap(),
                max_mode_changes_per_line: default_max_mode_changes(),
            },
            logging: LoggingSection {
                level: "rustircd=info".to_string(),
                format: LogFormat::Compact,
            },
            security: SecuritySection::default(),
            channel: ChannelSection::default(),
        }
    }
}

impl Config {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            info!(?path, "loading configuration from file");
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            warn!(?path, "config file not found, using built-in defaults");
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Run at startup (fatal on error) and again on rehash (non-fatal; the
    /// caller retains the old config and reports the error to opers).
    pub fn validate(&self) -> Result<()> {
        self.listeners
            .bind
            .parse::<SocketAddr>()
            .context("invalid listener bind address")?;

        if self.limits.ping_timeout_seconds >= self.limits.ping_interval_seconds {
            return Err(anyhow!(
                "ping_timeout_seconds must be less than ping_interval_seconds"
            ));
        }
        if self.limits.ping_interval_seconds == 0 {
            return Err(anyhow!("ping_interval_seconds must be greater than 0"));
        }
        if self.limits.recvq_bytes == 0 || self.limits.sendq_bytes == 0 {
            return Err(anyhow!("recvq_bytes and sendq_bytes must be greater than 0"));
        }
        if self.channel.prefixes.is_empty() {
            return Err(anyhow!("channel.prefixes must not be empty"));
        }

        for (idx, oper) in self.security.operators.iter().enumerate() {
            if oper.name.is_empty() {
                return Err(anyhow!("security.operators[{idx}]: name cannot be empty"));
            }
            if !oper.password_hash.starts_with("$2") {
                return Err(anyhow!(
                    "security.operators[{idx}] ({}): password_hash must be bcrypt format",
                    oper.name
                ));
            }
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.listeners.bind.parse().context("invalid bind address")
    }
}
