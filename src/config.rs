//! TOML configuration.
//!
//! ```toml
//! [store]
//! dir = "./data/stores"
//! history_size = 20
//!
//! [mailbox]
//! host = "imap.gmail.com"
//! port = 993
//! folder = "INBOX"
//! subject = "manoli_backup"
//! timeout_secs = 30
//! # account / secret may be set here or via RELAY_MAILBOX_ACCOUNT / RELAY_MAILBOX_SECRET
//!
//! [schedule]
//! interval_secs = 3600
//! run_on_start = true
//!
//! [query]
//! max_rows = 100
//! blocked_tables = ["usuarios"]
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ACCOUNT_ENV: &str = "RELAY_MAILBOX_ACCOUNT";
pub const SECRET_ENV: &str = "RELAY_MAILBOX_SECRET";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// How many run records are kept for status reporting.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_history_size() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailboxConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            folder: default_folder(),
            subject: default_subject(),
            account: None,
            secret: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "imap.gmail.com".to_string()
}
fn default_port() -> u16 {
    993
}
fn default_folder() -> String {
    "INBOX".to_string()
}
fn default_subject() -> String {
    "manoli_backup".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Account identifier and app-scoped secret for the mailbox.
#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl MailboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve credentials, preferring environment variables over the file.
    pub fn credentials(&self) -> Option<Credentials> {
        let account = std::env::var(ACCOUNT_ENV)
            .ok()
            .or_else(|| self.account.clone())
            .filter(|s| !s.is_empty())?;
        let secret = std::env::var(SECRET_ENV)
            .ok()
            .or_else(|| self.secret.clone())
            .filter(|s| !s.is_empty())?;
        Some(Credentials { account, secret })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: default_run_on_start(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_interval_secs() -> u64 {
    3600
}
fn default_run_on_start() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Tables that the passthrough query path refuses to touch.
    #[serde(default)]
    pub blocked_tables: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            blocked_tables: Vec::new(),
        }
    }
}

fn default_max_rows() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Config for local-only commands when no file is available.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig {
                dir: PathBuf::from("./data/stores"),
                history_size: default_history_size(),
            },
            mailbox: MailboxConfig::default(),
            schedule: ScheduleConfig::default(),
            query: QueryConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.store.history_size == 0 {
        anyhow::bail!("store.history_size must be >= 1");
    }
    if config.schedule.interval_secs == 0 {
        anyhow::bail!("schedule.interval_secs must be > 0");
    }
    if config.mailbox.timeout_secs == 0 {
        anyhow::bail!("mailbox.timeout_secs must be > 0");
    }
    if config.mailbox.subject.trim().is_empty() {
        anyhow::bail!("mailbox.subject must not be empty");
    }
    if config.query.max_rows == 0 {
        anyhow::bail!("query.max_rows must be >= 1");
    }
    Ok(())
}
