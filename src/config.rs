//! Configuration: defaults, JSON file, environment overrides

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables that override file settings
pub const ENV_SERVER: &str = "SMS_RELAY_SERVER";
pub const ENV_TOKEN: &str = "SMS_RELAY_TOKEN";
pub const ENV_POLL_MS: &str = "SMS_RELAY_POLL_MS";
pub const ENV_TIMEOUT_MS: &str = "SMS_RELAY_TIMEOUT_MS";

/// Single-segment SMS limit in characters
pub const SMS_SEGMENT_LIMIT: usize = 160;

/// All relay settings. Built once at startup and never mutated afterwards.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_address: String,
    pub auth_token: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_body_length_before_split: usize,
    pub dedup_retention_secs: u64,
    pub dedup_max_entries: usize,
    /// Re-send the acknowledgement for ids the dedup guard already knows
    pub reack_duplicates: bool,
    /// External program invoked as `<send_command> <to> <segment>`
    pub send_command: Option<PathBuf>,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "http://localhost:5000".to_string(),
            auth_token: String::new(),
            poll_interval_ms: 5000,
            request_timeout_ms: 5000,
            max_body_length_before_split: SMS_SEGMENT_LIMIT,
            dedup_retention_secs: 3600,
            dedup_max_entries: 10_000,
            reack_duplicates: true,
            send_command: None,
            dry_run: false,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_address", &self.server_address)
            .field("auth_token", &redact(&self.auth_token))
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field(
                "max_body_length_before_split",
                &self.max_body_length_before_split,
            )
            .field("dedup_retention_secs", &self.dedup_retention_secs)
            .field("dedup_max_entries", &self.dedup_max_entries)
            .field("reack_duplicates", &self.reack_duplicates)
            .field("send_command", &self.send_command)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Config {
    /// Create config for testing against a local server
    pub fn for_test(server_address: &str) -> Self {
        Self {
            server_address: server_address.to_string(),
            auth_token: "test-token".to_string(),
            poll_interval_ms: 100,
            request_timeout_ms: 1000,
            dedup_retention_secs: 60,
            ..Self::default()
        }
    }

    /// `~/.config/sms-relay/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/sms-relay/config.json"))
    }

    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load from an explicit path, or from the default path when it exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply `SMS_RELAY_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (used by tests)
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER) {
            self.server_address = server;
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.auth_token = token;
        }
        if let Some(ms) = lookup(ENV_POLL_MS) {
            self.poll_interval_ms = parse_ms(ENV_POLL_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            self.request_timeout_ms = parse_ms(ENV_TIMEOUT_MS, &ms)?;
        }
        Ok(())
    }

    /// Check invariants and normalize the server address.
    pub fn validate(mut self) -> Result<Self> {
        let trimmed = self.server_address.trim().trim_end_matches('/').to_string();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(Error::Config(format!(
                "server_address must start with http:// or https://, got '{}'",
                self.server_address
            )));
        }
        self.server_address = trimmed;

        if self.auth_token.trim().is_empty() {
            return Err(Error::Config("auth_token is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be > 0".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be > 0".to_string()));
        }
        if self.max_body_length_before_split == 0 {
            return Err(Error::Config(
                "max_body_length_before_split must be > 0".to_string(),
            ));
        }
        if self.dedup_retention() < self.poll_interval() {
            return Err(Error::Config(
                "dedup_retention_secs must cover at least one poll interval".to_string(),
            ));
        }
        if self.dedup_max_entries == 0 {
            return Err(Error::Config("dedup_max_entries must be > 0".to_string()));
        }
        Ok(self)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    /// Pretty JSON with the token redacted
    pub fn to_redacted_json(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.auth_token = redact(&self.auth_token);
        Ok(serde_json::to_string_pretty(&shown)?)
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number of milliseconds, got '{}'", key, value)))
}

fn redact(token: &str) -> String {
    if token.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}
