//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use intake_sftp::{
    Credentials, HostKeyPolicy, PatternFilter, PipelineSettings, SftpSettings, SyncSettings,
};

/// Global configuration for intake
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sftp: SftpConfig,
    pub intake: IntakeConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub passphrase: Option<String>,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2222,
            user: "foo".to_string(),
            password: Some("pass".to_string()),
            private_key: None,
            passphrase: None,
            host_key_policy: HostKeyPolicy::AcceptUnknown,
            known_hosts: directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts")),
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub remote_directory: String,
    pub local_directory: PathBuf,
    pub file_pattern: String,
    pub poll_period_ms: u64,
    pub max_fetch_amount: usize,
    pub delete_remote_files: bool,
    pub namespace: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            remote_directory: "upload".to_string(),
            local_directory: PathBuf::from("sftp-inbound"),
            file_pattern: "*.txt".to_string(),
            poll_period_ms: 5000,
            max_fetch_amount: 1,
            delete_remote_files: false,
            namespace: "sftp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./intake-metadata.duckdb"),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./intake.toml (current directory)
    /// 2. ~/.config/intake/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("intake.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "intake") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sftp.host.trim().is_empty() {
            bail!("sftp.host must not be empty");
        }
        if self.sftp.port == 0 {
            bail!("sftp.port must be greater than 0");
        }
        if self.intake.poll_period_ms == 0 {
            bail!("intake.poll_period_ms must be greater than 0");
        }
        if self.intake.max_fetch_amount == 0 {
            bail!("intake.max_fetch_amount must be greater than 0");
        }
        if self.intake.namespace.is_empty() {
            bail!("intake.namespace must not be empty");
        }
        if self.queue.capacity == 0 {
            bail!("queue.capacity must be greater than 0");
        }
        if self.queue.workers == 0 {
            bail!("queue.workers must be greater than 0");
        }
        let pattern = &self.intake.file_pattern;
        PatternFilter::new(pattern)
            .with_context(|| format!("invalid intake.file_pattern {pattern:?}"))?;
        Ok(())
    }

    /// Connection settings; a private key takes precedence over a password.
    pub fn sftp_settings(&self) -> Result<SftpSettings> {
        let s = &self.sftp;
        let credentials = match (&s.private_key, &s.password) {
            (Some(path), _) => Credentials::PrivateKey {
                path: path.clone(),
                passphrase: s.passphrase.clone(),
            },
            (None, Some(password)) => Credentials::Password(password.clone()),
            (None, None) => bail!("either sftp.password or sftp.private_key must be set"),
        };
        Ok(SftpSettings {
            host: s.host.clone(),
            port: s.port,
            user: s.user.clone(),
            credentials,
            host_key_policy: s.host_key_policy,
            known_hosts: s.known_hosts.clone(),
            connect_timeout: Duration::from_secs(s.connect_timeout_secs),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            sync: SyncSettings {
                remote_directory: self.intake.remote_directory.clone(),
                local_directory: self.intake.local_directory.clone(),
                max_fetch_amount: self.intake.max_fetch_amount,
                delete_remote_files: self.intake.delete_remote_files,
            },
            file_pattern: self.intake.file_pattern.clone(),
            namespace: self.intake.namespace.clone(),
            poll_period: Duration::from_millis(self.intake.poll_period_ms),
            queue_capacity: self.queue.capacity,
            workers: self.queue.workers,
        }
    }
}
