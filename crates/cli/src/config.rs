//! `helpdesk.toml` loading, environment overrides and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use helpdesk_storage::TicketType;
use helpdesk_workflow::{Role, StaticDirectory, SweepConfig, UserProfile};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("cannot read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) server: ServerConfig,
    #[serde(default)]
    pub(crate) storage: StorageConfig,
    #[serde(default)]
    pub(crate) sweep: SweepSection,
    #[serde(default)]
    pub(crate) notifications: NotificationConfig,
    #[serde(default)]
    pub(crate) log_level: Option<String>,
    #[serde(default)]
    pub(crate) users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ServerConfig {
    #[serde(default = "default_port")]
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    #[serde(default = "default_rate_limit")]
    pub(crate) rate_limit: u64,
    #[serde(default)]
    pub(crate) api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            rate_limit: default_rate_limit(),
            api_key: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StorageConfig {
    /// SQLite database the store persists to; several processes may share it.
    /// Absent: in-memory only.
    #[serde(default)]
    pub(crate) data_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SweepSection {
    /// Seconds between sweeps while serving. 0 disables the background sweep.
    #[serde(default = "default_interval")]
    pub(crate) interval_secs: u64,
    #[serde(default = "default_reminder_days")]
    pub(crate) reminder_days: Vec<i64>,
    #[serde(default = "default_auto_close_days")]
    pub(crate) auto_close_days: i64,
}

impl Default for SweepSection {
    fn default() -> Self {
        SweepSection {
            interval_secs: default_interval(),
            reminder_days: default_reminder_days(),
            auto_close_days: default_auto_close_days(),
        }
    }
}

fn default_interval() -> u64 {
    3600
}

fn default_reminder_days() -> Vec<i64> {
    SweepConfig::default().reminder_days
}

fn default_auto_close_days() -> i64 {
    SweepConfig::default().auto_close_days
}

impl SweepSection {
    pub(crate) fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            reminder_days: self.reminder_days.clone(),
            auto_close_days: self.auto_close_days,
        }
    }

    pub(crate) fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NotificationConfig {
    #[serde(default)]
    pub(crate) webhook_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub(crate) timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            webhook_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    5
}

/// A `[[users]]` entry. Role and specialization stay strings until
/// validation so that bad values are reported as config errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UserEntry {
    pub(crate) id: String,
    pub(crate) full_name: String,
    pub(crate) role: String,
    #[serde(default)]
    pub(crate) agency: Option<String>,
    #[serde(default)]
    pub(crate) specialization: Option<String>,
    #[serde(default = "default_active")]
    pub(crate) active: bool,
}

fn default_active() -> bool {
    true
}

impl Config {
    pub(crate) fn parse(text: &str, path: &Path) -> Result<Config, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path`, apply `HELPDESK_*` overrides from the process environment
    /// and validate.
    pub(crate) fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Config::parse(&text, path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(key) = lookup("HELPDESK_API_KEY").filter(|k| !k.is_empty()) {
            self.server.api_key = Some(key);
        }
        if let Some(raw) = lookup("HELPDESK_RATE_LIMIT") {
            self.server.rate_limit = raw.parse().map_err(|_| {
                ConfigError::Invalid(format!("HELPDESK_RATE_LIMIT '{}' is not a number", raw))
            })?;
        }
        if let Some(raw) = lookup("HELPDESK_PORT") {
            self.server.port = raw.parse().map_err(|_| {
                ConfigError::Invalid(format!("HELPDESK_PORT '{}' is not a port", raw))
            })?;
        }
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.directory()?;
        let days = &self.sweep.reminder_days;
        if days.iter().any(|d| *d <= 0) {
            return Err(ConfigError::Invalid(
                "sweep.reminder_days must be positive".into(),
            ));
        }
        if days.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(
                "sweep.reminder_days must be strictly increasing".into(),
            ));
        }
        if days.last().is_some_and(|d| *d >= self.sweep.auto_close_days) {
            return Err(ConfigError::Invalid(format!(
                "sweep.reminder_days must all be below auto_close_days ({})",
                self.sweep.auto_close_days
            )));
        }
        if self.server.rate_limit == 0 {
            return Err(ConfigError::Invalid("server.rate_limit must be > 0".into()));
        }
        Ok(())
    }

    /// Build the user directory from `[[users]]`.
    pub(crate) fn directory(&self) -> Result<StaticDirectory, ConfigError> {
        let mut seen = HashSet::new();
        let mut users = Vec::with_capacity(self.users.len());
        for entry in &self.users {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::Invalid("user with empty id".into()));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate user id '{}'",
                    entry.id
                )));
            }
            let role: Role = entry.role.parse().map_err(|e| {
                ConfigError::Invalid(format!("user '{}': {}", entry.id, e))
            })?;
            let specialization = match &entry.specialization {
                None => None,
                Some(_) if role != Role::Technician => {
                    return Err(ConfigError::Invalid(format!(
                        "user '{}': only technicians have a specialization",
                        entry.id
                    )))
                }
                Some(raw) => Some(raw.parse::<TicketType>().map_err(|e| {
                    ConfigError::Invalid(format!("user '{}': {}", entry.id, e))
                })?),
            };
            users.push(UserProfile {
                id: entry.id.clone(),
                full_name: entry.full_name.clone(),
                role,
                agency: entry.agency.clone(),
                specialization,
                active: entry.active,
            });
        }
        Ok(StaticDirectory::new(users))
    }
}
