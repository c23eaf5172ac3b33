//! Daemon configuration.
//!
//! Read from `$XDG_CONFIG_HOME/ftm/config.toml` (or `FTM_CONFIG`). Every
//! field has a default, so a missing file is not an error. `FTM_SOCKET`
//! and `FTM_DATA_DIR` override the file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ftm_core::{ClientEnvironment, NotificationPermission, PlatformCapability};
use ftm_protocol::PushSubscription;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::server::DEFAULT_SOCKET_PATH;

pub const ENV_SOCKET: &str = "FTM_SOCKET";
pub const ENV_CONFIG: &str = "FTM_CONFIG";
pub const ENV_DATA_DIR: &str = "FTM_DATA_DIR";

const DB_FILE_NAME: &str = "ftm.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Full daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub tick_interval_ms: u64,
    pub watchdog_interval_secs: u64,
    /// Rewrite the running fast every N ticks.
    pub persist_every_ticks: u32,
    /// Maximum number of history entries kept; oldest are dropped.
    pub history_retention: usize,
    /// Entries returned when a client does not ask for a count.
    pub history_display: usize,
    pub notifications: NotificationConfig,
    pub relay: Option<RelayConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            data_dir: default_data_dir(),
            tick_interval_ms: 1_000,
            watchdog_interval_secs: 300,
            persist_every_ticks: 60,
            history_retention: 1_000,
            history_display: 5,
            notifications: NotificationConfig::default(),
            relay: None,
        }
    }
}

impl DaemonConfig {
    /// Loads the config file (if any) and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var_os(ENV_CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads a specific file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(socket) = env::var_os(ENV_SOCKET) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(dir) = env::var_os(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.watchdog_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "watchdog_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.persist_every_ticks == 0 {
            return Err(ConfigError::Invalid {
                field: "persist_every_ticks",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.history_retention == 0 {
            return Err(ConfigError::Invalid {
                field: "history_retention",
                reason: "must keep at least one entry".to_string(),
            });
        }
        if let Some(relay) = &self.relay {
            if !(relay.url.starts_with("http://") || relay.url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "relay.url",
                    reason: format!("expected an http(s) URL, got {:?}", relay.url),
                });
            }
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

/// How the daemon decides which notification platform it is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformSetting {
    /// Classify from `user_agent` and `standalone`.
    #[default]
    Auto,
    Standalone,
    BrowserTab,
    UnsupportedMobile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub platform: PlatformSetting,
    pub user_agent: Option<String>,
    pub standalone: bool,
    /// Permission outcome granted to the daemon's notification sink.
    pub permission: NotificationPermission,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            platform: PlatformSetting::Auto,
            user_agent: None,
            standalone: true,
            permission: NotificationPermission::Granted,
        }
    }
}

impl NotificationConfig {
    /// Resolves the capability once, at startup.
    pub fn capability(&self) -> PlatformCapability {
        match self.platform {
            PlatformSetting::Auto => PlatformCapability::detect(&ClientEnvironment::new(
                self.user_agent.clone().unwrap_or_default(),
                self.standalone,
            )),
            PlatformSetting::Standalone => PlatformCapability::Standalone,
            PlatformSetting::BrowserTab => PlatformCapability::BrowserTab,
            PlatformSetting::UnsupportedMobile => PlatformCapability::UnsupportedMobile,
        }
    }
}

/// Push relay server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Base URL, e.g. `http://localhost:3000`.
    pub url: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub p256dh: Option<String>,
    #[serde(default)]
    pub auth: Option<String>,
}

impl RelayConfig {
    /// The subscription to register, when all three parts are present.
    pub fn subscription(&self) -> Option<PushSubscription> {
        match (&self.endpoint, &self.p256dh, &self.auth) {
            (Some(endpoint), Some(p256dh), Some(auth)) => {
                Some(PushSubscription::new(endpoint, p256dh, auth))
            }
            _ => None,
        }
    }
}

/// `$XDG_CONFIG_HOME/ftm/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ftm")
        .join("config.toml")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ftm")
}

/// Directory for the PID and log files.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ftm")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.tick_interval_ms, 1_000);
        assert_eq!(config.watchdog_interval_secs, 300);
        assert_eq!(config.persist_every_ticks, 60);
        assert_eq!(config.history_retention, 1_000);
        assert_eq!(config.history_display, 5);
        assert!(config.relay.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
            history_retention = 50

            [notifications]
            platform = "browser_tab"
            permission = "denied"
            "#,
        )
        .unwrap();
        assert_eq!(config.history_retention, 50);
        assert_eq!(config.tick_interval_ms, 1_000);
        assert_eq!(config.notifications.capability(), PlatformCapability::BrowserTab);
        assert_eq!(config.notifications.permission, NotificationPermission::Denied);
    }

    #[test]
    fn test_auto_platform_detects_ios() {
        let config = DaemonConfig::from_toml(
            r#"
            [notifications]
            user_agent = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X)"
            standalone = false
            "#,
        )
        .unwrap();
        assert_eq!(
            config.notifications.capability(),
            PlatformCapability::UnsupportedMobile
        );
    }

    #[test]
    fn test_relay_subscription_requires_all_parts() {
        let mut relay = RelayConfig {
            url: "http://localhost:3000".to_string(),
            endpoint: Some("https://push.example/1".to_string()),
            p256dh: Some("key".to_string()),
            auth: None,
        };
        assert!(relay.subscription().is_none());
        relay.auth = Some("secret".to_string());
        assert!(relay.subscription().is_some());
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let config = DaemonConfig {
            tick_interval_ms: 0,
            ..DaemonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "tick_interval_ms", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_relay_url() {
        let config = DaemonConfig {
            relay: Some(RelayConfig {
                url: "localhost:3000".to_string(),
                endpoint: None,
                p256dh: None,
                auth: None,
            }),
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tick_interval_ms = \"fast\"").unwrap();
        assert!(matches!(
            DaemonConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
