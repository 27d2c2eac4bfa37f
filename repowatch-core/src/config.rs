use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default cooldown between two alerts for the same repository (25 hours).
pub const DEFAULT_ALERT_COOLDOWN_SECS: i64 = 90_000;

const DEFAULT_REPOS_ROOT: &str = "/home/borgwarehouse/repos";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config not found at {path:?}")]
    NotFound { path: PathBuf },

    #[error("Failed to read config file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to parse config file {path:?} (invalid TOML): {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration, loaded from `~/.repowatch/config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepowatchConfig {
    pub store: StoreConfig,
    pub collector: CollectorConfig,
    pub alerts: AlertsConfig,
    pub mail: MailConfig,
    pub apprise: AppriseConfig,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `repo.json` and `users.json`
    pub dir: PathBuf,
    /// Lock files older than this are considered abandoned
    pub stale_lock_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: RepowatchConfig::home().join("store"),
            stale_lock_secs: 3600,
            write_timeout_secs: 30,
        }
    }
}

impl StoreConfig {
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn stale_lock(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

/// Inventory commands run against the backup engine.
///
/// Each command is `[program, args...]`. Output is either a JSON array or
/// one `<value> <path>` pair per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub last_save_command: Vec<String>,
    pub storage_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        let owned = |args: &[&str]| args.iter().map(|s| s.to_string()).collect();
        Self {
            last_save_command: owned(&[
                "find",
                DEFAULT_REPOS_ROOT,
                "-mindepth",
                "2",
                "-maxdepth",
                "2",
                "-name",
                "integrity.*",
                "-printf",
                "%T@ %p\\n",
            ]),
            storage_command: owned(&[
                "find",
                DEFAULT_REPOS_ROOT,
                "-mindepth",
                "1",
                "-maxdepth",
                "1",
                "-type",
                "d",
                "-exec",
                "du",
                "-s",
                "--block-size=1",
                "{}",
                "+",
            ]),
            timeout_secs: 60,
        }
    }
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Minimum seconds between two alerts for the same repository
    pub cooldown_secs: i64,
    /// Username that receives alerts. When unset, the only user is used.
    pub recipient: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_ALERT_COOLDOWN_SECS,
            recipient: None,
        }
    }
}

/// External mail transport: a `sendmail` compatible program.
///
/// Called as `<program> -i -f <from> -- <recipient>` with the message on
/// stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub program: String,
    /// Sender mailbox, e.g. `Repowatch <repowatch@backup.example.org>`
    pub from: String,
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            program: "sendmail".to_string(),
            from: "repowatch@localhost".to_string(),
            timeout_secs: 30,
        }
    }
}

impl MailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppriseConfig {
    pub program: String,
    /// Applies to both the CLI and the stateless relay
    pub timeout_secs: u64,
}

impl Default for AppriseConfig {
    fn default() -> Self {
        Self {
            program: "apprise".to_string(),
            timeout_secs: 30,
        }
    }
}

impl AppriseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub cors_permissive: bool,
    /// Shared secret for the cron trigger endpoints (`CRONJOB_KEY`)
    pub cron_key: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3030".to_string(),
            cors_permissive: false,
            cron_key: None,
        }
    }
}

impl RepowatchConfig {
    /// Base directory: `$REPOWATCH_HOME` or `~/.repowatch`
    pub fn home() -> PathBuf {
        if let Ok(dir) = env::var("REPOWATCH_HOME") {
            return PathBuf::from(dir);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".repowatch")
    }

    pub fn default_path() -> PathBuf {
        Self::home().join("config.toml")
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, a missing default file
    /// yields the built-in defaults. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound {
                        path: path.to_path_buf(),
                    });
                }
                Self::from_file(path)?
            }
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    tracing::debug!(path = %default.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("REPOWATCH_STORE_DIR") {
            self.store.dir = PathBuf::from(dir);
        }
        if let Ok(key) = env::var("CRONJOB_KEY") {
            if !key.is_empty() {
                self.server.cron_key = Some(key);
            }
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Copy safe to print: the cron key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.server.cron_key.is_some() {
            copy.server.cron_key = Some("********".to_string());
        }
        copy
    }
}
