//! Persisted records and per-pass collector facts.
//!
//! Field names follow the on-disk JSON (`repo.json`, `users.json`), which is
//! camelCase. Fields the core does not interpret are kept in `extra` so a
//! reconciliation pass never drops operator data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One managed backup repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryRecord {
    pub repository_name: String,
    #[serde(default)]
    pub alias: String,
    /// Unix seconds of the most recent backup, 0 if never seen.
    #[serde(default)]
    pub last_save: i64,
    /// Maximum staleness in seconds; 0 disables alerting.
    #[serde(default)]
    pub alert: i64,
    #[serde(default)]
    pub storage_used: u64,
    #[serde(default)]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_alert_send: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RepositoryRecord {
    pub fn new(repository_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            alias: alias.into(),
            last_save: 0,
            alert: 0,
            storage_used: 0,
            status: false,
            last_status_alert_send: None,
            extra: Map::new(),
        }
    }

    pub fn alerting_enabled(&self) -> bool {
        self.alert != 0
    }

    /// Health at `now`. Alerting opt-out (`alert == 0`) is always healthy.
    pub fn is_healthy_at(&self, now: i64) -> bool {
        !self.alerting_enabled() || now.saturating_sub(self.last_save) <= self.alert
    }
}

/// Delivery mode for the apprise channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppriseMode {
    /// Shell out to the `apprise` CLI.
    Package,
    /// POST to an apprise-api relay.
    Stateless,
    #[serde(other)]
    Unsupported,
}

impl AppriseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Stateless => "stateless",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Operator account with notification preferences.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email_alert: bool,
    #[serde(default)]
    pub apprise_alert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apprise_mode: Option<AppriseMode>,
    #[serde(default)]
    pub apprise_services: Vec<String>,
    #[serde(
        default,
        rename = "appriseStatelessURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub apprise_stateless_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Hand-written so the credential never reaches the logs.
impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("email_alert", &self.email_alert)
            .field("apprise_alert", &self.apprise_alert)
            .field("apprise_mode", &self.apprise_mode)
            .field("apprise_services", &self.apprise_services.len())
            .finish_non_exhaustive()
    }
}

impl UserRecord {
    pub fn new(id: u64, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
            password: None,
            roles: Vec::new(),
            email_alert: false,
            apprise_alert: false,
            apprise_mode: None,
            apprise_services: Vec::new(),
            apprise_stateless_url: None,
            extra: Map::new(),
        }
    }
}

/// Last backup time reported by the backup engine for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSaveFact {
    pub repository_name: String,
    pub last_save: i64,
}

/// Disk usage reported for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageFact {
    pub name: String,
    pub size: u64,
}
