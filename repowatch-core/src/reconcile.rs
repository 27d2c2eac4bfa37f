//! Reconciliation passes
//!
//! A pass holds the store's write guard from start to finish:
//!
//! 1. take the guard (fails fast with `ServiceBusy`)
//! 2. read repositories, collect facts; nothing to check if either is empty
//! 3. merge facts by repository name, recompute health, pick due alerts
//! 4. write the whole list back
//! 5. dispatch one batched alert (status pass only)
//!
//! Repositories without a matching fact keep their last known state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::collector::{Collector, ShellCollector};
use crate::config::RepowatchConfig;
use crate::error::{ReconcileError, Result};
use crate::invoker::{CliInvoker, RealInvoker};
use crate::model::{LastSaveFact, RepositoryRecord, StorageFact, UserRecord};
use crate::notify::{AppriseClient, DispatchReport, NotificationDispatcher, Notifier, SendmailMailer};
use crate::store::{ConfigStore, WriteGuard};

/// Which pass to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Status,
    Storage,
}

impl PassKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Status => "Status",
            Self::Storage => "Storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Repository list or fact list was empty; the store was not touched
    NothingToCheck,
    Completed(PassSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Records that had a matching fact
    pub matched: usize,
    /// Aliases included in this pass's alert
    pub alerted: Vec<String>,
    pub dispatch: Option<DispatchReport>,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub cooldown_secs: i64,
    /// Username receiving alerts; `None` means "the only user"
    pub recipient: Option<String>,
    pub write_timeout: Duration,
}

impl ReconcilerSettings {
    pub fn from_config(config: &RepowatchConfig) -> Self {
        Self {
            cooldown_secs: config.alerts.cooldown_secs,
            recipient: config.alerts.recipient.clone(),
            write_timeout: config.store.write_timeout(),
        }
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&RepowatchConfig::default())
    }
}

/// Merged repository list plus the aliases due for an alert
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMerge {
    pub repositories: Vec<RepositoryRecord>,
    pub matched: usize,
    pub due_aliases: Vec<String>,
}

/// Apply last-save facts at `now` and mark repositories due for an alert.
///
/// Due repositories get `last_status_alert_send = now` right away so a slow
/// or repeated dispatch cannot produce a second alert inside the cooldown.
pub fn merge_last_saves(
    repositories: Vec<RepositoryRecord>,
    facts: &[LastSaveFact],
    now: i64,
    cooldown_secs: i64,
) -> StatusMerge {
    let mut index: HashMap<&str, i64> = HashMap::with_capacity(facts.len());
    for fact in facts {
        index
            .entry(fact.repository_name.as_str())
            .and_modify(|seen| *seen = (*seen).max(fact.last_save))
            .or_insert(fact.last_save);
    }

    let mut matched = 0;
    let mut due_aliases = Vec::new();

    let repositories = repositories
        .into_iter()
        .map(|mut repo| {
            let Some(&last_save) = index.get(repo.repository_name.as_str()) else {
                return repo;
            };
            matched += 1;
            repo.last_save = last_save;
            repo.status = repo.is_healthy_at(now);

            let cooled_down = repo
                .last_status_alert_send
                .map_or(true, |sent| now.saturating_sub(sent) > cooldown_secs);
            if !repo.status && repo.alerting_enabled() && cooled_down {
                repo.last_status_alert_send = Some(now);
                due_aliases.push(repo.alias.clone());
            }
            repo
        })
        .collect();

    StatusMerge {
        repositories,
        matched,
        due_aliases,
    }
}

/// Apply storage facts. Returns the merged list and the number matched.
pub fn merge_storage(
    repositories: Vec<RepositoryRecord>,
    facts: &[StorageFact],
) -> (Vec<RepositoryRecord>, usize) {
    let index: HashMap<&str, u64> = facts.iter().map(|f| (f.name.as_str(), f.size)).collect();
    let mut matched = 0;

    let merged = repositories
        .into_iter()
        .map(|mut repo| {
            if let Some(&size) = index.get(repo.repository_name.as_str()) {
                repo.storage_used = size;
                matched += 1;
            }
            repo
        })
        .collect();

    (merged, matched)
}

/// Pick the alert recipient from the user list.
pub fn select_recipient(users: Vec<UserRecord>, username: Option<&str>) -> Option<UserRecord> {
    match username {
        Some(name) => users.into_iter().find(|u| u.username == name),
        None if users.len() == 1 => users.into_iter().next(),
        None => None,
    }
}

pub struct Reconciler {
    store: ConfigStore,
    collector: Arc<dyn Collector>,
    notifier: Arc<dyn Notifier>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        store: ConfigStore,
        collector: Arc<dyn Collector>,
        notifier: Arc<dyn Notifier>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            collector,
            notifier,
            settings,
        }
    }

    /// Wire the shell collector and the real notification channels.
    pub fn from_config(config: &RepowatchConfig, store: ConfigStore) -> Self {
        let invoker: Arc<dyn CliInvoker> = Arc::new(RealInvoker);
        let collector = ShellCollector::new(invoker.clone(), config.collector.clone());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(SendmailMailer::new(&config.mail)),
            AppriseClient::new(invoker, config.apprise.clone()),
            config.mail.from.clone(),
        );

        Self::new(
            store,
            Arc::new(collector),
            Arc::new(dispatcher),
            ReconcilerSettings::from_config(config),
        )
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub async fn run(&self, kind: PassKind) -> Result<PassOutcome> {
        match kind {
            PassKind::Status => self.run_status().await,
            PassKind::Storage => self.run_storage().await,
        }
    }

    pub async fn run_status(&self) -> Result<PassOutcome> {
        self.run_status_at(Utc::now().timestamp()).await
    }

    /// Status pass evaluated at unix time `now`.
    #[tracing::instrument(name = "status_pass", skip(self))]
    pub async fn run_status_at(&self, now: i64) -> Result<PassOutcome> {
        let guard = self.store.try_lock().await?;

        let repositories = self.store.read_repositories().await?;
        if repositories.is_empty() {
            tracing::info!("no repositories registered, nothing to check");
            return Ok(PassOutcome::NothingToCheck);
        }

        let facts = self.collector.collect_last_saves().await.map_err(|e| {
            tracing::error!(error = %e, "last-save collection failed");
            e
        })?;
        if facts.is_empty() {
            tracing::info!("backup engine reported no repositories, nothing to check");
            return Ok(PassOutcome::NothingToCheck);
        }

        let total = repositories.len();
        let merge = merge_last_saves(repositories, &facts, now, self.settings.cooldown_secs);
        tracing::info!(
            repositories = total,
            facts = facts.len(),
            matched = merge.matched,
            unhealthy = merge.repositories.iter().filter(|r| !r.status).count(),
            due = merge.due_aliases.len(),
            "status merged"
        );

        self.persist(&guard, &merge.repositories).await?;

        let dispatch = if merge.due_aliases.is_empty() {
            None
        } else {
            self.dispatch(&merge.due_aliases).await
        };

        Ok(PassOutcome::Completed(PassSummary {
            matched: merge.matched,
            alerted: merge.due_aliases,
            dispatch,
        }))
    }

    #[tracing::instrument(name = "storage_pass", skip(self))]
    pub async fn run_storage(&self) -> Result<PassOutcome> {
        let guard = self.store.try_lock().await?;

        let repositories = self.store.read_repositories().await?;
        if repositories.is_empty() {
            tracing::info!("no repositories registered, nothing to check");
            return Ok(PassOutcome::NothingToCheck);
        }

        let facts = self.collector.collect_storage_usage().await.map_err(|e| {
            tracing::error!(error = %e, "storage collection failed");
            e
        })?;
        if facts.is_empty() {
            tracing::info!("backup engine reported no storage usage, nothing to check");
            return Ok(PassOutcome::NothingToCheck);
        }

        let (merged, matched) = merge_storage(repositories, &facts);
        tracing::info!(repositories = merged.len(), matched, "storage merged");

        self.persist(&guard, &merged).await?;

        Ok(PassOutcome::Completed(PassSummary {
            matched,
            ..PassSummary::default()
        }))
    }

    async fn persist(&self, guard: &WriteGuard, repositories: &[RepositoryRecord]) -> Result<()> {
        let timeout = self.settings.write_timeout;
        match tokio::time::timeout(timeout, guard.write(repositories)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ReconcileError::internal(format!(
                "store write timed out after {} seconds",
                timeout.as_secs()
            ))),
        }
    }

    /// Best effort: the store is already committed when this runs.
    async fn dispatch(&self, aliases: &[String]) -> Option<DispatchReport> {
        let users = match self.store.read_users().await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(error = %e, "could not read users, alert not sent");
                return None;
            }
        };

        let user_count = users.len();
        let Some(recipient) = select_recipient(users, self.settings.recipient.as_deref()) else {
            tracing::warn!(
                recipient = self.settings.recipient.as_deref().unwrap_or("<only user>"),
                users = user_count,
                "no alert recipient resolved, alert not sent"
            );
            return None;
        };

        tracing::info!(
            user = %recipient.username,
            repositories = ?aliases,
            "dispatching status alert"
        );
        Some(self.notifier.dispatch(&recipient, aliases).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str, last_save: i64, alert: i64) -> RepositoryRecord {
        let mut repo = RepositoryRecord::new(name, format!("{}-alias", name));
        repo.last_save = last_save;
        repo.alert = alert;
        repo
    }

    fn fact(name: &str, last_save: i64) -> LastSaveFact {
        LastSaveFact {
            repository_name: name.to_string(),
            last_save,
        }
    }

    #[test]
    fn stale_repository_is_due() {
        let merge = merge_last_saves(vec![repo("r1", 1000, 3600)], &[fact("r1", 1000)], 5000, 90_000);

        let r1 = &merge.repositories[0];
        assert!(!r1.status);
        assert_eq!(r1.last_status_alert_send, Some(5000));
        assert_eq!(merge.due_aliases, vec!["r1-alias"]);
    }

    #[test]
    fn fresh_repository_is_healthy() {
        let merge = merge_last_saves(vec![repo("r1", 0, 3600)], &[fact("r1", 4000)], 5000, 90_000);
        assert!(merge.repositories[0].status);
        assert_eq!(merge.repositories[0].last_save, 4000);
        assert!(merge.due_aliases.is_empty());
    }

    #[test]
    fn unmatched_repository_is_untouched() {
        let mut r2 = repo("r2", 10, 60);
        r2.status = true;
        let merge = merge_last_saves(vec![r2.clone()], &[fact("r1", 1)], 1_000_000, 90_000);
        assert_eq!(merge.repositories[0], r2);
        assert_eq!(merge.matched, 0);
    }

    #[test]
    fn alert_opt_out_never_alerts() {
        let merge = merge_last_saves(vec![repo("r1", 0, 0)], &[fact("r1", 0)], 10_000_000, 90_000);
        assert!(merge.repositories[0].status);
        assert!(merge.due_aliases.is_empty());
        assert_eq!(merge.repositories[0].last_status_alert_send, None);
    }

    #[test]
    fn cooldown_suppresses_repeat() {
        let mut r1 = repo("r1", 1000, 3600);
        r1.last_status_alert_send = Some(5000);

        let merge = merge_last_saves(vec![r1.clone()], &[fact("r1", 1000)], 5000 + 90_000, 90_000);
        assert!(merge.due_aliases.is_empty());
        assert_eq!(merge.repositories[0].last_status_alert_send, Some(5000));

        let merge = merge_last_saves(vec![r1], &[fact("r1", 1000)], 5000 + 90_001, 90_000);
        assert_eq!(merge.due_aliases, vec!["r1-alias"]);
    }

    #[test]
    fn corrupt_alert_stamp_does_not_overflow() {
        let mut r1 = repo("r1", 1000, 3600);
        r1.last_status_alert_send = Some(i64::MIN);
        let merge = merge_last_saves(vec![r1], &[fact("r1", i64::MIN)], 1_700_000_000, 90_000);
        assert!(!merge.repositories[0].status);
        assert_eq!(merge.due_aliases, vec!["r1-alias"]);

        let mut r1 = repo("r1", 1000, 3600);
        r1.last_status_alert_send = Some(i64::MAX);
        let merge = merge_last_saves(vec![r1], &[fact("r1", 1000)], 1_700_000_000, 90_000);
        assert!(merge.due_aliases.is_empty());
    }

    #[test]
    fn duplicate_facts_keep_latest() {
        let merge = merge_last_saves(
            vec![repo("r1", 0, 3600)],
            &[fact("r1", 100), fact("r1", 4900), fact("r1", 50)],
            5000,
            90_000,
        );
        assert_eq!(merge.repositories[0].last_save, 4900);
    }

    #[test]
    fn storage_merge_leaves_unmatched() {
        let repos = vec![repo("r1", 0, 0), repo("r2", 0, 0)];
        let facts = [StorageFact {
            name: "r1".into(),
            size: 100,
        }];
        let (merged, matched) = merge_storage(repos, &facts);
        assert_eq!(matched, 1);
        assert_eq!(merged[0].storage_used, 100);
        assert_eq!(merged[1].storage_used, 0);
    }

    #[test]
    fn recipient_is_explicit() {
        let users = vec![UserRecord::new(1, "ada", "a@x"), UserRecord::new(2, "bob", "b@x")];
        assert_eq!(select_recipient(users.clone(), Some("bob")).unwrap().id, 2);
        assert!(select_recipient(users.clone(), Some("eve")).is_none());
        assert!(select_recipient(users, None).is_none());

        let single = vec![UserRecord::new(7, "ada", "a@x")];
        assert_eq!(select_recipient(single, None).unwrap().id, 7);
        assert!(select_recipient(Vec::new(), None).is_none());
    }
}
