#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use repowatch_core::collector::{CollectError, Collector};
use repowatch_core::config::StoreConfig;
use repowatch_core::invoker::InvokeError;
use repowatch_core::notify::{ChannelOutcome, DispatchReport, Notifier};
use repowatch_core::{
    ConfigStore, LastSaveFact, Reconciler, ReconcilerSettings, RepositoryRecord, StorageFact,
    UserRecord,
};
use tokio::sync::Notify;

/// Collector returning canned facts, optionally parked until released
#[derive(Default)]
pub struct FakeCollector {
    pub last_saves: Mutex<Vec<LastSaveFact>>,
    pub storage: Mutex<Vec<StorageFact>>,
    pub fail: Mutex<bool>,
    pub gate: Option<Gate>,
}

#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FakeCollector {
    pub fn with_last_saves(facts: Vec<LastSaveFact>) -> Self {
        Self {
            last_saves: Mutex::new(facts),
            ..Self::default()
        }
    }

    pub fn with_storage(facts: Vec<StorageFact>) -> Self {
        Self {
            storage: Mutex::new(facts),
            ..Self::default()
        }
    }

    pub fn set_last_saves(&self, facts: Vec<LastSaveFact>) {
        *self.last_saves.lock().unwrap() = facts;
    }

    async fn checkpoint(&self) -> Result<(), CollectError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if *self.fail.lock().unwrap() {
            return Err(CollectError::Invoke {
                program: "find".into(),
                source: InvokeError::NotFound("find".into()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Collector for FakeCollector {
    async fn collect_last_saves(&self) -> Result<Vec<LastSaveFact>, CollectError> {
        self.checkpoint().await?;
        Ok(self.last_saves.lock().unwrap().clone())
    }

    async fn collect_storage_usage(&self) -> Result<Vec<StorageFact>, CollectError> {
        self.checkpoint().await?;
        Ok(self.storage.lock().unwrap().clone())
    }
}

/// Notifier that records every dispatch call
#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, recipient: &UserRecord, aliases: &[String]) -> DispatchReport {
        self.calls
            .lock()
            .unwrap()
            .push((recipient.username.clone(), aliases.to_vec()));
        DispatchReport {
            email: ChannelOutcome::Sent,
            apprise: ChannelOutcome::Skipped("apprise alerts disabled".into()),
        }
    }
}

pub async fn open_store(dir: &std::path::Path) -> ConfigStore {
    ConfigStore::open(&StoreConfig::with_dir(dir)).await.unwrap()
}

pub fn reconciler(
    store: ConfigStore,
    collector: Arc<FakeCollector>,
    notifier: Arc<RecordingNotifier>,
) -> Reconciler {
    Reconciler::new(store, collector, notifier, ReconcilerSettings::default())
}

pub fn repo(name: &str, last_save: i64, alert: i64) -> RepositoryRecord {
    let mut repo = RepositoryRecord::new(name, format!("{}-alias", name));
    repo.last_save = last_save;
    repo.alert = alert;
    repo
}

pub fn last_save(name: &str, at: i64) -> LastSaveFact {
    LastSaveFact {
        repository_name: name.to_string(),
        last_save: at,
    }
}

pub fn operator() -> UserRecord {
    let mut user = UserRecord::new(0, "admin", "admin@example.com");
    user.email_alert = true;
    user
}
