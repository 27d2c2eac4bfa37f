//! repowatch-core: backup repository health reconciliation
//!
//! - [`store`]: file-backed repository/user lists with a single-writer guard
//! - [`collector`]: inventory facts from the backup engine's commands
//! - [`reconcile`]: status and storage passes, alert deduplication
//! - [`notify`]: email and apprise alert channels

pub mod collector;
pub mod config;
pub mod error;
pub mod invoker;
pub mod model;
pub mod notify;
pub mod reconcile;
pub mod store;

pub use collector::{CollectError, Collector, ShellCollector};
pub use config::RepowatchConfig;
pub use error::{ReconcileError, Result};
pub use model::{AppriseMode, LastSaveFact, RepositoryRecord, StorageFact, UserRecord};
pub use notify::{ChannelOutcome, DispatchReport, NotificationDispatcher, Notifier};
pub use reconcile::{PassKind, PassOutcome, PassSummary, Reconciler, ReconcilerSettings};
pub use store::{ConfigStore, RecordKind, StoreError, WriteGuard};
