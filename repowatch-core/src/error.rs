//! Outcome errors of a reconciliation pass.
//!
//! Lower layers keep their own structured errors (`StoreError`,
//! `CollectError`, ...); a pass folds them into the three cases callers act
//! on. Notification failures never appear here.
use thiserror::Error;

use crate::collector::CollectError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Another pass holds the store's write guard. Retry later.
    #[error("The check status service is already running")]
    ServiceBusy,

    /// The inventory command failed or produced unparsable output
    #[error("collection failed: {0}")]
    CollectionFailed(#[from] CollectError),

    /// Anything else during read, merge or persist
    #[error("internal failure: {reason}")]
    Internal { reason: String },
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Busy is the only condition a trigger should simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceBusy)
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Busy => Self::ServiceBusy,
            other => Self::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn busy_store_maps_to_service_busy() {
        let err: ReconcileError = StoreError::Busy.into();
        assert!(matches!(err, ReconcileError::ServiceBusy));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "The check status service is already running");
    }

    #[test]
    fn io_store_error_is_internal() {
        let err: ReconcileError = StoreError::Io {
            path: PathBuf::from("/srv/repo.json"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert!(matches!(err, ReconcileError::Internal { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("repo.json"));
    }
}
