//! Bulk copy of a whole asset tree between two backends
//!
//! Every key under the source root is copied to the same relative key on the
//! destination. Failures are collected per key; a migration never stops early
//! because of one bad object, only because it was cancelled.

use crate::{StorageBackend, StorageError};
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Key recorded for failures of the listing itself rather than of one object
pub const LISTING_FAILURE_KEY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub key: String,
    pub reason: String,
}

/// Outcome of [`MigrationCoordinator::copy_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<MigrationFailure>,
    /// The run stopped early because it was cancelled
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration finished with {failed} of {total} keys failed")]
    PartialMigrationFailure { failed: usize, total: usize },

    #[error("migration cancelled after {copied} keys")]
    Cancelled { copied: usize },
}

impl MigrationReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    /// Turn a report into a `Result` for callers whose policy is all-or-nothing.
    pub fn ensure_complete(&self) -> Result<(), MigrationError> {
        if !self.failed.is_empty() {
            return Err(MigrationError::PartialMigrationFailure {
                failed: self.failed.len(),
                total: self.total(),
            });
        }
        if self.cancelled {
            return Err(MigrationError::Cancelled {
                copied: self.succeeded.len(),
            });
        }
        Ok(())
    }

    fn record_failure(&mut self, key: impl Into<String>, error: &StorageError) {
        let key = key.into();
        tracing::error!(key = %key, error = %error, "Failed to migrate object");
        self.failed.push(MigrationFailure {
            key,
            reason: error.to_string(),
        });
    }
}

/// Copies trees between backends; can be cancelled from another task.
#[derive(Debug, Default)]
pub struct MigrationCoordinator {
    cancel_flag: Arc<AtomicBool>,
}

impl MigrationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared flag; storing `true` stops the running copy before its next key.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Copy every key of `source` to `dest`.
    ///
    /// Never returns an error: per-key read/write failures and listing
    /// failures are recorded in the report and the walk continues.
    pub async fn copy_all(
        &self,
        source: &dyn StorageBackend,
        dest: &dyn StorageBackend,
    ) -> MigrationReport {
        tracing::info!(from = source.name(), to = dest.name(), "Starting migration");

        let mut report = MigrationReport::default();
        let mut keys = source.list("");

        while let Some(item) = keys.next().await {
            if self.is_cancelled() {
                tracing::warn!(copied = report.succeeded.len(), "Migration cancelled");
                report.cancelled = true;
                break;
            }

            let key = match item {
                Ok(key) => key,
                Err(e) => {
                    report.record_failure(LISTING_FAILURE_KEY, &e);
                    continue;
                }
            };

            let copied = match source.read(&key).await {
                Ok(data) => dest.write(&key, &data).await,
                Err(e) => Err(e),
            };
            match copied {
                Ok(()) => {
                    tracing::debug!(key = %key, "Migrated object");
                    report.succeeded.push(key);
                }
                Err(e) => report.record_failure(key, &e),
            }

            if report.total() % 100 == 0 {
                tracing::info!(
                    succeeded = report.succeeded.len(),
                    failed = report.failed.len(),
                    "Migration progress"
                );
            }
        }

        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled,
            "Migration finished"
        );
        report
    }
}
