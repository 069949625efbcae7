use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::background::spawn_periodic;
use super::errors::CoreError;

/// Lifecycle of a tracked operation. Every state but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        self != OperationStatus::Running
    }
}

/// Snapshot of one operation as returned by [`OperationTracker::poll_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: String,
    pub status: OperationStatus,
    pub message: String,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

struct Entry {
    operation: Operation,
    cancel_flag: Arc<AtomicBool>,
}

/// Registry of long-running bulk operations.
///
/// Updates to one entry happen under that entry's map shard lock, so a
/// concurrent `poll_status` never sees a half-applied transition.
#[derive(Clone)]
pub struct OperationTracker {
    entries: Arc<DashMap<String, Entry>>,
    retention: Duration,
}

/// A fresh random operation id.
pub fn new_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl OperationTracker {
    /// `retention` is how long a finished operation stays pollable.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            retention,
        }
    }

    /// Create a `running` entry and hand its execution side to the caller.
    pub fn register(&self, operation_id: &str) -> Result<OperationHandle, CoreError> {
        if operation_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("operation id must not be empty".into()));
        }
        let cancel_flag = Arc::new(AtomicBool::new(false));
        match self.entries.entry(operation_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CoreError::Conflict(format!(
                "operation '{operation_id}' already exists"
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    operation: Operation {
                        operation_id: operation_id.to_string(),
                        status: OperationStatus::Running,
                        message: String::new(),
                        cancelled: false,
                        started_at: Utc::now(),
                        finished_at: None,
                    },
                    cancel_flag: Arc::clone(&cancel_flag),
                });
                info!("Operation '{}' registered", operation_id);
                Ok(OperationHandle {
                    tracker: self.clone(),
                    operation_id: operation_id.to_string(),
                    cancel_flag,
                })
            }
        }
    }

    /// `running -> cancelled`. `NotFound` for unknown ids, `Conflict` once terminal.
    pub fn mark_cancelled(&self, operation_id: &str) -> Result<(), CoreError> {
        let mut entry = self
            .entries
            .get_mut(operation_id)
            .ok_or_else(|| CoreError::NotFound(format!("operation '{operation_id}'")))?;
        if entry.operation.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "operation '{}' is already {:?}",
                operation_id, entry.operation.status
            )));
        }
        entry.cancel_flag.store(true, Ordering::SeqCst);
        entry.operation.cancelled = true;
        entry.operation.status = OperationStatus::Cancelled;
        entry.operation.finished_at = Some(Utc::now());
        info!("Operation '{}' cancelled", operation_id);
        Ok(())
    }

    /// `NotFound` also covers operations already garbage-collected; treat
    /// that as "finished, outcome unknown".
    pub fn poll_status(&self, operation_id: &str) -> Result<Operation, CoreError> {
        self.entries
            .get(operation_id)
            .map(|e| e.operation.clone())
            .ok_or_else(|| CoreError::NotFound(format!("operation '{operation_id}'")))
    }

    pub fn list(&self) -> Vec<Operation> {
        let mut all: Vec<Operation> = self.entries.iter().map(|e| e.operation.clone()).collect();
        all.sort_by_key(|op| op.started_at);
        all
    }

    /// Drop terminal entries finished more than `retention` before `now`.
    pub fn collect_garbage_at(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let before = self.entries.len();
        self.entries.retain(|_, e| match e.operation.finished_at {
            Some(done) if e.operation.status.is_terminal() => now - done < retention,
            _ => true,
        });
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Collected {} finished operations", removed);
        }
        removed
    }

    pub fn collect_garbage(&self) -> usize {
        self.collect_garbage_at(Utc::now())
    }

    pub fn spawn_collector(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let tracker = self.clone();
        spawn_periodic("operation collector", period, shutdown, move || {
            let tracker = tracker.clone();
            async move {
                tracker.collect_garbage();
            }
        })
    }

    fn update(
        &self,
        operation_id: &str,
        apply: impl FnOnce(&mut Operation) -> Result<(), CoreError>,
    ) -> Result<Operation, CoreError> {
        let mut entry = self
            .entries
            .get_mut(operation_id)
            .ok_or_else(|| CoreError::NotFound(format!("operation '{operation_id}'")))?;
        apply(&mut entry.operation)?;
        Ok(entry.operation.clone())
    }
}

/// The executor's side of an operation: cancellation checks, progress and
/// the final outcome.
#[derive(Clone)]
pub struct OperationHandle {
    tracker: OperationTracker,
    operation_id: String,
    cancel_flag: Arc<AtomicBool>,
}

impl OperationHandle {
    pub fn id(&self) -> &str {
        &self.operation_id
    }

    /// Cheap enough to call once per batch.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    /// Replace the progress message. Allowed while running and after a
    /// cancellation, so partial progress stays visible.
    pub fn report_progress(&self, message: impl Into<String>) {
        let message = message.into();
        let result = self.tracker.update(&self.operation_id, |op| {
            match op.status {
                OperationStatus::Running | OperationStatus::Cancelled => {
                    op.message = message;
                }
                _ => {}
            }
            Ok(())
        });
        if let Err(e) = result {
            debug!("Progress for '{}' dropped: {}", self.operation_id, e);
        }
    }

    pub fn complete(&self, message: impl Into<String>) -> Result<Operation, CoreError> {
        self.finish(OperationStatus::Completed, message.into())
    }

    pub fn fail(&self, message: impl Into<String>) -> Result<Operation, CoreError> {
        self.finish(OperationStatus::Failed, message.into())
    }

    /// Record the final message of an operation that observed cancellation.
    pub fn acknowledge_cancel(&self, message: impl Into<String>) -> Result<Operation, CoreError> {
        self.finish(OperationStatus::Cancelled, message.into())
    }

    /// `running -> outcome`. If a cancellation won the race the status stays
    /// `cancelled` and only the message is updated.
    fn finish(&self, outcome: OperationStatus, message: String) -> Result<Operation, CoreError> {
        let operation = self.tracker.update(&self.operation_id, |op| match op.status {
            OperationStatus::Running => {
                op.status = outcome;
                op.cancelled = outcome == OperationStatus::Cancelled;
                op.message = message;
                op.finished_at = Some(Utc::now());
                Ok(())
            }
            OperationStatus::Cancelled => {
                op.message = message;
                Ok(())
            }
            done => Err(CoreError::Conflict(format!(
                "operation '{}' already {:?}",
                op.operation_id, done
            ))),
        })?;
        if operation.status == outcome {
            info!("Operation '{}' {:?}: {}", self.operation_id, outcome, operation.message);
        } else {
            warn!(
                "Operation '{}' finished as {:?} after cancellation: {}",
                self.operation_id, outcome, operation.message
            );
        }
        Ok(operation)
    }
}
