use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use super::errors::CoreError;
use super::operations::{Operation, OperationHandle};
use super::session_manager::ConnectionHandle;
use crate::config::MAX_DELETE_BATCH;
use crate::connections::resp::RespValue;

/// Deletes every key matching a glob pattern, one `SCAN` batch at a time.
///
/// The cancel flag is checked before each batch, so a cancelled run stops
/// after at most the batch that was already in flight. On failure the
/// operation message carries the cursor to resume from.
pub struct BulkDelete {
    handle: Arc<ConnectionHandle>,
    pattern: String,
    batch_size: usize,
    start_cursor: String,
}

impl BulkDelete {
    pub fn new(
        handle: Arc<ConnectionHandle>,
        pattern: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self, CoreError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(CoreError::InvalidInput("delete pattern must not be empty".into()));
        }
        Ok(Self {
            handle,
            pattern,
            batch_size: batch_size.clamp(1, MAX_DELETE_BATCH),
            start_cursor: "0".into(),
        })
    }

    /// Continue a previous run from the cursor reported in its message.
    pub fn resume_from(mut self, cursor: impl Into<String>) -> Self {
        self.start_cursor = cursor.into();
        self
    }

    pub fn spawn(self, operation: OperationHandle) -> JoinHandle<Result<Operation, CoreError>> {
        tokio::spawn(async move { self.run(&operation).await })
    }

    /// Drive the deletion to completion, failure or cancellation and record
    /// the outcome on `operation`.
    pub async fn run(&self, operation: &OperationHandle) -> Result<Operation, CoreError> {
        info!(
            "Operation '{}': deleting keys matching '{}' on '{}'",
            operation.id(),
            self.pattern,
            self.handle.connection_id()
        );
        let mut cursor = self.start_cursor.clone();
        let mut deleted: u64 = 0;
        let mut unlink = true;

        loop {
            if operation.is_cancelled() {
                return operation.acknowledge_cancel(format!(
                    "cancelled after deleting {deleted} keys; resume from cursor {cursor}"
                ));
            }

            let (next, keys) = match self.scan(&cursor).await {
                Ok(batch) => batch,
                Err(e) => return self.give_up(operation, deleted, &cursor, e),
            };

            if !keys.is_empty() {
                match self.delete(&keys, &mut unlink).await {
                    Ok(n) => deleted += n,
                    Err(e) => return self.give_up(operation, deleted, &cursor, e),
                }
            }
            debug!(
                "Operation '{}': batch of {} keys, {} deleted so far",
                operation.id(),
                keys.len(),
                deleted
            );

            cursor = next;
            if cursor == "0" {
                return operation.complete(format!(
                    "deleted {deleted} keys matching '{}'",
                    self.pattern
                ));
            }
            operation.report_progress(format!("deleted {deleted} keys, cursor {cursor}"));
        }
    }

    fn give_up(
        &self,
        operation: &OperationHandle,
        deleted: u64,
        cursor: &str,
        err: CoreError,
    ) -> Result<Operation, CoreError> {
        warn!("Operation '{}' failed at cursor {}: {}", operation.id(), cursor, err);
        operation.fail(format!(
            "failed after deleting {deleted} keys: {err}; resume from cursor {cursor}"
        ))
    }

    async fn scan(&self, cursor: &str) -> Result<(String, Vec<String>), CoreError> {
        let args = [
            cursor.to_string(),
            "MATCH".into(),
            self.pattern.clone(),
            "COUNT".into(),
            self.batch_size.to_string(),
        ];
        let reply = self.handle.execute("SCAN", &args).await?;
        parse_scan_reply(reply)
    }

    /// `UNLINK`, falling back to `DEL` on servers that predate it.
    async fn delete(&self, keys: &[String], unlink: &mut bool) -> Result<u64, CoreError> {
        if *unlink {
            match self.handle.execute("UNLINK", keys).await {
                Ok(reply) => return Ok(reply.as_integer().unwrap_or(0).max(0) as u64),
                Err(CoreError::InvalidInput(msg)) if msg.to_ascii_lowercase().contains("unknown command") => {
                    debug!("UNLINK unsupported, falling back to DEL");
                    *unlink = false;
                }
                Err(e) => return Err(e),
            }
        }
        let reply = self.handle.execute("DEL", keys).await?;
        Ok(reply.as_integer().unwrap_or(0).max(0) as u64)
    }
}

/// `SCAN` answers `[cursor, [key, ...]]`.
pub fn parse_scan_reply(reply: RespValue) -> Result<(String, Vec<String>), CoreError> {
    let malformed = || CoreError::Unavailable("malformed SCAN reply".into());
    let RespValue::Array(Some(mut parts)) = reply else {
        return Err(malformed());
    };
    if parts.len() != 2 {
        return Err(malformed());
    }
    let keys = match parts.pop() {
        Some(RespValue::Array(Some(items))) => items
            .iter()
            .map(|k| k.as_text().ok_or_else(malformed))
            .collect::<Result<Vec<_>, _>>()?,
        Some(RespValue::Array(None)) => Vec::new(),
        _ => return Err(malformed()),
    };
    let cursor = parts.pop().and_then(|c| c.as_text()).ok_or_else(malformed)?;
    Ok((cursor, keys))
}
