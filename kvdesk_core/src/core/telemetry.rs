use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::background::spawn_periodic;
use super::metrics::MetricsHistoryStore;
use super::session_manager::{ConnectionHandle, SessionConnectionManager};
use crate::utils::clock::now_millis;

/// `INFO` fields recorded on every sample, with their metric names.
pub const TRACKED_FIELDS: [(&str, &str); 10] = [
    ("used_memory", "usedMemory"),
    ("used_memory_rss", "usedMemoryRss"),
    ("connected_clients", "connectedClients"),
    ("blocked_clients", "blockedClients"),
    ("instantaneous_ops_per_sec", "opsPerSec"),
    ("keyspace_hits", "keyspaceHits"),
    ("keyspace_misses", "keyspaceMisses"),
    ("total_commands_processed", "totalCommandsProcessed"),
    ("expired_keys", "expiredKeys"),
    ("evicted_keys", "evictedKeys"),
];

/// Metric holding the sum of `keys=` over every `dbN` keyspace line.
pub const TOTAL_KEYS_METRIC: &str = "totalKeys";

/// Turn a flattened `INFO` map into `(metric, value)` pairs.
pub fn extract_metrics(info: &HashMap<String, String>) -> Vec<(&'static str, f64)> {
    let mut out: Vec<(&'static str, f64)> = TRACKED_FIELDS
        .iter()
        .filter_map(|(field, metric)| {
            info.get(*field)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .map(|v| (*metric, v))
        })
        .collect();

    let keyspace: Vec<f64> = info
        .iter()
        .filter(|(k, _)| k.strip_prefix("db").is_some_and(|n| n.parse::<u32>().is_ok()))
        .filter_map(|(_, v)| {
            v.split(',')
                .find_map(|kv| kv.strip_prefix("keys="))
                .and_then(|n| n.parse::<f64>().ok())
        })
        .collect();
    if !keyspace.is_empty() {
        out.push((TOTAL_KEYS_METRIC, keyspace.iter().sum()));
    }
    out
}

/// Samples live connections into a [`MetricsHistoryStore`].
#[derive(Clone)]
pub struct TelemetryPoller {
    sessions: SessionConnectionManager,
    store: Arc<MetricsHistoryStore>,
}

impl TelemetryPoller {
    pub fn new(sessions: SessionConnectionManager, store: Arc<MetricsHistoryStore>) -> Self {
        Self { sessions, store }
    }

    /// Record one sample of every tracked metric for `handle`.
    /// Returns how many metrics were stored.
    pub async fn sample(&self, handle: &ConnectionHandle) -> usize {
        let info = match handle.server_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("Telemetry for '{}' skipped: {}", handle.connection_id(), e);
                return 0;
            }
        };
        let at = now_millis();
        let mut stored = 0;
        for (metric, value) in extract_metrics(&info) {
            match self.store.record_sample(handle.connection_id(), metric, value, at) {
                Ok(()) => stored += 1,
                Err(e) => debug!("Dropped {} sample: {}", metric, e),
            }
        }
        stored
    }

    /// Sample every distinct live connection once.
    pub async fn poll_once(&self) -> usize {
        let mut stored = 0;
        for handle in self.sessions.live_connections().await {
            stored += self.sample(&handle).await;
        }
        stored
    }

    pub fn spawn(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let poller = self.clone();
        spawn_periodic("telemetry poller", period, shutdown, move || {
            let poller = poller.clone();
            async move {
                poller.poll_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_numeric_fields_and_sums_keyspace() {
        let info: HashMap<String, String> = [
            ("used_memory", "2048"),
            ("connected_clients", "3"),
            ("redis_version", "7.2.4"),
            ("db0", "keys=10,expires=1,avg_ttl=0"),
            ("db3", "keys=5,expires=0,avg_ttl=0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let mut metrics = extract_metrics(&info);
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        assert_eq!(
            metrics,
            vec![("connectedClients", 3.0), ("totalKeys", 15.0), ("usedMemory", 2048.0)]
        );
    }
}
