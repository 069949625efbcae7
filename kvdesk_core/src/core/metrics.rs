//! Time-series history of connection telemetry.
//!
//! Samples are grouped in series keyed by `(connection_id, metric_name)`.
//! Each series sits behind its own lock, so recording for one connection
//! never waits on a reader of another, and the retention sweep only ever
//! holds one series at a time.
//!
//! Out-of-order samples are inserted at their sorted position (after any
//! samples with the same timestamp), so readers always see timestamps in
//! non-decreasing order.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::background::spawn_periodic;
use super::errors::CoreError;
use crate::utils::clock::now_millis;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// Samples older than this are dropped by the retention sweep.
pub const MAX_RETENTION_MS: i64 = 24 * HOUR_MS;

/// One immutable telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub connection_id: String,
    pub metric_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub value: f64,
}

/// The lookback windows callers may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricPeriod {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    TwentyFourHours,
}

impl MetricPeriod {
    pub const ALL: [MetricPeriod; 4] = [
        MetricPeriod::OneHour,
        MetricPeriod::SixHours,
        MetricPeriod::TwelveHours,
        MetricPeriod::TwentyFourHours,
    ];

    pub fn as_millis(self) -> i64 {
        match self {
            MetricPeriod::OneHour => HOUR_MS,
            MetricPeriod::SixHours => 6 * HOUR_MS,
            MetricPeriod::TwelveHours => 12 * HOUR_MS,
            MetricPeriod::TwentyFourHours => 24 * HOUR_MS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricPeriod::OneHour => "1h",
            MetricPeriod::SixHours => "6h",
            MetricPeriod::TwelveHours => "12h",
            MetricPeriod::TwentyFourHours => "24h",
        }
    }
}

impl FromStr for MetricPeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricPeriod::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| {
                CoreError::InvalidInput(format!(
                    "unsupported metric period '{s}', expected one of 1h, 6h, 12h, 24h"
                ))
            })
    }
}

impl fmt::Display for MetricPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    connection_id: String,
    metric_name: String,
}

type Series = Arc<RwLock<VecDeque<MetricSample>>>;

/// In-memory store of metric series with bounded retention.
#[derive(Debug, Default)]
pub struct MetricsHistoryStore {
    series: DashMap<SeriesKey, Series>,
}

impl MetricsHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, connection_id: &str, metric_name: &str) -> Option<Series> {
        let key = SeriesKey {
            connection_id: connection_id.to_string(),
            metric_name: metric_name.to_string(),
        };
        self.series.get(&key).map(|s| Arc::clone(s.value()))
    }

    /// Append one sample. Non-finite values and empty names are rejected.
    pub fn record_sample(
        &self,
        connection_id: &str,
        metric_name: &str,
        value: f64,
        timestamp: i64,
    ) -> Result<(), CoreError> {
        if connection_id.is_empty() || metric_name.is_empty() {
            return Err(CoreError::InvalidInput(
                "connection id and metric name are required".into(),
            ));
        }
        if !value.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "{metric_name}: value {value} is not finite"
            )));
        }

        let key = SeriesKey {
            connection_id: connection_id.to_string(),
            metric_name: metric_name.to_string(),
        };
        let series = Arc::clone(self.series.entry(key).or_default().value());
        let mut samples = series.write().unwrap_or_else(|e| e.into_inner());
        let sample = MetricSample {
            connection_id: connection_id.to_string(),
            metric_name: metric_name.to_string(),
            timestamp,
            value,
        };
        match samples.back() {
            Some(last) if last.timestamp > timestamp => {
                let at = samples.partition_point(|s| s.timestamp <= timestamp);
                debug!(
                    "Out-of-order sample for {}/{} at {} inserted at {}",
                    connection_id, metric_name, timestamp, at
                );
                samples.insert(at, sample);
            }
            _ => samples.push_back(sample),
        }
        Ok(())
    }

    /// Samples with `now_ms - period_ms <= timestamp <= now_ms`, oldest first.
    pub fn get_history_window(
        &self,
        connection_id: &str,
        metric_name: &str,
        period_ms: i64,
        now_ms: i64,
    ) -> Vec<MetricSample> {
        let Some(series) = self.series(connection_id, metric_name) else {
            return Vec::new();
        };
        let samples = series.read().unwrap_or_else(|e| e.into_inner());
        window(&samples, now_ms.saturating_sub(period_ms), now_ms)
    }

    /// History for one metric over one of the supported periods, up to now.
    pub fn get_history(
        &self,
        connection_id: &str,
        metric_name: &str,
        period: MetricPeriod,
    ) -> Vec<MetricSample> {
        self.get_history_window(connection_id, metric_name, period.as_millis(), now_millis())
    }

    /// Every tracked metric of one connection over the window.
    pub fn get_all_metrics_history_window(
        &self,
        connection_id: &str,
        period_ms: i64,
        now_ms: i64,
    ) -> BTreeMap<String, Vec<MetricSample>> {
        let matching: Vec<(String, Series)> = self
            .series
            .iter()
            .filter(|e| e.key().connection_id == connection_id)
            .map(|e| (e.key().metric_name.clone(), Arc::clone(e.value())))
            .collect();

        matching
            .into_iter()
            .map(|(name, series)| {
                let samples = series.read().unwrap_or_else(|e| e.into_inner());
                (name, window(&samples, now_ms.saturating_sub(period_ms), now_ms))
            })
            .collect()
    }

    pub fn get_all_metrics_history(
        &self,
        connection_id: &str,
        period: MetricPeriod,
    ) -> BTreeMap<String, Vec<MetricSample>> {
        self.get_all_metrics_history_window(connection_id, period.as_millis(), now_millis())
    }

    /// Metric names with at least one series for `connection_id`.
    pub fn tracked_metrics(&self, connection_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .series
            .iter()
            .filter(|e| e.key().connection_id == connection_id)
            .map(|e| e.key().metric_name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Drop every sample older than `now_ms - MAX_RETENTION_MS`, then drop
    /// series left empty. Returns the number of samples removed.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(MAX_RETENTION_MS);
        let snapshot: Vec<Series> = self.series.iter().map(|e| Arc::clone(e.value())).collect();

        let mut removed = 0;
        for series in snapshot {
            let mut samples = series.write().unwrap_or_else(|e| e.into_inner());
            let stale = samples.partition_point(|s| s.timestamp < cutoff);
            samples.drain(..stale);
            removed += stale;
        }

        // Only drop a series nobody else holds; writers need the shard lock
        // to get a handle, which `remove_if` holds while checking.
        let keys: Vec<SeriesKey> = self.series.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.series.remove_if(&key, |_, series| {
                Arc::strong_count(series) == 1
                    && series.read().map(|s| s.is_empty()).unwrap_or(false)
            });
        }
        removed
    }
}

fn window(samples: &VecDeque<MetricSample>, from: i64, to: i64) -> Vec<MetricSample> {
    let start = samples.partition_point(|s| s.timestamp < from);
    let end = samples.partition_point(|s| s.timestamp <= to);
    samples
        .range(start..end.max(start))
        .cloned()
        .collect()
}

/// Periodically prunes a [`MetricsHistoryStore`] to the retention window.
pub struct RetentionSweeper {
    store: Arc<MetricsHistoryStore>,
    period: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<MetricsHistoryStore>, period: Duration) -> Self {
        Self { store, period }
    }

    pub fn sweep_now(&self) -> usize {
        let removed = self.store.sweep(now_millis());
        if removed > 0 {
            info!("Retention sweep removed {} samples", removed);
        }
        removed
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.period;
        let sweeper = Arc::new(self);
        spawn_periodic("metrics retention sweeper", period, shutdown, move || {
            let sweeper = Arc::clone(&sweeper);
            async move {
                sweeper.sweep_now();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_parsing_accepts_only_the_fixed_windows() {
        assert_eq!("6h".parse::<MetricPeriod>().unwrap(), MetricPeriod::SixHours);
        assert_eq!(MetricPeriod::TwentyFourHours.as_millis(), MAX_RETENTION_MS);
        let err = "2h".parse::<MetricPeriod>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let store = MetricsHistoryStore::new();
        for ts in [100, 200, 300] {
            store.record_sample("c", "m", ts as f64, ts).unwrap();
        }
        let got: Vec<i64> = store
            .get_history_window("c", "m", 100, 300)
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(got, vec![200, 300]);
    }
}
