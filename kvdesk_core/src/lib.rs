pub mod config;
pub mod connections;
pub mod core;
pub mod storage;
pub mod utils;

// re‑export ergonomic entry points
pub use crate::config::CoreConfig;
pub use crate::core::bulk_delete::BulkDelete;
pub use crate::core::errors::CoreError;
pub use crate::core::metrics::{MetricPeriod, MetricSample, MetricsHistoryStore, RetentionSweeper};
pub use crate::core::operations::{
    new_operation_id, Operation, OperationHandle, OperationStatus, OperationTracker,
};
pub use crate::core::services::Services;
pub use crate::core::session_manager::{ConnectionHandle, SessionConnectionManager};
pub use crate::core::telemetry::TelemetryPoller;
pub use crate::storage::{ConnectionProfile, ConnectionProfileStore, ImportSummary};
