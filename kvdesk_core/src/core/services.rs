use std::sync::Arc;

use log::info;

use super::background::BackgroundTasks;
use super::metrics::{MetricsHistoryStore, RetentionSweeper};
use super::operations::OperationTracker;
use super::session_manager::SessionConnectionManager;
use super::telemetry::TelemetryPoller;
use crate::config::CoreConfig;
use crate::connections::{Connector, RedisConnector};
use crate::storage::credentials::CredentialVault;
use crate::storage::store::ConnectionProfileStore;

/// The process-wide stores, built once and shared by every request handler.
#[derive(Clone)]
pub struct Services {
    pub config: CoreConfig,
    pub profiles: Arc<ConnectionProfileStore>,
    pub sessions: SessionConnectionManager,
    pub metrics: Arc<MetricsHistoryStore>,
    pub operations: OperationTracker,
}

impl Services {
    pub fn new(
        config: CoreConfig,
        profiles: ConnectionProfileStore,
        connector: Arc<dyn Connector>,
        vault: Arc<dyn CredentialVault>,
    ) -> Self {
        let sessions = SessionConnectionManager::new(connector, vault, &config);
        let operations = OperationTracker::new(config.operation_retention());
        Self {
            profiles: Arc::new(profiles),
            sessions,
            metrics: Arc::new(MetricsHistoryStore::new()),
            operations,
            config,
        }
    }

    /// Services talking to real stores over TCP.
    pub fn with_redis(
        config: CoreConfig,
        profiles: ConnectionProfileStore,
        vault: Arc<dyn CredentialVault>,
    ) -> Self {
        let connector = Arc::new(RedisConnector::new(
            config.connect_timeout(),
            config.command_timeout(),
        ));
        Self::new(config, profiles, connector, vault)
    }

    pub fn telemetry(&self) -> TelemetryPoller {
        TelemetryPoller::new(self.sessions.clone(), Arc::clone(&self.metrics))
    }

    /// Start the idle reclaimer, retention sweeper, operation collector and
    /// telemetry poller on their configured intervals.
    pub fn start_background(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();
        tasks.push(
            self.sessions
                .spawn_reclaimer(self.config.session_sweep_interval(), tasks.shutdown_signal()),
        );
        tasks.push(
            RetentionSweeper::new(Arc::clone(&self.metrics), self.config.retention_sweep_interval())
                .spawn(tasks.shutdown_signal()),
        );
        tasks.push(
            self.operations
                .spawn_collector(self.config.operation_gc_interval(), tasks.shutdown_signal()),
        );
        tasks.push(
            self.telemetry()
                .spawn(self.config.sample_interval(), tasks.shutdown_signal()),
        );
        info!("Started {} background tasks", tasks.len());
        tasks
    }

    /// Stop background work and close every live connection.
    pub async fn shutdown(&self, tasks: BackgroundTasks) {
        tasks.shutdown().await;
        self.sessions.shutdown().await;
        info!("kvdesk services stopped");
    }
}
