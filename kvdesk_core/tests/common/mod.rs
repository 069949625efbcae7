#![allow(dead_code)]

pub mod fake_client;
pub mod resp_server;

use std::sync::Arc;

use kvdesk_core::storage::MemoryVault;
use kvdesk_core::{ConnectionProfile, CoreConfig, SessionConnectionManager};
use log::LevelFilter;

use fake_client::FakeStore;

/// Logs will appear only when you run with `-- --nocapture`
/// or when the test fails.
pub fn init_test_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn local_profile() -> ConnectionProfile {
    ConnectionProfile::new("local", "Local", "localhost", 6379)
}

/// A manager backed by `store`, with short deadlines.
pub fn manager_with(store: &FakeStore, config: CoreConfig) -> SessionConnectionManager {
    SessionConnectionManager::new(store.connector(), Arc::new(MemoryVault::new()), &config)
}

pub fn fast_config() -> CoreConfig {
    CoreConfig {
        connect_timeout_ms: 200,
        command_timeout_ms: 200,
        ..CoreConfig::default()
    }
}
