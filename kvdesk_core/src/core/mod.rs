pub mod background;
pub mod bulk_delete;
pub mod errors;
pub mod metrics;
pub mod operations;
pub mod services;
pub mod session_manager;
pub mod telemetry;
