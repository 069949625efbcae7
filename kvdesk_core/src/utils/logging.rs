use log::LevelFilter;

/// Initialize logging using env_logger.
/// By default, this reads the RUST_LOG environment variable for filtering
/// and falls back to `info`,
/// e.g. `RUST_LOG=kvdesk_core=debug kvdesk monitor --profile local`.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}
