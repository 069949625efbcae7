use std::collections::HashMap;

use async_trait::async_trait;

use super::errors::ConnectionError;
use super::resp::RespValue;
use crate::storage::profile::ConnectionProfile;

/// A live client bound to one remote key-value store.
///
/// Implementations own their transport; the session manager only ever
/// reaches the store through this trait.
#[async_trait]
pub trait StoreClient: Send {
    /// `Ok(true)` when the server answered `PONG`.
    async fn ping(&mut self) -> Result<bool, ConnectionError>;

    async fn execute_command(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<RespValue, ConnectionError>;

    /// `INFO` flattened to `field -> value`.
    async fn server_info(&mut self) -> Result<HashMap<String, String>, ConnectionError>;

    /// Release the transport. Calling it twice must be harmless.
    async fn close(&mut self) -> Result<(), ConnectionError>;

    /// `true` once the transport signalled closure.
    fn is_closed(&self) -> bool;
}

/// Opens [`StoreClient`]s for connection profiles.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        password: Option<String>,
    ) -> Result<Box<dyn StoreClient>, ConnectionError>;
}

/// Parse the text body of an `INFO` reply.
///
/// Section headers (`# Memory`) and blank lines are skipped; keyspace lines
/// such as `db0:keys=1,expires=0` keep their raw value.
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
