use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisResult};
use tokio::time::{error::Elapsed, timeout};

use super::client::{parse_info, Connector, StoreClient};
use super::errors::ConnectionError;
use super::resp::RespValue;
use crate::storage::profile::ConnectionProfile;

/// A store client over a `redis` multiplexed connection.
///
/// Each command is bounded by `command_timeout`. Replies are matched to
/// requests by the multiplexer, so a command abandoned at its deadline never
/// hands its late reply to the next one. A dropped transport marks the
/// client closed.
pub struct RedisConnection {
    addr: String,
    command_timeout: Duration,
    connection: Option<MultiplexedConnection>,
}

impl RedisConnection {
    /// Connect to `host:port`, authenticating when a password is given.
    pub async fn open(
        host: &str,
        port: u16,
        password: Option<&str>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let addr = format!("{}:{}", host, port);
        info!("Connecting to key-value store at {}", addr);

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_string(), port),
            redis: RedisConnectionInfo {
                password: password.filter(|p| !p.is_empty()).map(str::to_string),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)?;
        let connection = timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| ConnectionError::Timeout(format!("connect to {addr}")))?
            .map_err(|e| match ConnectionError::from(e) {
                // Errors replied during the handshake come from AUTH.
                ConnectionError::Server(msg) => ConnectionError::Auth(msg),
                other => other,
            })?;
        debug!("Connected to {}", addr);

        Ok(Self {
            addr,
            command_timeout,
            connection: Some(connection),
        })
    }

    async fn query(&mut self, name: &str, args: &[String]) -> Result<RespValue, ConnectionError> {
        let connection = self.connection.as_mut().ok_or(ConnectionError::Closed)?;
        let mut command = redis::cmd(name);
        command.arg(args);

        let outcome: Result<RedisResult<redis::Value>, Elapsed> =
            timeout(self.command_timeout, command.query_async(connection)).await;
        match outcome {
            Ok(Ok(value)) => RespValue::from(value).into_result(),
            Ok(Err(e)) => {
                let err = ConnectionError::from(e);
                if matches!(err, ConnectionError::Closed | ConnectionError::IoError(_)) {
                    warn!("Dropping connection to {} after {}", self.addr, err);
                    self.connection = None;
                }
                Err(err)
            }
            Err(_) => Err(ConnectionError::Timeout(format!(
                "{name} after {:?}",
                self.command_timeout
            ))),
        }
    }
}

#[async_trait]
impl StoreClient for RedisConnection {
    async fn ping(&mut self) -> Result<bool, ConnectionError> {
        let reply = self.query("PING", &[]).await?;
        Ok(reply.as_text().is_some_and(|s| s.eq_ignore_ascii_case("PONG")))
    }

    async fn execute_command(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<RespValue, ConnectionError> {
        self.query(name, args).await
    }

    async fn server_info(&mut self) -> Result<HashMap<String, String>, ConnectionError> {
        let reply = self.query("INFO", &[]).await?;
        let text = reply
            .as_text()
            .ok_or_else(|| ConnectionError::Protocol("INFO did not return a string".into()))?;
        Ok(parse_info(&text))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        // The driver task exits once the last handle to it is dropped.
        if self.connection.take().is_some() {
            info!("Closed connection to {}", self.addr);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.connection.is_none()
    }
}

/// Opens [`RedisConnection`]s with fixed deadlines.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl RedisConnector {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
        password: Option<String>,
    ) -> Result<Box<dyn StoreClient>, ConnectionError> {
        let conn = RedisConnection::open(
            &profile.host,
            profile.port,
            password.as_deref(),
            self.connect_timeout,
            self.command_timeout,
        )
        .await?;
        Ok(Box::new(conn))
    }
}
