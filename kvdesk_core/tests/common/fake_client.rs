//! A deterministic **in‑process stand‑in** for a key-value store, reached
//! through `kvdesk_core::connections::{Connector, StoreClient}`.
//!
//! *  **From the test’s perspective**
//!    * Seed keys with `FakeStore::seed_keys`, flip failure knobs on the
//!      shared `FakeStore`, then inspect what happened through it
//!      (`opened`, `closed`, `commands`, remaining `keys`).
//!    * `scan_hook` runs inside every `SCAN`, which lets a test act at an
//!      exact point of a bulk operation.
//!
//! *  **Why this exists**: It lets integration tests exercise the *real*
//!    session, metrics and operation machinery without a running server.
//!    Wire-level behaviour is covered by `resp_server` instead.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use kvdesk_core::connections::errors::ConnectionError;
use kvdesk_core::connections::resp::RespValue;
use kvdesk_core::connections::{Connector, StoreClient};
use kvdesk_core::ConnectionProfile;

/// How `connect` should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused,
    AuthRejected,
    /// Never answers; the caller's deadline must fire.
    Hang,
}

#[derive(Default)]
pub struct FakeState {
    pub keys: BTreeSet<String>,
    pub info: HashMap<String, String>,
    pub connect_failure: Option<ConnectFailure>,
    pub ping_ok: bool,
    /// Passwords handed to `connect`, in order.
    pub passwords: Vec<Option<String>>,
    pub opened: usize,
    pub closed: usize,
    pub commands: Vec<String>,
    /// Fail every `UNLINK` once this many have succeeded.
    pub fail_unlink_after: Option<usize>,
    pub unlink_calls: usize,
    pub unlink_unsupported: bool,
    /// Next command on any client reports a dropped transport.
    pub drop_transport: bool,
    /// Every client reports closure from `is_closed`, without a command.
    pub peer_closed: bool,
    /// `connect` waits this long before answering.
    pub connect_delay: Option<Duration>,
    /// `close` still counts the client closed, then reports an error.
    pub close_fails: bool,
    pub scan_calls: u32,
    pub scan_hook: Option<Arc<dyn Fn(u32) + Send + Sync>>,
}

#[derive(Clone)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        let state = FakeState {
            ping_ok: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            store: self.clone(),
        })
    }

    pub fn seed_keys<I: IntoIterator<Item = String>>(&self, keys: I) {
        self.state().keys.extend(keys);
    }

    pub fn set_info(&self, pairs: &[(&str, &str)]) {
        let mut state = self.state();
        for (k, v) in pairs {
            state.info.insert(k.to_string(), v.to_string());
        }
    }

    pub fn opened(&self) -> usize {
        self.state().opened
    }

    pub fn closed(&self) -> usize {
        self.state().closed
    }
}

pub struct FakeConnector {
    store: FakeStore,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _profile: &ConnectionProfile,
        password: Option<String>,
    ) -> Result<Box<dyn StoreClient>, ConnectionError> {
        let (failure, delay) = {
            let mut state = self.store.state();
            state.passwords.push(password);
            (state.connect_failure, state.connect_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(ConnectFailure::Refused) => Err(ConnectionError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            Some(ConnectFailure::AuthRejected) => {
                Err(ConnectionError::Auth("WRONGPASS invalid password".into()))
            }
            Some(ConnectFailure::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ConnectionError::Other("unreachable".into()))
            }
            None => {
                self.store.state().opened += 1;
                Ok(Box::new(FakeClient {
                    store: self.store.clone(),
                    closed: false,
                    dropped: false,
                }))
            }
        }
    }
}

pub struct FakeClient {
    store: FakeStore,
    closed: bool,
    /// The "peer" went away.
    dropped: bool,
}

/// `*` matches any run of characters; everything else is literal.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }
    let mut rest = &key[first.len()..key.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(at) => rest = &rest[at + middle.len()..],
            None => return false,
        }
    }
    true
}

fn bulk(s: &str) -> RespValue {
    RespValue::Bulk(Some(s.as_bytes().to_vec()))
}

impl FakeClient {
    fn check_transport(&mut self) -> Result<(), ConnectionError> {
        if self.closed || self.dropped {
            return Err(ConnectionError::Closed);
        }
        if self.store.state().drop_transport {
            self.dropped = true;
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    /// Cursor `"0"` starts at the beginning, any other cursor is the last
    /// key returned by the previous batch.
    fn scan(&self, args: &[String]) -> RespValue {
        let cursor = args.first().cloned().unwrap_or_else(|| "0".into());
        let pattern = args
            .iter()
            .position(|a| a == "MATCH")
            .and_then(|i| args.get(i + 1))
            .cloned()
            .unwrap_or_else(|| "*".into());
        let count: usize = args
            .iter()
            .position(|a| a == "COUNT")
            .and_then(|i| args.get(i + 1))
            .and_then(|c| c.parse().ok())
            .unwrap_or(10);

        let (batch, more, hook, call) = {
            let mut state = self.store.state();
            state.scan_calls += 1;
            let after = cursor.strip_prefix('@').map(str::to_string);
            let mut matching = state
                .keys
                .iter()
                .filter(|k| after.as_ref().map_or(true, |a| k.as_str() > a.as_str()))
                .filter(|k| glob_match(&pattern, k));
            let batch: Vec<String> = matching.by_ref().take(count).cloned().collect();
            let more = matching.next().is_some();
            (batch, more, state.scan_hook.clone(), state.scan_calls)
        };
        if let Some(hook) = hook {
            hook(call);
        }

        let next = match batch.last() {
            Some(last) if more => format!("@{last}"),
            _ => "0".to_string(),
        };
        RespValue::Array(Some(vec![
            bulk(&next),
            RespValue::Array(Some(batch.iter().map(|k| bulk(k)).collect())),
        ]))
    }

    fn delete(&self, name: &str, keys: &[String]) -> Result<RespValue, ConnectionError> {
        let mut state = self.store.state();
        if name == "UNLINK" {
            if state.unlink_unsupported {
                return Ok(RespValue::Error(
                    "ERR unknown command 'UNLINK', with args beginning with:".into(),
                ));
            }
            if state.fail_unlink_after.is_some_and(|n| state.unlink_calls >= n) {
                return Err(ConnectionError::Timeout("UNLINK".into()));
            }
            state.unlink_calls += 1;
        }
        let removed = keys.iter().filter(|k| state.keys.remove(*k)).count();
        Ok(RespValue::Integer(removed as i64))
    }
}

#[async_trait]
impl StoreClient for FakeClient {
    async fn ping(&mut self) -> Result<bool, ConnectionError> {
        self.check_transport()?;
        Ok(self.store.state().ping_ok)
    }

    async fn execute_command(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<RespValue, ConnectionError> {
        self.check_transport()?;
        self.store.state().commands.push(name.to_string());
        let reply = match name.to_ascii_uppercase().as_str() {
            "SCAN" => self.scan(args),
            "UNLINK" => self.delete("UNLINK", args)?,
            "DEL" => self.delete("DEL", args)?,
            "DBSIZE" => RespValue::Integer(self.store.state().keys.len() as i64),
            "ECHO" => bulk(args.first().map(String::as_str).unwrap_or("")),
            "DELAY" => {
                let ms = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                RespValue::Simple("OK".into())
            }
            "SLEEP" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                RespValue::Simple("OK".into())
            }
            other => RespValue::Error(format!("ERR unknown command '{other}'")),
        };
        reply.into_result()
    }

    async fn server_info(&mut self) -> Result<HashMap<String, String>, ConnectionError> {
        self.check_transport()?;
        Ok(self.store.state().info.clone())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if !self.closed {
            self.closed = true;
            let mut state = self.store.state();
            state.closed += 1;
            if state.close_fails {
                return Err(ConnectionError::Other("close failed".into()));
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || self.dropped || self.store.state().peer_closed
    }
}
