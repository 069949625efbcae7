use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio::time::{timeout, Instant};

use super::background::spawn_periodic;
use super::errors::CoreError;
use crate::config::CoreConfig;
use crate::connections::errors::ConnectionError;
use crate::connections::resp::RespValue;
use crate::connections::{Connector, StoreClient};
use crate::storage::credentials::CredentialVault;
use crate::storage::profile::ConnectionProfile;

/// Extra time a call may run past `command_timeout` before the handle gives
/// up on its client. Clients enforce `command_timeout` themselves; one that
/// overruns it by this much is treated as wedged.
const CALL_GRACE: Duration = Duration::from_millis(250);

/// A live client owned by exactly one session.
///
/// Callers may hold an `Arc` to run commands, but only the owning session
/// closes it. `close` is idempotent.
pub struct ConnectionHandle {
    connection_id: String,
    client: Mutex<Box<dyn StoreClient>>,
    command_timeout: Duration,
    closed: AtomicBool,
    /// Set once the transport is gone or a call was abandoned mid-flight.
    broken: AtomicBool,
}

impl ConnectionHandle {
    fn new(connection_id: String, client: Box<dyn StoreClient>, command_timeout: Duration) -> Self {
        Self {
            connection_id,
            client: Mutex::new(client),
            command_timeout,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    /// Id of the profile this handle was opened against.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// `false` once closed, broken, or the idle client reports closure.
    pub fn is_live(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) || self.broken.load(Ordering::SeqCst) {
            return false;
        }
        // A busy client is checked by the call holding it.
        if let Ok(client) = self.client.try_lock() {
            self.note_transport(&**client);
        }
        !self.broken.load(Ordering::SeqCst)
    }

    /// Run one command under the command timeout.
    pub async fn execute(&self, name: &str, args: &[String]) -> Result<RespValue, CoreError> {
        let mut client = self.acquire(name).await?;
        let outcome = timeout(self.call_deadline(), client.execute_command(name, args)).await;
        self.settle(name, &mut **client, outcome).await
    }

    pub async fn ping(&self) -> Result<bool, CoreError> {
        let mut client = self.acquire("PING").await?;
        let outcome = timeout(self.call_deadline(), client.ping()).await;
        self.settle("PING", &mut **client, outcome).await
    }

    pub async fn server_info(&self) -> Result<HashMap<String, String>, CoreError> {
        let mut client = self.acquire("INFO").await?;
        let outcome = timeout(self.call_deadline(), client.server_info()).await;
        self.settle("INFO", &mut **client, outcome).await
    }

    fn call_deadline(&self) -> Duration {
        self.command_timeout + CALL_GRACE
    }

    /// Wait at most `command_timeout` for the client. Giving up here leaves
    /// the client untouched.
    async fn acquire(&self, what: &str) -> Result<MutexGuard<'_, Box<dyn StoreClient>>, CoreError> {
        self.ensure_live()?;
        let client = timeout(self.command_timeout, self.client.lock())
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "{} on '{}' waited {:?} for the connection",
                    what, self.connection_id, self.command_timeout
                ))
            })?;
        if self.broken.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(self.gone());
        }
        Ok(client)
    }

    fn ensure_live(&self) -> Result<(), CoreError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(self.gone())
        }
    }

    fn gone(&self) -> CoreError {
        CoreError::Unavailable(format!("connection '{}' is closed", self.connection_id))
    }

    fn note_transport(&self, client: &dyn StoreClient) {
        if client.is_closed() && !self.broken.swap(true, Ordering::SeqCst) {
            warn!("Connection '{}' was closed by the peer", self.connection_id);
        }
    }

    /// Map a finished or abandoned call. An abandoned call may have left a
    /// reply unread, so the client is closed and the handle marked broken.
    async fn settle<T>(
        &self,
        what: &str,
        client: &mut dyn StoreClient,
        outcome: Result<Result<T, ConnectionError>, Elapsed>,
    ) -> Result<T, CoreError> {
        match outcome {
            Ok(result) => {
                self.note_transport(client);
                result.map_err(CoreError::from)
            }
            Err(_) => {
                self.broken.store(true, Ordering::SeqCst);
                warn!(
                    "{} on '{}' overran {:?}, abandoning the connection",
                    what, self.connection_id, self.command_timeout
                );
                match timeout(CALL_GRACE, client.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Error closing '{}': {}", self.connection_id, e),
                    Err(_) => warn!("Closing '{}' timed out", self.connection_id),
                }
                Err(CoreError::Timeout(format!(
                    "{} on '{}' exceeded {:?}",
                    what, self.connection_id, self.command_timeout
                )))
            }
        }
    }

    /// Close the client. A second call is a no-op.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closing = async {
            let mut client = self.client.lock().await;
            client.close().await
        };
        match timeout(self.command_timeout, closing).await {
            Ok(Ok(())) => debug!("Closed handle for '{}'", self.connection_id),
            Ok(Err(e)) => warn!("Error closing '{}': {}", self.connection_id, e),
            Err(_) => warn!("Closing '{}' timed out", self.connection_id),
        }
    }
}

struct SessionState {
    handle: Option<Arc<ConnectionHandle>>,
    last_activity: Instant,
    /// Set when reclamation removed this record from the map.
    evicted: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            handle: None,
            last_activity: Instant::now(),
            evicted: false,
        }
    }
}

type SessionSlot = Arc<Mutex<SessionState>>;

struct Inner {
    sessions: DashMap<String, SessionSlot>,
    connector: Arc<dyn Connector>,
    vault: Arc<dyn CredentialVault>,
    idle_timeout: Duration,
    connect_timeout: Duration,
    command_timeout: Duration,
}

/// Maps session tokens to at most one live store connection each.
///
/// Every session has its own async mutex, so `connect`, `disconnect` and
/// reclamation of the same token are linearized while unrelated tokens
/// proceed independently. Cloning the manager only bumps a reference count.
#[derive(Clone)]
pub struct SessionConnectionManager {
    inner: Arc<Inner>,
}

impl SessionConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        vault: Arc<dyn CredentialVault>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                connector,
                vault,
                idle_timeout: config.idle_timeout(),
                connect_timeout: config.connect_timeout(),
                command_timeout: config.command_timeout(),
            }),
        }
    }

    /// Mint a fresh, unguessable token and create its session record.
    pub fn issue_token(&self) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.inner
            .sessions
            .insert(token.clone(), Arc::new(Mutex::new(SessionState::new())));
        debug!("Issued session token {}…", &token[..8]);
        token
    }

    fn slot_for(&self, token: &str) -> SessionSlot {
        self.inner
            .sessions
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new())))
            .clone()
    }

    fn existing_slot(&self, token: &str) -> Option<SessionSlot> {
        self.inner.sessions.get(token).map(|e| Arc::clone(e.value()))
    }

    /// Open a connection for `token` against `profile`.
    ///
    /// Any handle the session already holds is closed first. The new client
    /// must answer `PING` before it is stored; on any failure the session is
    /// left without a handle.
    pub async fn connect(&self, token: &str, profile: &ConnectionProfile) -> Result<(), CoreError> {
        if token.is_empty() {
            return Err(CoreError::InvalidInput("empty session token".into()));
        }
        profile.validate()?;

        loop {
            let slot = self.slot_for(token);
            let mut state = slot.lock().await;
            if state.evicted {
                // Reclaimed between lookup and lock; start over on a fresh record.
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }

            if let Some(old) = state.handle.take() {
                info!("Session replacing connection '{}'", old.connection_id());
                old.close().await;
            }
            state.last_activity = Instant::now();

            let handle = self.open_handle(profile).await?;
            assert!(
                state.handle.is_none(),
                "session holds two connection handles"
            );
            state.handle = Some(Arc::new(handle));
            info!("Session connected to '{}' ({}:{})", profile.id, profile.host, profile.port);
            return Ok(());
        }
    }

    async fn open_handle(&self, profile: &ConnectionProfile) -> Result<ConnectionHandle, CoreError> {
        let connecting = async {
            let password = match profile.credential_ref.clone() {
                // Keychain lookups block, so keep them off the runtime workers.
                Some(reference) => {
                    let vault = Arc::clone(&self.inner.vault);
                    tokio::task::spawn_blocking(move || vault.password(&reference))
                        .await
                        .map_err(|e| {
                            CoreError::Unavailable(format!("credential lookup aborted: {e}"))
                        })??
                }
                None => None,
            };
            self.inner
                .connector
                .connect(profile, password)
                .await
                .map_err(|e| {
                    warn!("Connect to '{}' failed: {}", profile.id, e);
                    CoreError::from(e)
                })
        };

        let mut client = timeout(self.inner.connect_timeout, connecting)
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "connecting to {}:{} exceeded {:?}",
                    profile.host, profile.port, self.inner.connect_timeout
                ))
            })??;

        let alive = match timeout(self.inner.command_timeout, client.ping()).await {
            Ok(Ok(alive)) => Ok(alive),
            // e.g. NOAUTH: the store is up but this session cannot use it.
            Ok(Err(ConnectionError::Server(msg))) => Err(CoreError::Unavailable(msg)),
            Ok(Err(e)) => Err(CoreError::from(e)),
            Err(_) => Err(CoreError::Timeout(format!("PING to '{}'", profile.id))),
        };
        match alive {
            Ok(true) => Ok(ConnectionHandle::new(
                profile.id.clone(),
                client,
                self.inner.command_timeout,
            )),
            other => {
                if let Err(e) = client.close().await {
                    warn!("Error closing rejected client for '{}': {}", profile.id, e);
                }
                match other {
                    Err(e) => Err(e),
                    _ => Err(CoreError::Unavailable(format!(
                        "'{}' did not answer PING",
                        profile.id
                    ))),
                }
            }
        }
    }

    /// The live handle for `token`, if any. Broken handles count as absent.
    pub async fn get_connection(&self, token: &str) -> Option<Arc<ConnectionHandle>> {
        let slot = self.existing_slot(token)?;
        let state = slot.lock().await;
        state.handle.as_ref().filter(|h| h.is_live()).cloned()
    }

    pub async fn get_connection_id(&self, token: &str) -> Option<String> {
        self.get_connection(token)
            .await
            .map(|h| h.connection_id().to_string())
    }

    /// Refresh the session's activity timestamp. `false` for unknown tokens.
    pub async fn touch(&self, token: &str) -> bool {
        match self.existing_slot(token) {
            Some(slot) => {
                slot.lock().await.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Close the session's handle if there is one. Idempotent.
    pub async fn disconnect(&self, token: &str) {
        let Some(slot) = self.existing_slot(token) else {
            return;
        };
        let mut state = slot.lock().await;
        if let Some(handle) = state.handle.take() {
            handle.close().await;
            info!("Session disconnected from '{}'", handle.connection_id());
        }
        state.last_activity = Instant::now();
    }

    /// Look up, touch and run one command for `token`.
    pub async fn execute(
        &self,
        token: &str,
        name: &str,
        args: &[String],
    ) -> Result<RespValue, CoreError> {
        self.touch(token).await;
        let handle = self.require_connection(token).await?;
        handle.execute(name, args).await
    }

    pub async fn server_info(&self, token: &str) -> Result<HashMap<String, String>, CoreError> {
        self.touch(token).await;
        let handle = self.require_connection(token).await?;
        handle.server_info().await
    }

    /// Like [`get_connection`](Self::get_connection) but `Unavailable` when absent.
    pub async fn require_connection(&self, token: &str) -> Result<Arc<ConnectionHandle>, CoreError> {
        self.get_connection(token).await.ok_or_else(|| {
            CoreError::Unavailable("no live connection for this session, reconnect".into())
        })
    }

    /// One reclamation pass: sessions idle past the threshold lose their
    /// handle and their record. Returns how many sessions were evicted.
    pub async fn reclaim_idle(&self) -> usize {
        let snapshot: Vec<(String, SessionSlot)> = self
            .inner
            .sessions
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut evicted = 0;
        for (token, slot) in snapshot {
            {
                // A locked slot has a call in progress, so it is not idle.
                let Ok(mut state) = slot.try_lock() else {
                    continue;
                };
                if state.evicted || state.last_activity.elapsed() < self.inner.idle_timeout {
                    continue;
                }
                if let Some(handle) = state.handle.take() {
                    info!("Reclaiming idle connection '{}'", handle.connection_id());
                    handle.close().await;
                }
                state.evicted = true;
            }
            self.inner
                .sessions
                .remove_if(&token, |_, current| Arc::ptr_eq(current, &slot));
            evicted += 1;
        }
        if evicted > 0 {
            info!("Reclaimed {} idle sessions", evicted);
        }
        evicted
    }

    /// Run [`reclaim_idle`](Self::reclaim_idle) every `period` until shutdown.
    pub fn spawn_reclaimer(&self, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        spawn_periodic("idle-session reclaimer", period, shutdown, move || {
            let manager = manager.clone();
            async move {
                manager.reclaim_idle().await;
            }
        })
    }

    /// One live handle per distinct connection id.
    pub async fn live_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        let slots: Vec<SessionSlot> = self
            .inner
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for slot in slots {
            let state = slot.lock().await;
            if let Some(handle) = state.handle.as_ref().filter(|h| h.is_live()) {
                if seen.insert(handle.connection_id().to_string()) {
                    out.push(Arc::clone(handle));
                }
            }
        }
        out
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Close every handle and forget every session.
    pub async fn shutdown(&self) {
        let tokens: Vec<String> = self.inner.sessions.iter().map(|e| e.key().clone()).collect();
        for token in tokens {
            if let Some((_, slot)) = self.inner.sessions.remove(&token) {
                let mut state = slot.lock().await;
                if let Some(handle) = state.handle.take() {
                    handle.close().await;
                }
                state.evicted = true;
            }
        }
        if !self.inner.sessions.is_empty() {
            error!("Sessions were created during shutdown");
        }
    }
}
