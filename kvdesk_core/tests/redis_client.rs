use std::sync::Arc;
use std::time::Duration;

use kvdesk_core::connections::errors::ConnectionError;
use kvdesk_core::connections::{Connector, RedisConnector, StoreClient};
use kvdesk_core::storage::{CredentialVault, MemoryVault};
use kvdesk_core::{ConnectionProfile, CoreConfig, CoreError, SessionConnectionManager};
use tokio::net::TcpListener;

mod common;
use common::init_test_logging;
use common::resp_server::RespServer;

fn profile_for(server: &RespServer) -> ConnectionProfile {
    ConnectionProfile::new("loopback", "Loopback", "127.0.0.1", server.port())
}

fn connector() -> RedisConnector {
    RedisConnector::new(Duration::from_secs(2), Duration::from_millis(100))
}

fn redis_manager(vault: Arc<MemoryVault>) -> SessionConnectionManager {
    let config = CoreConfig {
        connect_timeout_ms: 2_000,
        command_timeout_ms: 100,
        ..CoreConfig::default()
    };
    SessionConnectionManager::new(
        Arc::new(RedisConnector::new(config.connect_timeout(), config.command_timeout())),
        vault,
        &config,
    )
}

#[tokio::test]
async fn connects_and_reads_ping_and_info() -> anyhow::Result<()> {
    init_test_logging();
    let server = RespServer::start(None).await;

    let mut client = connector().connect(&profile_for(&server), None).await?;
    assert!(client.ping().await?);
    let info = client.server_info().await?;
    assert_eq!(info.get("used_memory").map(String::as_str), Some("2048"));
    assert_eq!(info.get("db0").map(String::as_str), Some("keys=3,expires=0,avg_ttl=0"));

    client.close().await?;
    assert!(client.is_closed());
    Ok(())
}

#[tokio::test]
async fn auth_uses_the_password_and_rejects_a_wrong_one() -> anyhow::Result<()> {
    init_test_logging();
    let server = RespServer::start(Some("s3cret")).await;
    let profile = profile_for(&server);

    let rejected = connector().connect(&profile, Some("nope".into())).await;
    assert!(matches!(rejected, Err(ConnectionError::Auth(_))), "got {:?}", rejected.err());

    let mut client = connector().connect(&profile, Some("s3cret".into())).await?;
    assert!(client.ping().await?);
    assert!(server.received("AUTH") >= 2);
    Ok(())
}

#[tokio::test]
async fn timed_out_command_does_not_leak_its_reply_into_the_next() {
    init_test_logging();
    let server = RespServer::start(None).await;
    let manager = redis_manager(Arc::new(MemoryVault::new()));
    manager.connect("S", &profile_for(&server)).await.unwrap();

    let err = manager
        .execute("S", "ECHO", &["slow200:late".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout(_)), "got {err:?}");

    // Let the late reply arrive before the next request.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let reply = manager
        .execute("S", "ECHO", &["third".to_string()])
        .await
        .expect("connection is still usable");
    assert_eq!(reply.as_text().as_deref(), Some("third"));
    assert!(manager.get_connection("S").await.is_some());
}

#[tokio::test]
async fn peer_hang_up_reads_as_absent() {
    init_test_logging();
    let server = RespServer::start(None).await;
    let manager = redis_manager(Arc::new(MemoryVault::new()));
    manager.connect("S", &profile_for(&server)).await.unwrap();

    let err = manager.execute("S", "HANGUP", &[]).await.unwrap_err();
    assert!(err.needs_reconnect(), "got {err:?}");
    assert!(manager.get_connection("S").await.is_none());

    manager.connect("S", &profile_for(&server)).await.unwrap();
    let reply = manager.execute("S", "ECHO", &["back".to_string()]).await.unwrap();
    assert_eq!(reply.as_text().as_deref(), Some("back"));
}

#[tokio::test]
async fn stored_credential_reaches_the_server() {
    init_test_logging();
    let server = RespServer::start(Some("s3cret")).await;
    let vault = Arc::new(MemoryVault::new());
    vault.store("loopback", "s3cret").unwrap();
    let manager = redis_manager(Arc::clone(&vault));

    let profile = profile_for(&server).with_credential_ref("loopback");
    manager.connect("S", &profile).await.unwrap();
    assert!(manager.get_connection("S").await.is_some());

    let err = manager.connect("T", &profile_for(&server)).await.unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)), "NOAUTH on PING, got {err:?}");
}

#[tokio::test]
async fn refused_connection_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = redis_manager(Arc::new(MemoryVault::new()));
    let profile = ConnectionProfile::new("gone", "Gone", "127.0.0.1", port);
    let err = manager.connect("S", &profile).await.unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)), "got {err:?}");
}
