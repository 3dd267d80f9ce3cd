mod common;

use std::time::Duration;

use common::{wait_for_status, TestServer, WAIT};
use krushr_proto::{ClientEvent, TaskId};
use krushr_realtime::{ConnectionManager, ConnectionStatus, ReconnectPolicy};
use tokio::net::TcpListener;
use tokio::time::timeout;

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::new(Duration::from_millis(20), max_attempts)
}

#[test_timeout::tokio_timeout_test(20)]
async fn opens_a_single_channel_and_forwards_text_frames() {
    let server = TestServer::start().await;
    let (manager, mut frames) = ConnectionManager::new(server.url.clone(), fast_policy(3));
    let mut status = manager.watch_status();

    manager.set_authenticated(true);
    assert!(manager.connect());
    assert!(!manager.connect(), "second connect must be a no-op");
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Connected).await;
    assert!(!manager.connect());
    assert_eq!(manager.channels_opened(), 1);

    server.wait_accepted(1).await;
    server.push(r#"{"event":"user-online","data":{"userId":"u1"}}"#);
    let frame = timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert!(frame.contains("user-online"));
    assert_eq!(server.accepted(), 1);
}

#[test_timeout::tokio_timeout_test(20)]
async fn outbound_events_use_the_event_envelope() {
    let server = TestServer::start().await;
    let (manager, _frames) = ConnectionManager::new(server.url.clone(), fast_policy(3));
    let mut status = manager.watch_status();
    manager.set_authenticated(true);
    manager.connect();
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Connected).await;

    assert!(manager.send(ClientEvent::JoinTask {
        task_id: TaskId::new("T1"),
    }));
    let raw = server.next_received().await;
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["event"], "join-task");
    assert_eq!(value["data"]["taskId"], "T1");
    assert!(value["timestamp"].is_string());
}

#[test_timeout::tokio_timeout_test(20)]
async fn reconnects_after_the_server_closes_the_channel() {
    let server = TestServer::start().await;
    let (manager, _frames) = ConnectionManager::new(server.url.clone(), fast_policy(3));
    let mut status = manager.watch_status();
    manager.set_authenticated(true);
    manager.connect();
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Connected).await;

    server.wait_accepted(1).await;
    server.close_all();
    wait_for_status(&mut status, |s| {
        matches!(s, ConnectionStatus::Reconnecting { attempt: 1, .. })
    })
    .await;
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Connected).await;

    assert_eq!(manager.channels_opened(), 2);
    assert_eq!(manager.reconnect_attempts(), 0);
    server.wait_accepted(2).await;
}

#[test_timeout::tokio_timeout_test(20)]
async fn goes_offline_after_the_retry_cap_and_connect_starts_over() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (manager, _frames) =
        ConnectionManager::new(format!("ws://{addr}/ws"), fast_policy(2));
    let mut status = manager.watch_status();
    manager.set_authenticated(true);
    manager.connect();
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Offline).await;
    assert_eq!(manager.reconnect_attempts(), 2);
    assert_eq!(manager.channels_opened(), 0);

    assert!(manager.connect(), "explicit connect after going offline");
    assert_eq!(manager.reconnect_attempts(), 0);
    manager.disconnect();
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[test_timeout::tokio_timeout_test(20)]
async fn disconnect_does_not_reconnect() {
    let server = TestServer::start().await;
    let (manager, _frames) = ConnectionManager::new(server.url.clone(), fast_policy(3));
    let mut status = manager.watch_status();
    manager.set_authenticated(true);
    manager.connect();
    wait_for_status(&mut status, |s| *s == ConnectionStatus::Connected).await;

    server.wait_accepted(1).await;
    manager.disconnect();
    assert!(!manager.send(ClientEvent::LeaveTask {
        task_id: TaskId::new("T1"),
    }));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.accepted(), 1);
}
