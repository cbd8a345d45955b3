//! End-to-end tests of the conversation monitor against an in-memory
//! realtime server: lifecycle, event mapping and token refresh.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncReadExt;

use common::*;
use convo_core::AppConfig;
use convo_models::ConversationEventType;
use convo_services::{
    ConnectionStatus, ConversationMonitorBuilder, MemoryTokenStore, MonitorEvent, TokenStore,
};
use convo_socket::ConnectionState;

// ---- Lifecycle ----

#[tokio::test]
async fn test_resume_connects_with_jwt_extension() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector.clone()).build().unwrap();
    let mut events = monitor.subscribe();
    assert_eq!(monitor.connection_status(), ConnectionStatus::NotYetInitiated);

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    let subscribe = server.complete_session("bayeux-1").await;

    assert_eq!(subscribe.subscription.as_deref(), Some(USER_CHANNEL));
    assert_eq!(subscribe.extra["appId"], APP_ID);
    assert_eq!(subscribe.extra["appUserId"], APP_USER_ID);
    assert_eq!(subscribe.extra["jwt"], "token-1");
    assert_eq!(subscribe.ext.as_ref().unwrap()["jwt"], "token-1");

    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;
    assert!(monitor.is_connected());
    assert_eq!(monitor.connection_status(), ConnectionStatus::Connected);

    // Already connected: no second connection.
    monitor.resume();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_session_token_used_without_jwt() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector)
        .token_store(Arc::new(MemoryTokenStore::default()))
        .session_token("sess-9")
        .build()
        .unwrap();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    let subscribe = server.complete_session("bayeux-1").await;
    assert_eq!(subscribe.extra["sessionToken"], "sess-9");
    assert!(!subscribe.extra.contains_key("jwt"));
}

#[tokio::test]
async fn test_pause_then_resume() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector.clone()).build().unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-1").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;

    monitor.pause();
    assert!(!monitor.is_connected());
    server.expect_channel("/meta/disconnect").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Disconnected).await;
    assert_eq!(monitor.connection_status(), ConnectionStatus::Disconnected);

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-2").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn test_close_is_permanent() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector.clone()).build().unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-1").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;

    monitor.close();
    server.expect_channel("/meta/disconnect").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Disconnected).await;

    monitor.resume();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.calls(), 1);
    assert!(!monitor.is_connected());
}

#[tokio::test]
async fn test_reset_starts_new_handshake() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector.clone()).build().unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-1").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;

    monitor.reset();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-2").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn test_server_close_reports_disconnect() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector).build().unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-1").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;

    server.close().await;
    wait_for(&mut events, |e| *e == MonitorEvent::Disconnected).await;
    assert!(!monitor.is_connected());

    // The reconnection cycle brings the session back.
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-2").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;
}

#[tokio::test]
async fn test_reset_then_failed_reconnect_reports_disconnect() {
    let (connector, mut accepted) = DuplexConnector::accepting(1);
    let monitor = test_builder(connector.clone())
        .retry_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-1").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;

    monitor.reset();
    wait_for(&mut events, |e| *e == MonitorEvent::Disconnected).await;
    assert!(!monitor.is_connected());
    assert_eq!(monitor.connection_status(), ConnectionStatus::Disconnected);

    // Every reconnection attempt is refused; the cycle gives up quietly.
    let mut states = monitor.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .expect("reconnection cycle never ended")
        .unwrap();
    assert_eq!(connector.calls(), 4);
    assert!(!monitor.is_connected());
}

#[tokio::test]
async fn test_pause_cancels_pending_reconnect() {
    let (connector, _accepted) = DuplexConnector::accepting(0);
    let monitor = test_builder(connector.clone())
        .max_connection_attempts(10)
        .retry_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut states = monitor.state_changes();

    monitor.resume();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Reconnecting))
        .await
        .expect("never started reconnecting")
        .unwrap();

    monitor.pause();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .expect("pause did not stop the cycle")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let calls = connector.calls();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connector.calls(), calls);
    assert_eq!(monitor.connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let (connector, _accepted) = DuplexConnector::accepting(0);
    let monitor = test_builder(connector.clone())
        .max_connection_attempts(10)
        .retry_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut states = monitor.state_changes();

    monitor.resume();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Reconnecting))
        .await
        .expect("never started reconnecting")
        .unwrap();

    monitor.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = connector.calls();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connector.calls(), calls);
}

#[tokio::test]
async fn test_connect_timeout_override_abandons_silent_server() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector)
        .connect_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    monitor.resume();
    let mut silent = next_connection(&mut accepted).await;

    // The client gives up on the upgrade and drops its half well before
    // the default timeout would fire.
    let mut request = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), silent.read_to_end(&mut request))
        .await
        .expect("upgrade was not abandoned")
        .unwrap();
    assert!(String::from_utf8_lossy(&request).starts_with("GET /"));
    assert!(!monitor.is_connected());
}

// ---- Event mapping ----

#[tokio::test]
async fn test_channel_payload_becomes_monitor_events() {
    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = test_builder(connector).build().unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    server.complete_session("bayeux-1").await;
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;

    server
        .publish_events(json!([
            {
                "type": "message",
                "conversation": {"_id": "conv-1"},
                "message": {"_id": "m1", "type": "text", "text": "hi there"}
            },
            {
                "type": "message",
                "conversation": {"_id": "conv-1"},
                "message": {"_id": "m2", "type": "file", "source": {"id": CLIENT_ID}}
            },
            {
                "type": "upload:failed",
                "conversation": {"_id": "conv-1"},
                "client": {"id": CLIENT_ID},
                "data": {"messageId": "m3"},
                "err": {"status": 413, "code": "file_too_large"}
            },
            {"type": "unheard:of", "conversation": {"_id": "conv-1"}},
            {
                "type": "activity",
                "conversation": {"_id": "conv-1"},
                "activity": {"role": "appMaker", "type": "typing:start", "data": {"name": "Agent"}}
            }
        ]))
        .await;

    match wait_for(&mut events, |_| true).await {
        MonitorEvent::MessageReceived { conversation_id, message } => {
            assert_eq!(conversation_id, "conv-1");
            assert_eq!(message.text.as_deref(), Some("hi there"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match wait_for(&mut events, |_| true).await {
        MonitorEvent::UploadComplete(message) => assert_eq!(message.id.as_deref(), Some("m2")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        MonitorEvent::MessageRejected {
            message_id: "m3".into(),
            status: 413,
            code: "file_too_large".into()
        }
    );
    match wait_for(&mut events, |_| true).await {
        MonitorEvent::ConversationActivity(activity) => {
            assert_eq!(activity.event_type, ConversationEventType::TypingStart);
            assert_eq!(activity.name.as_deref(), Some("Agent"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

// ---- Authentication ----

#[tokio::test]
async fn test_invalid_auth_refreshes_token_and_reconnects() {
    let (connector, mut accepted) = DuplexConnector::new();
    let (delegate, mut auth_requests) = ChannelDelegate::new();
    let tokens = Arc::new(MemoryTokenStore::new(Some("expired".into()), None));
    let monitor = test_builder(connector.clone())
        .token_store(tokens.clone())
        .authentication_delegate(delegate)
        .retry_interval(Duration::from_millis(300))
        .build()
        .unwrap();
    let mut events = monitor.subscribe();

    monitor.resume();
    reject_unauthorized(next_connection(&mut accepted).await).await;

    let (error, callback) = tokio::time::timeout(WAIT, auth_requests.recv())
        .await
        .expect("timed out waiting for auth delegate")
        .expect("delegate dropped");
    assert_eq!(error.status, 401);
    assert!(callback.is_current());

    // No automatic retry while waiting for a new token.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(connector.calls(), 1);

    callback.update_token("fresh");
    assert_eq!(tokens.jwt().as_deref(), Some("fresh"));

    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    let subscribe = server.complete_session("bayeux-2").await;
    assert_eq!(subscribe.extra["jwt"], "fresh");
    wait_for(&mut events, |e| *e == MonitorEvent::Connected).await;
}

#[tokio::test]
async fn test_token_refresh_after_pause_does_not_reconnect() {
    let (connector, mut accepted) = DuplexConnector::new();
    let (delegate, mut auth_requests) = ChannelDelegate::new();
    let tokens = Arc::new(MemoryTokenStore::new(Some("expired".into()), None));
    let monitor = test_builder(connector.clone())
        .token_store(tokens.clone())
        .authentication_delegate(delegate)
        .build()
        .unwrap();

    monitor.resume();
    reject_unauthorized(next_connection(&mut accepted).await).await;
    let (_, callback) = tokio::time::timeout(WAIT, auth_requests.recv())
        .await
        .expect("timed out waiting for auth delegate")
        .expect("delegate dropped");

    monitor.pause();
    assert!(!callback.is_current());
    callback.update_token("late");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(tokens.jwt().as_deref(), Some("late"));
    assert_eq!(connector.calls(), 1);
}

// ---- Configuration ----

#[tokio::test]
async fn test_builder_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[sdk]
app_id = "app1"
app_user_id = "user1"
jwt = "from-file"

[realtime]
base_url = "https://realtime.test"
max_connection_attempts = 5
"#,
    )
    .unwrap();

    let config = AppConfig::load_from_file(&path).unwrap();
    assert!(!config.sdk.client_id.is_empty());

    let (connector, mut accepted) = DuplexConnector::new();
    let monitor = ConversationMonitorBuilder::from_config(&config)
        .host("http://realtime.test")
        .connector(connector)
        .build()
        .unwrap();
    assert_eq!(monitor.app_id(), "app1");
    assert_eq!(monitor.app_user_id(), "user1");

    monitor.resume();
    let mut server = FakeServer::accept(next_connection(&mut accepted).await).await;
    let subscribe = server.complete_session("bayeux-1").await;
    assert_eq!(subscribe.extra["jwt"], "from-file");
}
