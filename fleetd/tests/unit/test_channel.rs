//! Client channel tests against a served core node

mod support;

use std::sync::Arc;
use std::time::Duration;

use client_api::Event;
use fleetd::server::serve::router;
use fleetd::server::state::ServerState;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use support::{build, server, user, Harness};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_core(harness: &Harness) -> String {
    let state = ServerState::new(
        harness.dispatcher.clone(),
        harness.hub.clone(),
        harness.users.clone(),
    );
    let app = router(Arc::new(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

async fn connect(addr: &str, token: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws?token={}", addr, token))
        .await
        .unwrap();
    socket
}

fn rejected_status(result: Result<(Socket, tungstenite::handshake::client::Response), tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected handshake error {:?}", other),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

/// Next event frame, skipping control frames
async fn next_event(socket: &mut Socket) -> Event {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no event within 5s")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(socket: &mut Socket, frame: &str) {
    socket.send(Message::Text(frame.into())).await.unwrap();
}

#[tokio::test]
async fn test_handshake_requires_known_session() {
    let harness = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let addr = spawn_core(&harness).await;

    let missing = connect_async(format!("ws://{}/ws", addr)).await;
    assert_eq!(rejected_status(missing), 401);

    let unknown = connect_async(format!("ws://{}/ws?token=forged", addr)).await;
    assert_eq!(rejected_status(unknown), 401);
    assert_eq!(harness.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_query_reply_goes_to_requester() {
    let harness = Harness::new(Vec::new(), Vec::new(), vec![server("s1", false)]).await;
    let addr = spawn_core(&harness).await;
    let mut alice = connect(&addr, "alice-session").await;

    send(&mut alice, r#"{"type":"CheckServer","serverId":"s1"}"#).await;
    assert_eq!(
        next_event(&mut alice).await,
        Event::ServerReachability {
            server_id: "s1".to_string(),
            reachable: true,
        }
    );
}

#[tokio::test]
async fn test_malformed_frame_gets_notice() {
    let harness = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let addr = spawn_core(&harness).await;
    let mut alice = connect(&addr, "alice-session").await;

    send(&mut alice, "this is not json").await;
    match next_event(&mut alice).await {
        Event::Notice { message } => assert!(message.starts_with("malformed command")),
        other => panic!("unexpected event {:?}", other),
    }

    // The connection survives
    send(&mut alice, r#"{"type":"Deploy"}"#).await;
    assert!(matches!(next_event(&mut alice).await, Event::Notice { .. }));
    assert_eq!(harness.executor.call_count(), 0);
}

#[tokio::test]
async fn test_command_broadcasts_to_owners() {
    let harness = Harness::new(vec![build("b1", &["alice"])], Vec::new(), Vec::new()).await;
    let addr = spawn_core(&harness).await;
    let mut alice = connect(&addr, "alice-session").await;
    let mut bob = connect(&addr, "bob-session").await;

    // Both connections are registered before the command runs
    while harness.hub.subscriber_count() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    send(&mut alice, r#"{"type":"PullBuild","buildId":"b1","note":"hotfix"}"#).await;

    assert_eq!(next_event(&mut alice).await, Event::progress("PullBuild", "b1", false));
    match next_event(&mut alice).await {
        Event::Update { update } => {
            assert_eq!(update.operation, "PullBuild");
            assert_eq!(update.operator, "alice");
            assert_eq!(update.note.as_deref(), Some("hotfix"));
            assert!(!update.is_error);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(next_event(&mut alice).await, Event::progress("PullBuild", "b1", true));

    // bob does not own b1: progress only
    assert_eq!(next_event(&mut bob).await, Event::progress("PullBuild", "b1", false));
    assert_eq!(next_event(&mut bob).await, Event::progress("PullBuild", "b1", true));
}

#[tokio::test]
async fn test_disabled_user_is_disconnected() {
    let harness = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let mut dave = user("dave", 1);
    dave.enabled = false;
    harness.users.insert(dave).await;
    harness.users.add_session("dave-session", "dave").await;
    let addr = spawn_core(&harness).await;

    let mut socket = connect(&addr, "dave-session").await;
    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("socket should close");
    assert!(matches!(frame, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    assert_eq!(harness.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_health_counts_connections() {
    let harness = Harness::new(Vec::new(), Vec::new(), Vec::new()).await;
    let addr = spawn_core(&harness).await;
    let _alice = connect(&addr, "alice-session").await;
    while harness.hub.subscriber_count() < 1 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connections"], 1);
}
