//! WebSocket signaling against a local server

mod harness;

use futures_util::{SinkExt, StreamExt};
use harness::init_logging;
use meeting_mesh::peer::mock::MockConnectionFactory;
use meeting_mesh::{InboundSignal, MeshConfig, MeshSession, OutboundSignal, WebSocketSignaling};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;

/// Accept one client, push `frames` after its first message, then return
/// every message the client sent until it closed.
async fn serve_once(listener: TcpListener, frames: Vec<String>) -> Vec<OutboundSignal> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    let mut received = Vec::new();
    let mut pushed = false;
    while let Some(Ok(frame)) = ws.next().await {
        match frame {
            Message::Text(text) => {
                received.push(serde_json::from_str(&text).unwrap());
                if !pushed {
                    for frame in &frames {
                        ws.send(Message::Text(frame.clone())).await.unwrap();
                    }
                    pushed = true;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    received
}

#[tokio::test]
async fn test_signaling_round_trip() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let frames = vec![
        json!({"event": "meeting:user-joined", "data": {"userId": "bob"}}).to_string(),
        json!({"event": "meeting:chat", "data": {"text": "ignored"}}).to_string(),
        "not json".to_string(),
        json!({"event": "meeting:user-left", "data": {"userId": "bob"}}).to_string(),
    ];
    let server = tokio::spawn(serve_once(listener, frames));

    let (channel, mut inbound) = assert_ok!(WebSocketSignaling::connect(&url).await);
    assert!(channel.is_open());

    let session = MeshSession::new(
        MeshConfig::default().with_room("standup").with_local_id("alice"),
        MockConnectionFactory::new(),
        Arc::new(channel),
    )
    .unwrap();
    assert_ok!(session.join());

    // unknown events and malformed frames are skipped, order is kept
    let first = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap();
    assert_eq!(
        first,
        Some(InboundSignal::UserJoined {
            user_id: "bob".to_string()
        })
    );
    session.handle_signal(first.unwrap()).await;
    assert!(session.remote_streams().contains_key("bob"));

    let second = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap();
    assert_eq!(
        second,
        Some(InboundSignal::UserLeft {
            user_id: "bob".to_string()
        })
    );
    session.handle_signal(second.unwrap()).await;
    assert!(session.remote_streams().is_empty());

    assert_ok!(session.leave_all().await);
    // dropping the session drops the channel; the writer flushes and closes
    drop(session);

    let received = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        received,
        vec![
            OutboundSignal::Join {
                room_id: "standup".to_string(),
                user_id: "alice".to_string(),
            },
            OutboundSignal::Leave {
                room_id: "standup".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_inbound_stream_ends_when_server_closes() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let (channel, mut inbound) = assert_ok!(WebSocketSignaling::connect(&url).await);
    server.await.unwrap();

    // the reader stops on close, ending the inbound stream
    let end = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap();
    assert!(end.is_none());
    drop(channel);
}
