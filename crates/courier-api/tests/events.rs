//! The `/events` WebSocket feed, served over a real socket.
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use courier_api::Boundary;
use courier_db::Database;
use courier_gateway::transport::memory::MemoryConnector;
use courier_gateway::{Connection, ConnectionConfig, Dispatcher, Event};
use courier_types::models::ConnectionState;

async fn serve() -> (String, Dispatcher) {
    let dispatcher = Dispatcher::new();
    let (connector, _peers) = MemoryConnector::new();
    let connection = Connection::new(connector, dispatcher.clone(), ConnectionConfig::default());
    let db = Arc::new(Database::open_in_memory().unwrap());
    let boundary = Boundary::new(connection, &dispatcher, db, None);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, courier_api::router(boundary)).await.unwrap();
    });

    (format!("ws://{}/events", addr), dispatcher)
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn first_frame_is_current_state() {
    let (url, _dispatcher) = serve().await;
    let (mut ws, _) = connect_async(url).await.unwrap();

    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "state-changed", "data": { "state": "offline" } })
    );
}

#[tokio::test]
async fn later_state_changes_are_pushed() {
    let (url, dispatcher) = serve().await;
    let (mut ws, _) = connect_async(url).await.unwrap();
    next_json(&mut ws).await;

    dispatcher.publish(&Event::StateChange(ConnectionState::Reconnecting));

    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "state-changed", "data": { "state": "reconnecting" } })
    );
}
