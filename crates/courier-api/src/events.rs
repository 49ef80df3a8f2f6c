use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};

use courier_types::events::BoundaryEvent;

use crate::boundary::Boundary;

pub async fn ws_upgrade(State(boundary): State<Boundary>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, boundary))
}

/// Push every boundary event to one client, starting with the current
/// connection state.
async fn stream_events(socket: WebSocket, boundary: Boundary) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = boundary.subscribe();

    info!("Event subscriber connected");

    let current = BoundaryEvent::StateChanged {
        state: boundary.status(),
    };
    if send_event(&mut sender, &current).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = events.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event subscriber lagged by {} events", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => trace!("Ignoring frame from event subscriber"),
            },
        }
    }

    info!("Event subscriber disconnected");
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &BoundaryEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode boundary event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
