//! The consuming application's view of the delivery pipeline, and the HTTP
//! and WebSocket surface that exposes it.

pub mod boundary;
pub mod connection;
pub mod conversations;
pub mod events;

use axum::{
    Router,
    routing::{get, post, put},
};

pub use boundary::{Boundary, PeerControl};

/// All boundary routes, without middleware.
pub fn router(boundary: Boundary) -> Router {
    Router::new()
        .route("/connection/status", get(connection::get_status))
        .route("/connection/simulate-drop", post(connection::simulate_drop))
        .route("/focus", put(connection::set_focus))
        .route("/events", get(events::ws_upgrade))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversation_id}/read", post(conversations::mark_read))
        .route("/conversations/{conversation_id}/messages", get(conversations::get_messages))
        .route(
            "/conversations/{conversation_id}/messages/search",
            get(conversations::search_messages),
        )
        .with_state(boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use courier_db::Database;
    use courier_gateway::transport::memory::MemoryConnector;
    use courier_gateway::{Connection, ConnectionConfig, Dispatcher};
    use courier_types::events::MessageEnvelope;

    /// Boundary over a store holding `conversations` conversations, each one
    /// minute apart, with no connection attempt made.
    fn setup(conversations: i64) -> (Boundary, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for n in 1..=conversations {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, n as u32, 0).unwrap();
            db.create_conversation(&format!("Conversation {n}"), &at).unwrap();
        }
        let dispatcher = Dispatcher::new();
        let (connector, _peers) = MemoryConnector::new();
        let connection = Connection::new(connector, dispatcher.clone(), ConnectionConfig::default());
        (Boundary::new(connection, &dispatcher, db.clone(), None), db)
    }

    fn deliver(db: &Database, conversation_id: i64, minute: u32, body: &str) {
        let envelope = MessageEnvelope {
            conversation_id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap(),
            sender: "Alice".into(),
            body: body.into(),
        };
        db.record_delivery(&envelope, true).unwrap();
    }

    async fn call(boundary: &Boundary, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let res = router(boundary.clone()).oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn status_reports_connection_state() {
        let (boundary, _) = setup(0);
        let (status, body) = call(&boundary, "GET", "/connection/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "offline" }));
    }

    #[tokio::test]
    async fn simulate_drop_without_peer_reports_failure() {
        let (boundary, _) = setup(0);
        let (status, body) = call(&boundary, "POST", "/connection/simulate-drop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": false }));
    }

    #[tokio::test]
    async fn focus_can_be_set_and_cleared() {
        let (boundary, _) = setup(0);

        let (status, _) = call(&boundary, "PUT", "/focus", Some(json!({ "conversationId": 7 }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(boundary.focused(), Some(7));

        let (status, _) = call(&boundary, "PUT", "/focus", Some(json!({ "conversationId": null }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(boundary.focused(), None);

        let (status, _) = call(&boundary, "PUT", "/focus", Some(json!({ "conversationId": -1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(boundary.focused(), None);
    }

    #[tokio::test]
    async fn conversations_page_newest_first() {
        let (boundary, db) = setup(5);
        deliver(&db, 2, 0, "bump");

        let (status, body) = call(&boundary, "GET", "/conversations?limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 5);
        assert_eq!(body["hasMore"], true);
        let ids: Vec<i64> = body["conversations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![2, 5]);
        assert_eq!(body["conversations"][0]["unreadCount"], 1);

        let (_, body) = call(&boundary, "GET", "/conversations?limit=2&offset=4", None).await;
        assert_eq!(body["conversations"].as_array().unwrap().len(), 1);
        assert_eq!(body["hasMore"], false);
    }

    #[tokio::test]
    async fn mark_read_resets_unread() {
        let (boundary, db) = setup(1);
        deliver(&db, 1, 0, "one");
        deliver(&db, 1, 1, "two");
        assert_eq!(db.get_conversation(1).unwrap().unwrap().unread_count, 2);

        let (status, body) = call(&boundary, "POST", "/conversations/1/read", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert_eq!(db.get_conversation(1).unwrap().unwrap().unread_count, 0);

        let (status, _) = call(&boundary, "POST", "/conversations/99/read", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn messages_and_search() {
        let (boundary, db) = setup(1);
        deliver(&db, 1, 0, "Lunch at noon?");
        deliver(&db, 1, 1, "sure");
        deliver(&db, 1, 2, "what about LUNCH tomorrow");

        let (status, body) = call(&boundary, "GET", "/conversations/1/messages", None).await;
        assert_eq!(status, StatusCode::OK);
        let bodies: Vec<&str> = body.as_array().unwrap().iter().map(|m| m["body"].as_str().unwrap()).collect();
        assert_eq!(bodies, vec!["what about LUNCH tomorrow", "sure", "Lunch at noon?"]);
        assert_eq!(body[0]["ts"], "2024-01-15T10:02:00.000Z");

        let (status, body) = call(&boundary, "GET", "/conversations/1/messages/search?q=lunch", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = call(&boundary, "GET", "/conversations/1/messages/search?q=%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&boundary, "GET", "/conversations/42/messages", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
