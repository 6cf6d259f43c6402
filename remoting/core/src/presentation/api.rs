// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP endpoint for command exchanges.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/remoting` | Exchange one command batch |
//! | `DELETE` | `/remoting` | Close the caller's session |
//! | `GET` | `/health` | Liveness and session count |
//! | `GET` | `/diagnostics` | Registered diagnostics sources |
//!
//! Sessions are carried in the `X-Remoting-Session` header. A request without
//! the header starts a new session and the response names it. An id the server
//! no longer knows is answered with `404`; the client discards its models and
//! reconnects without the header. A release-only batch never opens a session.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::application::server_connector::{ServerConnector, ServerError};
use crate::domain::command::CommandBatch;
use crate::domain::session::SessionId;
use crate::infrastructure::codec::{Codec, JsonCodec};

pub const SESSION_HEADER: &str = "x-remoting-session";

pub struct ApiState {
    pub connector: Arc<ServerConnector>,
    pub codec: Arc<dyn Codec>,
    pub started_at: Instant,
}

/// Router with the remoting endpoint mounted at `endpoint_path`.
pub fn app(connector: Arc<ServerConnector>, endpoint_path: &str) -> Router {
    let state = Arc::new(ApiState {
        connector,
        codec: Arc::new(JsonCodec),
        started_at: Instant::now(),
    });

    Router::new()
        .route(endpoint_path, post(exchange_handler).delete(close_handler))
        .route("/health", get(health_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .with_state(state)
}

fn session_header(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(SessionId::parse)
}

enum SessionHeader {
    Missing,
    Malformed,
    Present(SessionId),
}

fn read_session_header(headers: &HeaderMap) -> SessionHeader {
    match headers.get(SESSION_HEADER) {
        None => SessionHeader::Missing,
        Some(_) => session_header(headers).map_or(SessionHeader::Malformed, SessionHeader::Present),
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn server_error_response(error: ServerError) -> Response {
    match error {
        ServerError::ShuttingDown => error_response(StatusCode::SERVICE_UNAVAILABLE, error.to_string()),
        ServerError::UnknownSession(_) => error_response(StatusCode::NOT_FOUND, error.to_string()),
        other => {
            error!(error = %other, "Remoting exchange failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

async fn exchange_handler(State(state): State<Arc<ApiState>>, headers: HeaderMap, body: Bytes) -> Response {
    let batch = match state.codec.decode(&body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "Rejecting undecodable batch");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let session_id = match read_session_header(&headers) {
        SessionHeader::Present(id) => id,
        SessionHeader::Malformed => {
            warn!("Rejecting malformed session header");
            return error_response(StatusCode::BAD_REQUEST, "malformed session header");
        }
        SessionHeader::Missing if batch.is_release_only() => {
            debug!("Ignoring release without a session");
            return encode_response(&state, &CommandBatch::default(), None);
        }
        SessionHeader::Missing => match state.connector.open_session().await {
            Ok(session) => session.id,
            Err(e) => return server_error_response(e),
        },
    };

    debug!(session_id = %session_id, commands = batch.len(), "Remoting request");
    let response = match state.connector.handle(session_id, batch).await {
        Ok(response) => response,
        Err(e) => return server_error_response(e),
    };

    encode_response(&state, &response, Some(session_id))
}

fn encode_response(state: &ApiState, batch: &CommandBatch, session_id: Option<SessionId>) -> Response {
    let body = match state.codec.encode(batch) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "Failed to encode response batch");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(state.codec.content_type()));
    if let Some(Ok(value)) = session_id.map(|id| HeaderValue::from_str(&id.to_string())) {
        headers.insert(SESSION_HEADER, value);
    }
    response
}

async fn close_handler(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_header(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "missing session header");
    };
    match state.connector.close_session(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Unknown session: {}", id)),
        Err(e) => server_error_response(e),
    }
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let status = if state.connector.is_shutting_down() {
        "shutting_down"
    } else {
        "healthy"
    };
    Json(json!({
        "status": status,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pending_long_polls": state.connector.pending_long_polls(),
    }))
}

async fn diagnostics_handler(State(state): State<Arc<ApiState>>) -> Response {
    let diagnostics = state.connector.diagnostics();
    if !diagnostics.is_enabled() {
        return error_response(StatusCode::NOT_FOUND, "diagnostics are disabled");
    }
    Json(json!({ "entries": diagnostics.report() })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::actions::ActionRegistry;
    use crate::application::server_connector::ServerSettings;
    use crate::domain::command::Command;
    use crate::infrastructure::diagnostics::DiagnosticsRegistry;
    use crate::infrastructure::session_repository::InMemorySessionRepository;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn connector() -> Arc<ServerConnector> {
        Arc::new(
            ServerConnector::new(
                Arc::new(InMemorySessionRepository::new()),
                Arc::new(ActionRegistry::new()),
                DiagnosticsRegistry::new(true),
                ServerSettings::default(),
            )
            .with_initializer(|store| {
                let _ = store.builder("Greeting").with_id("greeting").with_attribute("text", "hello").create();
            }),
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_first_exchange_opens_session() {
        let app = app(connector(), "/remoting");
        let response = app
            .oneshot(Request::post("/remoting").body(Body::from("")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let session = response.headers().get(SESSION_HEADER).unwrap().to_str().unwrap();
        assert!(SessionId::parse(session).is_some());

        let body = body_json(response).await;
        assert_eq!(body["commands"][0]["kind"], "CreatePresentationModel");
        assert_eq!(body["commands"][0]["modelId"], "greeting");
    }

    #[tokio::test]
    async fn test_known_session_is_reused() {
        let server = connector();
        let session = server.open_session().await.unwrap();
        let app = app(server.clone(), "/remoting");

        let batch = serde_json::to_vec(&CommandBatch::new(vec![Command::action("noop")])).unwrap();
        let response = app
            .oneshot(
                Request::post("/remoting")
                    .header(SESSION_HEADER, session.id.to_string())
                    .body(Body::from(batch))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(SESSION_HEADER).unwrap().to_str().unwrap(),
            session.id.to_string()
        );
    }

    fn post_batch(session: Option<String>, batch: &CommandBatch) -> Request<Body> {
        let mut request = Request::post("/remoting");
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        request.body(Body::from(serde_json::to_vec(batch).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_replaced() {
        let server = connector();
        let stale = SessionId::new().to_string();
        let app = app(server.clone(), "/remoting");

        let response = app
            .oneshot(post_batch(Some(stale), &CommandBatch::new(vec![Command::action("noop")])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(SESSION_HEADER).is_none());
        assert_eq!(server.diagnostics().len(), 0);
    }

    #[tokio::test]
    async fn test_releases_never_open_sessions() {
        let server = connector();
        let release = CommandBatch::new(vec![Command::release()]);
        let stale = SessionId::new().to_string();

        for _ in 0..5 {
            let response = app(server.clone(), "/remoting")
                .oneshot(post_batch(Some(stale.clone()), &release))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let response = app(server.clone(), "/remoting")
            .oneshot(post_batch(None, &release))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_HEADER).is_none());
        assert_eq!(body_json(response).await["commands"].as_array().unwrap().len(), 0);

        assert_eq!(server.diagnostics().len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_session_header_is_rejected() {
        let server = connector();
        let response = app(server.clone(), "/remoting")
            .oneshot(post_batch(Some("not-a-session".to_string()), &CommandBatch::default()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(server.diagnostics().len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_batch_is_rejected() {
        let app = app(connector(), "/remoting");
        let response = app
            .oneshot(Request::post("/remoting").body(Body::from("{not json")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_close_session() {
        let server = connector();
        let session = server.open_session().await.unwrap();
        let app = app(server.clone(), "/remoting");

        let response = app
            .oneshot(
                Request::delete("/remoting")
                    .header(SESSION_HEADER, session.id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(server.find_session(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_health_and_diagnostics() {
        let server = connector();
        server.open_session().await.unwrap();

        let health = app(server.clone(), "/remoting")
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(health).await["status"], "healthy");

        let diagnostics = app(server, "/remoting")
            .oneshot(Request::get("/diagnostics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(diagnostics).await;
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
        assert_eq!(body["entries"][0]["details"]["side"], "server");
    }
}
