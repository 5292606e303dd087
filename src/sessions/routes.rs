//! REST endpoints for inspecting and cancelling sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use super::dispatcher::Dispatcher;
use super::model::Session;
use crate::error::{Error, SessionError};

/// Session projection returned by the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub is_expired: bool,
}

impl SessionView {
    pub fn new(session: Session) -> Self {
        let is_expired = session.is_expired_at(Utc::now());
        Self {
            session,
            is_expired,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid session id: {raw}")))
}

/// GET /api/sessions/{id}
async fn get_session(State(dispatcher): State<Dispatcher>, Path(raw): Path<String>) -> Response {
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match dispatcher.db().get_session(id).await {
        Ok(Some(session)) => Json(SessionView::new(session)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            error!(session_id = %id, error = %e, "Session lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// DELETE /api/sessions/{id}
///
/// Cancels an active session. Already-terminal sessions come back unchanged.
async fn cancel_session(State(dispatcher): State<Dispatcher>, Path(raw): Path<String>) -> Response {
    let id = match parse_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let session = match dispatcher.db().get_session(id).await {
        Ok(Some(session)) => session,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "session not found"),
        Err(e) => {
            error!(session_id = %id, error = %e, "Session lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    match dispatcher.cancel_session(id, &session.sender_id).await {
        Ok(session) => {
            info!(session_id = %id, state = %session.state, "Admin cancel handled");
            Json(SessionView::new(session)).into_response()
        }
        Err(Error::Session(SessionError::NotFound { .. })) => {
            error_response(StatusCode::NOT_FOUND, "session not found")
        }
        Err(e) => {
            error!(session_id = %id, error = %e, "Admin cancel failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "listing-bot" }))
}

/// Build the session REST routes.
pub fn session_routes(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions/{id}", get(get_session).delete(cancel_session))
        .with_state(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::model::Initiator;

    #[test]
    fn view_flattens_session_and_flags_expiry() {
        let now = Utc::now();
        let session = Session::new(
            "alice",
            Initiator {
                channel_user_id: "alice".into(),
                display_name: None,
            },
            std::time::Duration::from_secs(1),
            now - chrono::Duration::hours(1),
        );
        let json = serde_json::to_value(SessionView::new(session)).unwrap();
        assert_eq!(json["isExpired"], true);
        assert_eq!(json["senderId"], "alice");
        assert_eq!(json["state"], "COLLECTING_IMAGES");
        assert!(json.get("version").is_none());
    }

    #[test]
    fn malformed_id_is_bad_request() {
        let resp = parse_id("not-a-uuid").unwrap_err();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
