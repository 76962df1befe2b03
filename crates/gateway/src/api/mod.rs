//! HTTP API: session CRUD, per-session model config, tool-call
//! queries, and the WebSocket upgrade.

pub mod sessions;
pub mod tool_calls;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;

use co_domain::Error;

use crate::state::AppState;
use crate::ws;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route(
            "/api/sessions",
            axum::routing::post(sessions::create_session),
        )
        .route(
            "/api/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/api/sessions/:id/messages", get(sessions::list_messages))
        .route(
            "/api/sessions/:id/summarize",
            axum::routing::post(sessions::summarize_session),
        )
        .route(
            "/api/sessions/:id/config",
            get(sessions::get_config).put(sessions::put_config),
        )
        .route(
            "/api/sessions/:id/tool-calls",
            get(tool_calls::list_tool_calls),
        )
        .route(
            "/api/sessions/:id/tool-calls/pending",
            get(tool_calls::pending_tool_calls),
        )
        .route(
            "/api/sessions/:id/tool-calls/:tcid",
            get(tool_calls::get_tool_call),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health — process liveness plus sandbox reachability.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let sandbox_ok = state.sandbox.health().await.unwrap_or(false);
    Json(serde_json::json!({
        "status": "ok",
        "sandbox": if sandbox_ok { "ok" } else { "unreachable" },
    }))
}

/// Error envelope: every failure is `{ "error": "<message>" }` with a
/// status matching the error kind.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::EmptyPrompt | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::SessionMissing(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::SessionBusy(_) => StatusCode::CONFLICT,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({"error": self.0.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let cases = [
            (Error::EmptyPrompt, StatusCode::BAD_REQUEST),
            (
                Error::SessionMissing("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (Error::SessionBusy("x".into()), StatusCode::CONFLICT),
            (Error::PermissionDenied, StatusCode::FORBIDDEN),
            (
                Error::Database("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let resp = ApiError(error).into_response();
            assert_eq!(resp.status(), expected);
        }
    }
}
