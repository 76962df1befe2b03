//! Session CRUD and per-session model config endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use co_domain::config::SessionModelConfig;
use co_domain::event::{BusEvent, EventOp};
use co_domain::message::Session;
use co_domain::Error;

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub project_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model_config: Option<SessionModelConfig>,
    /// Use the globally configured auto model.
    #[serde(default)]
    pub is_auto: bool,
    /// Auto-grant every permission request for this session
    /// (non-interactive runs).
    #[serde(default)]
    pub auto_approve: bool,
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let title = req.title.unwrap_or_else(|| "New session".into());
    let session = Session::new(&req.project_id, title);
    state.store.create_session(&session)?;

    // Explicit config wins; `is_auto` (or no config at all) falls back
    // to the configured auto model at run time.
    if let Some(config) = req.model_config.filter(|_| !req.is_auto) {
        state.store.set_model_config(&session.id, &config)?;
    }
    if req.auto_approve {
        state.broker.auto_approve_session(&session.id);
    }

    state.bus.publish(BusEvent::Session {
        op: EventOp::Created,
        session: session.clone(),
    });
    Ok(Json(session))
}

/// GET /api/sessions/{id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let session = state
        .store
        .get_session(&id)?
        .ok_or(Error::SessionMissing(id))?;
    Ok(Json(session))
}

/// GET /api/sessions/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_session(&id)?.is_none() {
        return Err(Error::SessionMissing(id).into());
    }
    let messages = state.store.list_messages(&id)?;
    Ok(Json(json!(messages)))
}

/// DELETE /api/sessions/{id} — cascades over messages, tool calls, and
/// config; also drops stream state and the sandbox container.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state
        .store
        .get_session(&id)?
        .ok_or_else(|| Error::SessionMissing(id.clone()))?;

    state.coordinator.cancel(&id);
    state.store.delete_session(&id)?;
    state.eventlog.remove_session(&id);
    if let Err(e) = state.sandbox.delete_session(&id).await {
        tracing::warn!(error = %e, session_id = %id, "sandbox cleanup failed");
    }

    state.bus.publish(BusEvent::History {
        op: EventOp::Deleted,
        session_id: id,
    });
    state.bus.publish(BusEvent::Session {
        op: EventOp::Deleted,
        session,
    });
    Ok(Json(json!({"deleted": true})))
}

/// POST /api/sessions/{id}/summarize — explicit summarization. Unlike
/// a prompt, a busy session is a 409 here.
pub async fn summarize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.coordinator.summarize(&id).await?;
    Ok(Json(json!({"summarized": true})))
}

/// GET /api/sessions/{id}/config — the API key is masked on read.
pub async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_session(&id)?.is_none() {
        return Err(Error::SessionMissing(id).into());
    }
    let config = state
        .store
        .get_model_config(&id)?
        .unwrap_or_else(|| SessionModelConfig::from_auto(&state.config.auto_model));

    let mut value = serde_json::to_value(&config).map_err(Error::Json)?;
    value["api_key"] = match config.masked_api_key() {
        Some(masked) => json!(masked),
        None => Value::Null,
    };
    Ok(Json(value))
}

/// PUT /api/sessions/{id}/config — takes effect at the next run.
pub async fn put_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<SessionModelConfig>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_session(&id)?.is_none() {
        return Err(Error::SessionMissing(id).into());
    }
    state.store.set_model_config(&id, &config)?;
    Ok(Json(json!({"updated": true})))
}
