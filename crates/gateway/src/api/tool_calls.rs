//! Tool-call state queries.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use co_domain::Error;

use super::ApiError;
use crate::state::AppState;

/// GET /api/sessions/{id}/tool-calls
pub async fn list_tool_calls(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_session(&id)?.is_none() {
        return Err(Error::SessionMissing(id).into());
    }
    let records = state.store.list_tool_calls(&id)?;
    Ok(Json(json!(records)))
}

/// GET /api/sessions/{id}/tool-calls/pending
pub async fn pending_tool_calls(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_session(&id)?.is_none() {
        return Err(Error::SessionMissing(id).into());
    }
    let records = state.store.pending_tool_calls(&id)?;
    Ok(Json(json!(records)))
}

/// GET /api/sessions/{id}/tool-calls/{tcid}
pub async fn get_tool_call(
    State(state): State<AppState>,
    Path((id, tcid)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .get_tool_call(&tcid)?
        .filter(|r| r.session_id == id)
        .ok_or_else(|| Error::NotFound(format!("tool call {tcid}")))?;
    Ok(Json(json!(record)))
}
