//! CRUD facade over the SQLite schema.
//!
//! `message_count` is maintained by the store itself (incremented in
//! the same transaction as each insert) so it stays monotonic no matter
//! how stale the caller's in-memory session is; token counters and cost
//! are written by [`SessionStore::save_step`] together with the message
//! snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use co_domain::config::SessionModelConfig;
use co_domain::message::{Message, MessagePart, Role, Session, ToolCallRecord, ToolCallStatus};
use co_domain::{Error, Result};

use crate::db::{db_err, Db};

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Db>,
}

impl SessionStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Sessions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, project_id, title, message_count, prompt_tokens,
                                   completion_tokens, cost, summary_message_id, provider,
                                   model, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session.id,
                session.project_id,
                session.title,
                session.message_count as i64,
                session.prompt_tokens as i64,
                session.completion_tokens as i64,
                session.cost,
                session.summary_message_id,
                session.provider,
                session.model,
                ts(&session.created_at),
                ts(&session.updated_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.db.conn.lock();
        conn.query_row(
            "SELECT id, project_id, title, message_count, prompt_tokens, completion_tokens,
                    cost, summary_message_id, provider, model, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![id],
            row_to_session,
        )
        .optional()
        .map_err(db_err)
    }

    /// Update the session's mutable fields. `message_count` is owned by
    /// the store and deliberately not written here.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        let conn = self.db.conn.lock();
        let n = conn
            .execute(
                "UPDATE sessions
                 SET title = ?2, prompt_tokens = ?3, completion_tokens = ?4, cost = ?5,
                     summary_message_id = ?6, provider = ?7, model = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    session.id,
                    session.title,
                    session.prompt_tokens as i64,
                    session.completion_tokens as i64,
                    session.cost,
                    session.summary_message_id,
                    session.provider,
                    session.model,
                    ts(&Utc::now()),
                ],
            )
            .map_err(db_err)?;
        if n == 0 {
            return Err(Error::SessionMissing(session.id.clone()));
        }
        Ok(())
    }

    /// Cascade-delete a session with its messages, tool calls, and
    /// config row.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Messages
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_message(&self, message: &Message) -> Result<()> {
        let parts = serde_json::to_string(&message.parts)?;
        let mut conn = self.db.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO messages (id, session_id, role, parts, model, provider,
                                   is_summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.session_id,
                role_str(message.role),
                parts,
                message.model,
                message.provider,
                message.is_summary,
                ts(&message.created_at),
                ts(&message.updated_at),
            ],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE sessions SET message_count = message_count + 1, updated_at = ?2
             WHERE id = ?1",
            params![message.session_id, ts(&Utc::now())],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn update_message(&self, message: &Message) -> Result<()> {
        let parts = serde_json::to_string(&message.parts)?;
        let conn = self.db.conn.lock();
        conn.execute(
            "UPDATE messages SET parts = ?2, model = ?3, provider = ?4,
                                 is_summary = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                message.id,
                parts,
                message.model,
                message.provider,
                message.is_summary,
                ts(&Utc::now()),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn delete_message(&self, id: &str) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])
            .map_err(db_err)?;
        Ok(())
    }

    /// All messages of a session in creation order (rowid breaks ties
    /// within one timestamp).
    pub fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, parts, model, provider, is_summary,
                        created_at, updated_at
                 FROM messages WHERE session_id = ?1
                 ORDER BY created_at, rowid",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_message)
            .map_err(db_err)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(db_err)?);
        }
        Ok(messages)
    }

    /// Persist a step boundary: the message snapshot and the session's
    /// counters in one transaction.
    pub fn save_step(&self, message: &Message, session: &Session) -> Result<()> {
        let parts = serde_json::to_string(&message.parts)?;
        let mut conn = self.db.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO messages (id, session_id, role, parts, model, provider,
                                   is_summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 parts = excluded.parts, model = excluded.model,
                 provider = excluded.provider, is_summary = excluded.is_summary,
                 updated_at = excluded.updated_at",
            params![
                message.id,
                message.session_id,
                role_str(message.role),
                parts,
                message.model,
                message.provider,
                message.is_summary,
                ts(&message.created_at),
                ts(&Utc::now()),
            ],
        )
        .map_err(db_err)?;
        tx.execute(
            "UPDATE sessions
             SET prompt_tokens = ?2, completion_tokens = ?3, cost = ?4,
                 summary_message_id = ?5, provider = ?6, model = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                session.id,
                session.prompt_tokens as i64,
                session.completion_tokens as i64,
                session.cost,
                session.summary_message_id,
                session.provider,
                session.model,
                ts(&Utc::now()),
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tool calls
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_tool_call(&self, record: &ToolCallRecord) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            "INSERT INTO tool_calls (id, session_id, message_id, name, input, status,
                                     result, is_error, error_message, created_at,
                                     updated_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.session_id,
                record.message_id,
                record.name,
                serde_json::to_string(&record.input)?,
                status_str(record.status),
                record.result,
                record.is_error,
                record.error_message,
                ts(&record.created_at),
                ts(&record.updated_at),
                record.started_at.as_ref().map(ts),
                record.finished_at.as_ref().map(ts),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn update_tool_call(&self, record: &ToolCallRecord) -> Result<()> {
        let conn = self.db.conn.lock();
        conn.execute(
            "UPDATE tool_calls
             SET input = ?2, status = ?3, result = ?4, is_error = ?5,
                 error_message = ?6, updated_at = ?7, started_at = ?8, finished_at = ?9
             WHERE id = ?1",
            params![
                record.id,
                serde_json::to_string(&record.input)?,
                status_str(record.status),
                record.result,
                record.is_error,
                record.error_message,
                ts(&Utc::now()),
                record.started_at.as_ref().map(ts),
                record.finished_at.as_ref().map(ts),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_tool_call(&self, id: &str) -> Result<Option<ToolCallRecord>> {
        let conn = self.db.conn.lock();
        conn.query_row(
            "SELECT id, session_id, message_id, name, input, status, result, is_error,
                    error_message, created_at, updated_at, started_at, finished_at
             FROM tool_calls WHERE id = ?1",
            params![id],
            row_to_tool_call,
        )
        .optional()
        .map_err(db_err)
    }

    pub fn list_tool_calls(&self, session_id: &str) -> Result<Vec<ToolCallRecord>> {
        self.query_tool_calls(
            "SELECT id, session_id, message_id, name, input, status, result, is_error,
                    error_message, created_at, updated_at, started_at, finished_at
             FROM tool_calls WHERE session_id = ?1 ORDER BY created_at, rowid",
            session_id,
        )
    }

    /// Tool calls not yet in a terminal status.
    pub fn pending_tool_calls(&self, session_id: &str) -> Result<Vec<ToolCallRecord>> {
        self.query_tool_calls(
            "SELECT id, session_id, message_id, name, input, status, result, is_error,
                    error_message, created_at, updated_at, started_at, finished_at
             FROM tool_calls
             WHERE session_id = ?1
               AND status IN ('pending', 'awaiting_permission', 'running')
             ORDER BY created_at, rowid",
            session_id,
        )
    }

    /// Mark every in-flight tool call of a session as cancelled and
    /// return the updated records.
    pub fn cancel_session_tool_calls(&self, session_id: &str) -> Result<Vec<ToolCallRecord>> {
        let pending = self.pending_tool_calls(session_id)?;
        let now = Utc::now();
        {
            let conn = self.db.conn.lock();
            conn.execute(
                "UPDATE tool_calls
                 SET status = 'cancelled', finished_at = ?2, updated_at = ?2
                 WHERE session_id = ?1
                   AND status IN ('pending', 'awaiting_permission', 'running')",
                params![session_id, ts(&now)],
            )
            .map_err(db_err)?;
        }
        Ok(pending
            .into_iter()
            .map(|mut r| {
                r.status = ToolCallStatus::Cancelled;
                r.finished_at = Some(now);
                r.updated_at = now;
                r
            })
            .collect())
    }

    fn query_tool_calls(&self, sql: &str, session_id: &str) -> Result<Vec<ToolCallRecord>> {
        let conn = self.db.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_tool_call)
            .map_err(db_err)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?);
        }
        Ok(records)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Model config
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn get_model_config(&self, session_id: &str) -> Result<Option<SessionModelConfig>> {
        let conn = self.db.conn.lock();
        let blob: Option<String> = conn
            .query_row(
                "SELECT config FROM session_configs WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match blob {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn set_model_config(&self, session_id: &str, config: &SessionModelConfig) -> Result<()> {
        let blob = serde_json::to_string(config)?;
        let conn = self.db.conn.lock();
        conn.execute(
            "INSERT INTO session_configs (session_id, config, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                 config = excluded.config, updated_at = excluded.updated_at",
            params![session_id, blob, ts(&Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

fn status_str(status: ToolCallStatus) -> &'static str {
    match status {
        ToolCallStatus::Pending => "pending",
        ToolCallStatus::AwaitingPermission => "awaiting_permission",
        ToolCallStatus::Running => "running",
        ToolCallStatus::Completed => "completed",
        ToolCallStatus::Error => "error",
        ToolCallStatus::Cancelled => "cancelled",
        ToolCallStatus::Timeout => "timeout",
    }
}

fn parse_status(s: &str) -> ToolCallStatus {
    match s {
        "awaiting_permission" => ToolCallStatus::AwaitingPermission,
        "running" => ToolCallStatus::Running,
        "completed" => ToolCallStatus::Completed,
        "error" => ToolCallStatus::Error,
        "cancelled" => ToolCallStatus::Cancelled,
        "timeout" => ToolCallStatus::Timeout,
        _ => ToolCallStatus::Pending,
    }
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        message_count: row.get::<_, i64>(3)? as u64,
        prompt_tokens: row.get::<_, i64>(4)? as u64,
        completion_tokens: row.get::<_, i64>(5)? as u64,
        cost: row.get(6)?,
        summary_message_id: row.get(7)?,
        provider: row.get(8)?,
        model: row.get(9)?,
        created_at: parse_ts(&row.get::<_, String>(10)?),
        updated_at: parse_ts(&row.get::<_, String>(11)?),
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let parts: Vec<MessagePart> =
        serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: parse_role(&row.get::<_, String>(2)?),
        parts,
        model: row.get(4)?,
        provider: row.get(5)?,
        is_summary: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?),
        updated_at: parse_ts(&row.get::<_, String>(8)?),
    })
}

fn row_to_tool_call(row: &Row<'_>) -> rusqlite::Result<ToolCallRecord> {
    Ok(ToolCallRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        message_id: row.get(2)?,
        name: row.get(3)?,
        input: serde_json::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(serde_json::Value::Null),
        status: parse_status(&row.get::<_, String>(5)?),
        result: row.get(6)?,
        is_error: row.get(7)?,
        error_message: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?),
        updated_at: parse_ts(&row.get::<_, String>(10)?),
        started_at: row.get::<_, Option<String>>(11)?.map(|s| parse_ts(&s)),
        finished_at: row.get::<_, Option<String>>(12)?.map(|s| parse_ts(&s)),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
