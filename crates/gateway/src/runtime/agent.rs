//! The per-session agent: accepts prompts, drives the model stream,
//! dispatches tool calls behind the permission broker, maintains the
//! queue, and finalizes every run with exactly one terminal `Finish`
//! part.
//!
//! Concurrency model: at most one run mutates a session at a time (the
//! active-runs map is the lock); delta handling publishes full message
//! snapshots to the bus and never writes the store — persistence
//! happens at step and tool-call boundaries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures_util::StreamExt;
use serde_json::Value;

use co_domain::config::SessionModelConfig;
use co_domain::event::{BusEvent, EventOp};
use co_domain::message::{
    FinishReason, Message, MessagePart, Role, Session, ToolCallRecord, ToolCallStatus,
};
use co_domain::stream::{DeltaEvent, StepStopReason, Usage};
use co_domain::{Error, Result};
use co_eventlog::EventLog;
use co_providers::{ModelPair, ToolSpec};
use co_sessions::SessionStore;
use co_tools::fetch::UrlFetcher;
use co_tools::{CallCtx, Tool, ToolRegistry, ToolResponse};

use super::bus::EventBus;
use super::cancel::{ActiveRuns, CancelToken};
use super::permission::{PermissionBroker, PermissionInput};
use super::queue::PromptQueue;
use super::{summarize, title};
use crate::prompts;

/// Hard cap on model steps per run.
const MAX_STEPS: usize = 50;
/// Tool HTTP calls get a generous deadline; the run token can cut it
/// short at any point.
const TOOL_TIMEOUT: Duration = Duration::from_secs(300);
/// Bounded drain for `cancel_all`.
const CANCEL_ALL_DRAIN: Duration = Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct CallParams {
    pub max_output_tokens: Option<u64>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// An image attachment, referenced by URL (http(s) or data URI).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub url: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentCall {
    pub session_id: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    pub params: CallParams,
}

impl AgentCall {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            params: CallParams::default(),
        }
    }
}

/// Everything a run needs, built by the coordinator from the session's
/// config at the start of the run.
pub struct RunEnv {
    pub models: ModelPair,
    pub tools: ToolRegistry,
    pub workdir: String,
    pub system_prompt: String,
    pub model_config: SessionModelConfig,
}

/// What the step loop decided after a successful run.
struct StepsOutcome {
    summarize: bool,
    /// Set when summarization interrupted a step that still had tool
    /// calls pending model feedback.
    interrupted_prompt: Option<String>,
}

/// A failure mid-step, carrying the assistant message to finalize.
struct StepError {
    error: Error,
    assistant: Message,
    session: Session,
    resolved: HashSet<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionAgent {
    pub store: SessionStore,
    pub eventlog: Arc<EventLog>,
    pub bus: Arc<EventBus>,
    pub broker: Arc<PermissionBroker>,
    pub active: ActiveRuns,
    pub queue: PromptQueue,
    pub fetcher: UrlFetcher,
    pub disable_auto_summarize: bool,
}

impl SessionAgent {
    // ── Introspection / control ───────────────────────────────────

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.active.is_busy(session_id)
    }

    pub fn is_busy(&self) -> bool {
        self.active.any_busy()
    }

    pub fn queued_prompts(&self, session_id: &str) -> Vec<String> {
        self.queue.prompts(session_id)
    }

    pub fn clear_queue(&self, session_id: &str) {
        self.queue.clear(session_id);
    }

    /// Cancel a session's run: fire the token, drop queued prompts,
    /// deny pending permissions, and mark in-flight tool-call records
    /// cancelled. Idempotent.
    pub fn cancel(&self, session_id: &str) {
        self.queue.clear(session_id);
        // Token first: a permission waiter races its denial against the
        // token and must see the cancel, not a plain denial.
        self.active.cancel(session_id);
        self.broker.cancel_session(session_id);
        match self.store.cancel_session_tool_calls(session_id) {
            Ok(records) => {
                for record in records {
                    self.publish_tool_call(&record);
                }
            }
            Err(e) => tracing::warn!(error = %e, session_id, "failed to cancel tool calls"),
        }
    }

    /// Cancel every active session and wait (bounded) for the runs to
    /// drain.
    pub async fn cancel_all(&self) {
        for session_id in self.active.active_sessions() {
            self.cancel(&session_id);
        }
        let deadline = std::time::Instant::now() + CANCEL_ALL_DRAIN;
        while self.active.any_busy() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.active.any_busy() {
            tracing::warn!("some runs did not drain within the cancel window");
        }
    }

    // ── Run ───────────────────────────────────────────────────────

    /// Execute one run. The caller has already claimed the session via
    /// the active-runs map and passes its token.
    pub async fn run(&self, call: AgentCall, env: &RunEnv, token: &CancelToken) -> Result<()> {
        let session_id = call.session_id.clone();
        self.eventlog.set_active(&session_id, true);

        let result = self.run_inner(call, env, token).await;

        self.eventlog.set_active(&session_id, false);
        self.bus.publish(BusEvent::GenerationComplete {
            session_id,
            error: result.is_err(),
        });
        result
    }

    async fn run_inner(&self, call: AgentCall, env: &RunEnv, token: &CancelToken) -> Result<()> {
        let session_id = call.session_id.clone();
        let mut session = self
            .store
            .get_session(&session_id)?
            .ok_or_else(|| Error::SessionMissing(session_id.clone()))?;
        session.provider = Some(env.models.large.provider().to_string());
        session.model = Some(env.models.large.id().to_string());

        // History, sliced at the summary boundary when one exists.
        let mut history = self.load_history(&session)?;
        self.hydrate_history(&mut history).await;
        let first_message = history.is_empty();

        // Persist and publish the user turn.
        let user_msg = self.build_user_message(&call).await;
        self.store.create_message(&user_msg)?;
        self.publish_message(EventOp::Created, &user_msg);
        history.push(user_msg);

        if first_message {
            title::spawn_title_generation(
                env.models.small.clone(),
                self.store.clone(),
                self.bus.clone(),
                session_id.clone(),
                call.prompt.clone(),
            );
        }

        match self
            .drive_steps(&call, env, token, session.clone(), history)
            .await
        {
            Ok((outcome, mut session)) => {
                if outcome.summarize && !self.disable_auto_summarize {
                    summarize::run_summary(self, env, &mut session, token).await?;
                    if let Some(prompt) = outcome.interrupted_prompt {
                        self.queue.push(AgentCall::new(
                            session_id,
                            prompts::interrupted_prompt(&prompt),
                        ));
                    }
                }
                Ok(())
            }
            Err(step_error) => Err(self.finalize_error(step_error).await),
        }
    }

    /// The step loop. On success returns the outcome and the updated
    /// session; on failure carries everything the finalizer needs.
    async fn drive_steps(
        &self,
        call: &AgentCall,
        env: &RunEnv,
        token: &CancelToken,
        mut session: Session,
        mut history: Vec<Message>,
    ) -> std::result::Result<(StepsOutcome, Session), Box<StepError>> {
        let session_id = call.session_id.clone();
        let mut resolved: HashSet<String> = HashSet::new();

        for _step in 0..MAX_STEPS {
            // Step preparation: drain prompts queued while we were
            // streaming; each becomes a user message in this history.
            for queued in self.queue.drain(&session_id) {
                let msg = self.build_user_message(&queued).await;
                if let Err(e) = self.store.create_message(&msg) {
                    tracing::warn!(error = %e, "failed to persist queued prompt");
                }
                self.publish_message(EventOp::Created, &msg);
                history.push(msg);
            }

            let mut assistant = Message::new(&session_id, Role::Assistant);
            assistant.model = Some(env.models.large.id().to_string());
            assistant.provider = Some(env.models.large.provider().to_string());
            if let Err(e) = self.store.create_message(&assistant) {
                return Err(Box::new(StepError {
                    error: e,
                    assistant,
                    session,
                    resolved,
                }));
            }
            self.publish_message(EventOp::Created, &assistant);

            let model_call = self.build_model_call(env, call, &history);
            let mut stream = match env.models.large.stream(model_call).await {
                Ok(s) => s,
                Err(e) => {
                    return Err(Box::new(StepError {
                        error: e,
                        assistant,
                        session,
                        resolved,
                    }))
                }
            };

            let mut stop: Option<StepStopReason> = None;
            let mut provider_tool_msgs: Vec<Message> = Vec::new();

            loop {
                let delta = tokio::select! {
                    d = stream.next() => d,
                    _ = token.cancelled() => {
                        return Err(Box::new(StepError {
                            error: Error::Cancelled,
                            assistant,
                            session,
                            resolved,
                        }));
                    }
                };
                let Some(delta) = delta else { break };
                let delta = match delta {
                    Ok(d) => d,
                    Err(e) => {
                        return Err(Box::new(StepError {
                            error: e,
                            assistant,
                            session,
                            resolved,
                        }))
                    }
                };

                match delta {
                    DeltaEvent::TextDelta { text, .. } => {
                        assistant.append_text(&text);
                        self.publish_message(EventOp::Updated, &assistant);
                    }
                    DeltaEvent::ReasoningStart { .. } => {}
                    DeltaEvent::ReasoningDelta { text, .. } => {
                        assistant.append_reasoning(&text);
                        self.publish_message(EventOp::Updated, &assistant);
                    }
                    DeltaEvent::ReasoningEnd {
                        signature, metadata, ..
                    } => {
                        assistant.finish_reasoning(signature, metadata);
                        self.publish_message(EventOp::Updated, &assistant);
                    }
                    DeltaEvent::ToolInputStart { id, name } => {
                        assistant.add_tool_call(&id, &name);
                        let record =
                            ToolCallRecord::new(&id, &session_id, &assistant.id, &name);
                        if let Err(e) = self.store.create_tool_call(&record) {
                            tracing::warn!(error = %e, "failed to record tool call");
                        }
                        self.publish_tool_call(&record);
                        self.publish_message(EventOp::Updated, &assistant);
                    }
                    DeltaEvent::ToolCall { id, name, input } => {
                        if !assistant.finish_tool_call(&id, input.clone()) {
                            // Provider skipped the input-start event.
                            assistant.add_tool_call(&id, &name);
                            assistant.finish_tool_call(&id, input.clone());
                            let record =
                                ToolCallRecord::new(&id, &session_id, &assistant.id, &name);
                            if let Err(e) = self.store.create_tool_call(&record) {
                                tracing::warn!(error = %e, "failed to record tool call");
                            }
                        }
                        if let Ok(Some(mut record)) = self.store.get_tool_call(&id) {
                            record.input = input;
                            if let Err(e) = self.store.update_tool_call(&record) {
                                tracing::warn!(error = %e, "failed to update tool call input");
                            }
                            self.publish_tool_call(&record);
                        }
                        self.publish_message(EventOp::Updated, &assistant);
                    }
                    DeltaEvent::ToolResult {
                        tool_call_id,
                        name,
                        content,
                    } => {
                        // Executed on the provider's side; we only record it.
                        assistant.mark_provider_executed(&tool_call_id);
                        resolved.insert(tool_call_id.clone());
                        if let Ok(Some(mut record)) = self.store.get_tool_call(&tool_call_id) {
                            record.status = ToolCallStatus::Completed;
                            record.result = Some(content.clone());
                            record.finished_at = Some(chrono::Utc::now());
                            let _ = self.store.update_tool_call(&record);
                            self.publish_tool_call(&record);
                        }
                        let mut tool_msg = Message::new(&session_id, Role::Tool);
                        tool_msg.parts.push(MessagePart::ToolResult {
                            tool_call_id,
                            name,
                            content,
                            is_error: false,
                            metadata: None,
                        });
                        if let Err(e) = self.store.create_message(&tool_msg) {
                            tracing::warn!(error = %e, "failed to persist provider tool result");
                        }
                        self.publish_message(EventOp::Created, &tool_msg);
                        provider_tool_msgs.push(tool_msg);
                    }
                    DeltaEvent::StepFinish {
                        usage,
                        reason,
                        provider_metadata: _,
                    } => {
                        stop = Some(reason);
                        self.apply_usage(env, &mut session, &usage);
                        assistant.push_finish(map_stop_reason(reason), None, None);
                        if let Err(e) = self.store.save_step(&assistant, &session) {
                            tracing::warn!(error = %e, "failed to persist step boundary");
                        }
                        self.publish_message(EventOp::Updated, &assistant);
                        self.publish_session(&session);
                    }
                    DeltaEvent::Retry { error, delay_ms } => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %error,
                            delay_ms,
                            "provider retry"
                        );
                    }
                }
            }

            // A stream that ends without a step-finish still closes the
            // turn.
            if stop.is_none() {
                assistant.push_finish(FinishReason::EndTurn, None, None);
                if let Err(e) = self.store.save_step(&assistant, &session) {
                    tracing::warn!(error = %e, "failed to persist step boundary");
                }
                self.publish_message(EventOp::Updated, &assistant);
            }

            history.push(assistant.clone());
            history.extend(provider_tool_msgs);

            // Tool dispatch, in the step's call order.
            let calls: Vec<(String, String, Value)> = assistant
                .parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::ToolCall {
                        id,
                        name,
                        input,
                        finished: true,
                        provider_executed: false,
                    } => Some((id.clone(), name.clone(), input.clone())),
                    _ => None,
                })
                .collect();

            // Context-window guard, checked on every step regardless of
            // tool use: stop and summarize once the remaining window
            // drops below the threshold.
            let window = env.models.large.context_window();
            let summarize_now =
                context_exhausted(window, session.prompt_tokens + session.completion_tokens);

            if calls.is_empty() {
                return Ok((
                    StepsOutcome {
                        summarize: summarize_now,
                        interrupted_prompt: None,
                    },
                    session,
                ));
            }

            let mut tool_msg = Message::new(&session_id, Role::Tool);
            if let Err(e) = self.store.create_message(&tool_msg) {
                tracing::warn!(error = %e, "failed to create tool message");
            }
            for (call_id, name, input) in calls {
                let response = match self
                    .dispatch_tool(env, &session_id, &call_id, &name, input, token)
                    .await
                {
                    Ok(r) => r,
                    Err(error) => {
                        // Keep whatever results we already collected.
                        if !tool_msg.parts.is_empty() {
                            let _ = self.store.update_message(&tool_msg);
                            self.publish_message(EventOp::Updated, &tool_msg);
                        }
                        return Err(Box::new(StepError {
                            error,
                            assistant,
                            session,
                            resolved,
                        }));
                    }
                };
                resolved.insert(call_id.clone());
                tool_msg.parts.push(MessagePart::ToolResult {
                    tool_call_id: call_id,
                    name,
                    content: response.content,
                    is_error: response.is_error,
                    metadata: response.metadata,
                });
                if let Err(e) = self.store.update_message(&tool_msg) {
                    tracing::warn!(error = %e, "failed to persist tool result");
                }
                self.publish_message(EventOp::Updated, &tool_msg);
            }
            history.push(tool_msg);

            // Stopping here leaves the model without its tool results,
            // so the original prompt gets re-queued after the summary.
            if summarize_now {
                return Ok((
                    StepsOutcome {
                        summarize: true,
                        interrupted_prompt: Some(call.prompt.clone()),
                    },
                    session,
                ));
            }
        }

        tracing::warn!(session_id = %session_id, "step limit reached ({MAX_STEPS})");
        Ok((
            StepsOutcome {
                summarize: false,
                interrupted_prompt: None,
            },
            session,
        ))
    }

    // ── Tool dispatch ─────────────────────────────────────────────

    /// Run one tool call: permission gate, record lifecycle, bounded
    /// execution. Tool failures come back as `is_error` responses (the
    /// model may recover); only cancellation and permission denial
    /// abort the run.
    async fn dispatch_tool(
        &self,
        env: &RunEnv,
        session_id: &str,
        call_id: &str,
        name: &str,
        input: Value,
        token: &CancelToken,
    ) -> Result<ToolResponse> {
        let Some(tool) = env.tools.get(name) else {
            self.finish_record(call_id, ToolCallStatus::Error, None, Some("unknown tool"));
            return Ok(ToolResponse::error(format!("Unknown tool: {name}")));
        };

        if let Some(spec) = tool.permission(&input) {
            self.set_record_status(call_id, ToolCallStatus::AwaitingPermission);
            let granted = self
                .broker
                .request(
                    PermissionInput {
                        session_id: session_id.to_owned(),
                        tool_call_id: call_id.to_owned(),
                        tool_name: name.to_owned(),
                        action: spec.action,
                        path: spec.path,
                        description: spec.description,
                        params: input.clone(),
                    },
                    token,
                )
                .await;
            match granted {
                Ok(true) => {}
                Ok(false) => {
                    self.finish_record(
                        call_id,
                        ToolCallStatus::Cancelled,
                        None,
                        Some("permission denied"),
                    );
                    return Err(Error::PermissionDenied);
                }
                Err(e) => {
                    self.finish_record(call_id, ToolCallStatus::Cancelled, None, None);
                    return Err(e);
                }
            }
        }

        self.set_record_started(call_id);

        let ctx = CallCtx {
            session_id: session_id.to_owned(),
            call_id: call_id.to_owned(),
            workdir: env.workdir.clone(),
        };
        let result = tokio::select! {
            r = tool.call(&ctx, input) => r,
            _ = token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(TOOL_TIMEOUT) => Err(Error::Timeout(format!("tool {name}"))),
        };

        match result {
            Ok(response) => {
                let status = if response.is_error {
                    ToolCallStatus::Error
                } else {
                    ToolCallStatus::Completed
                };
                self.finish_record(
                    call_id,
                    status,
                    Some(&response.content),
                    response.is_error.then_some(response.content.as_str()),
                );
                if matches!(name, "diagnostics" | "references") && !response.is_error {
                    self.bus.publish(BusEvent::Lsp {
                        op: EventOp::Updated,
                        session_id: session_id.to_owned(),
                        detail: name.to_owned(),
                    });
                }
                Ok(response)
            }
            Err(Error::Cancelled) => {
                self.finish_record(call_id, ToolCallStatus::Cancelled, None, None);
                Err(Error::Cancelled)
            }
            Err(Error::Timeout(t)) => {
                // A timed-out tool is a tool error, not a run error.
                self.finish_record(call_id, ToolCallStatus::Timeout, None, Some(&t));
                Ok(ToolResponse::error(format!("tool timed out: {t}")))
            }
            Err(e) => {
                let message = e.to_string();
                self.finish_record(call_id, ToolCallStatus::Error, None, Some(&message));
                Ok(ToolResponse::error(message))
            }
        }
    }

    // ── Error finalization ────────────────────────────────────────

    /// Abnormal run ending: close dangling tool calls, synthesize tool
    /// results for orphans, append the terminal `Finish`, persist, and
    /// publish. The history never keeps a finished tool call without a
    /// result unless the finish reason explains it. Returns the error
    /// for the caller to propagate.
    async fn finalize_error(&self, step_error: Box<StepError>) -> Error {
        let StepError {
            error,
            mut assistant,
            mut session,
            resolved,
        } = *step_error;
        let session_id = assistant.session_id.clone();

        assistant.finish_dangling_tool_calls();

        let orphans: Vec<(String, String)> = assistant
            .parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::ToolCall { id, name, .. } if !resolved.contains(id) => {
                    Some((id.clone(), name.clone()))
                }
                _ => None,
            })
            .collect();

        if !orphans.is_empty() {
            let content = synthetic_tool_content(&error);
            let mut tool_msg = Message::new(&session_id, Role::Tool);
            for (call_id, name) in orphans {
                tool_msg.parts.push(MessagePart::ToolResult {
                    tool_call_id: call_id,
                    name,
                    content: content.to_string(),
                    is_error: true,
                    metadata: None,
                });
            }
            if let Err(e) = self.store.create_message(&tool_msg) {
                tracing::warn!(error = %e, "failed to persist synthetic tool results");
            }
            self.publish_message(EventOp::Created, &tool_msg);
        }

        // In-flight records become cancelled.
        match self.store.cancel_session_tool_calls(&session_id) {
            Ok(records) => {
                for record in records {
                    self.publish_tool_call(&record);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to cancel tool-call records"),
        }

        let (reason, title, details) = finish_for_error(&error);
        assistant.push_finish(reason, title, details);
        if let Err(e) = self.store.save_step(&assistant, &session) {
            tracing::warn!(error = %e, "failed to persist final assistant message");
        }
        session.updated_at = chrono::Utc::now();
        self.publish_message(EventOp::Updated, &assistant);
        self.publish_session(&session);
        error
    }

    // ── Helpers ───────────────────────────────────────────────────

    pub(super) fn load_history(&self, session: &Session) -> Result<Vec<Message>> {
        let mut messages = self.store.list_messages(&session.id)?;
        if let Some(summary_id) = &session.summary_message_id {
            if let Some(pos) = messages.iter().position(|m| &m.id == summary_id) {
                messages = messages.split_off(pos);
                // The summary becomes the history root, shown to the
                // model as user content.
                if let Some(first) = messages.first_mut() {
                    first.role = Role::User;
                }
            }
        }
        Ok(messages)
    }

    async fn build_user_message(&self, call: &AgentCall) -> Message {
        let mut msg = Message::user(&call.session_id, &call.prompt);
        for attachment in &call.attachments {
            match self.hydrate_attachment(attachment).await {
                Ok(part) => msg.parts.push(part),
                Err(e) => {
                    tracing::warn!(error = %e, url = %attachment.url, "dropping attachment")
                }
            }
        }
        msg
    }

    async fn hydrate_attachment(&self, attachment: &Attachment) -> Result<MessagePart> {
        if let Some(rest) = attachment.url.strip_prefix("data:") {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| Error::Other("malformed data URI".into()))?;
            let mime = meta.split(';').next().unwrap_or("application/octet-stream");
            let data = if meta.contains("base64") {
                base64::engine::general_purpose::STANDARD
                    .decode(payload)
                    .map_err(|e| Error::Other(format!("bad data URI: {e}")))?
            } else {
                payload.as_bytes().to_vec()
            };
            return Ok(MessagePart::Binary {
                path: "inline".into(),
                mime_type: mime.to_string(),
                data,
            });
        }

        let (data, detected_mime) = self.fetcher.fetch(&attachment.url).await?;
        Ok(MessagePart::Binary {
            path: attachment.url.clone(),
            mime_type: attachment
                .mime_type
                .clone()
                .unwrap_or(detected_mime),
            data,
        })
    }

    /// Re-fetch binary parts that carry a URL but no bytes (history
    /// persisted before hydration, or trimmed payloads).
    async fn hydrate_history(&self, history: &mut [Message]) {
        for msg in history.iter_mut() {
            for part in msg.parts.iter_mut() {
                if let MessagePart::Binary { path, data, .. } = part {
                    if data.is_empty() && path.starts_with("http") {
                        match self.fetcher.fetch(path).await {
                            Ok((bytes, _)) => *data = bytes,
                            Err(e) => {
                                tracing::warn!(error = %e, url = %path, "binary hydration failed")
                            }
                        }
                    }
                }
            }
        }
    }

    fn build_model_call(
        &self,
        env: &RunEnv,
        call: &AgentCall,
        history: &[Message],
    ) -> co_providers::ModelCall {
        co_providers::ModelCall {
            system: env.system_prompt.clone(),
            messages: history.to_vec(),
            tools: env
                .tools
                .infos()
                .into_iter()
                .map(|info| ToolSpec {
                    name: info.name,
                    description: info.description,
                    parameters: info.parameters,
                })
                .collect(),
            max_output_tokens: call
                .params
                .max_output_tokens
                .or(env.model_config.max_output_tokens),
            temperature: call.params.temperature.or(env.model_config.temperature),
            top_p: call.params.top_p.or(env.model_config.top_p),
            think: env.model_config.think,
            reasoning_effort: env.model_config.reasoning_effort.clone(),
            cache_control: true,
        }
    }

    fn apply_usage(&self, env: &RunEnv, session: &mut Session, usage: &Usage) {
        session.prompt_tokens += usage.prompt_tokens;
        session.completion_tokens += usage.completion_tokens;
        session.cost += env.models.large.cost(usage);
    }

    fn set_record_status(&self, call_id: &str, status: ToolCallStatus) {
        if let Ok(Some(mut record)) = self.store.get_tool_call(call_id) {
            if !record.status.can_transition_to(status) {
                return;
            }
            record.status = status;
            let _ = self.store.update_tool_call(&record);
            self.publish_tool_call(&record);
        }
    }

    fn set_record_started(&self, call_id: &str) {
        if let Ok(Some(mut record)) = self.store.get_tool_call(call_id) {
            record.status = ToolCallStatus::Running;
            record.started_at = Some(chrono::Utc::now());
            let _ = self.store.update_tool_call(&record);
            self.publish_tool_call(&record);
        }
    }

    fn finish_record(
        &self,
        call_id: &str,
        status: ToolCallStatus,
        result: Option<&str>,
        error_message: Option<&str>,
    ) {
        if let Ok(Some(mut record)) = self.store.get_tool_call(call_id) {
            if record.status.is_terminal() {
                return;
            }
            record.status = status;
            record.result = result.map(str::to_owned);
            record.is_error = matches!(status, ToolCallStatus::Error | ToolCallStatus::Timeout);
            record.error_message = error_message.map(str::to_owned);
            record.finished_at = Some(chrono::Utc::now());
            let _ = self.store.update_tool_call(&record);
            self.publish_tool_call(&record);
        }
    }

    pub(super) fn publish_message(&self, op: EventOp, message: &Message) {
        self.bus.publish(BusEvent::Message {
            op,
            message: message.clone(),
        });
    }

    pub(super) fn publish_session(&self, session: &Session) {
        self.bus.publish(BusEvent::Session {
            op: EventOp::Updated,
            session: session.clone(),
        });
    }

    fn publish_tool_call(&self, record: &ToolCallRecord) {
        self.bus.publish(BusEvent::ToolCall {
            op: EventOp::Updated,
            record: record.clone(),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mapping helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_stop_reason(reason: StepStopReason) -> FinishReason {
    match reason {
        StepStopReason::EndTurn | StepStopReason::Other => FinishReason::EndTurn,
        StepStopReason::ToolUse => FinishReason::ToolUse,
        StepStopReason::MaxTokens => FinishReason::MaxTokens,
    }
}

fn synthetic_tool_content(error: &Error) -> &'static str {
    match error {
        Error::Cancelled => "Tool execution canceled by user",
        Error::PermissionDenied => "User denied permission",
        _ => "There was an error while executing the tool",
    }
}

fn finish_for_error(error: &Error) -> (FinishReason, Option<String>, Option<String>) {
    match error {
        Error::Cancelled => (FinishReason::Canceled, None, None),
        Error::PermissionDenied => (FinishReason::PermissionDenied, None, None),
        Error::Provider { title, message } => (
            FinishReason::Error,
            Some(title.clone()),
            Some(message.clone()),
        ),
        other => (FinishReason::Error, None, Some(other.to_string())),
    }
}

/// Context-window stop check: 20k absolute headroom for large windows,
/// else 20% of the window. Landing exactly on the threshold triggers.
fn context_exhausted(window: u64, used: u64) -> bool {
    let threshold = if window > 200_000 { 20_000 } else { window / 5 };
    window.saturating_sub(used) <= threshold
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_threshold_small_window() {
        // 20% of 10k = 2k headroom.
        assert!(!context_exhausted(10_000, 7_999));
        assert!(context_exhausted(10_000, 8_000)); // exactly on the threshold
        assert!(context_exhausted(10_000, 8_500));
    }

    #[test]
    fn context_threshold_large_window() {
        assert!(!context_exhausted(1_000_000, 900_000));
        assert!(context_exhausted(1_000_000, 980_000));
        assert!(context_exhausted(1_000_000, 999_999));
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason(StepStopReason::EndTurn), FinishReason::EndTurn);
        assert_eq!(map_stop_reason(StepStopReason::ToolUse), FinishReason::ToolUse);
        assert_eq!(
            map_stop_reason(StepStopReason::MaxTokens),
            FinishReason::MaxTokens
        );
    }

    #[test]
    fn synthetic_content_by_error_kind() {
        assert_eq!(
            synthetic_tool_content(&Error::Cancelled),
            "Tool execution canceled by user"
        );
        assert_eq!(
            synthetic_tool_content(&Error::PermissionDenied),
            "User denied permission"
        );
        assert_eq!(
            synthetic_tool_content(&Error::Http("boom".into())),
            "There was an error while executing the tool"
        );
    }

    #[test]
    fn finish_mapping_carries_provider_details() {
        let (reason, title, details) = finish_for_error(&Error::Provider {
            title: "overloaded".into(),
            message: "retry later".into(),
        });
        assert_eq!(reason, FinishReason::Error);
        assert_eq!(title.as_deref(), Some("overloaded"));
        assert_eq!(details.as_deref(), Some("retry later"));

        let (reason, _, _) = finish_for_error(&Error::Cancelled);
        assert_eq!(reason, FinishReason::Canceled);
        let (reason, _, _) = finish_for_error(&Error::PermissionDenied);
        assert_eq!(reason, FinishReason::PermissionDenied);
    }
}
