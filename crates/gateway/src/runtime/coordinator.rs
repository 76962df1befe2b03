//! The coordinator: a thin facade over the session agent.
//!
//! `run` loads the session's model config (falling back to the
//! configured auto model), builds the model pair and tool set with the
//! session's working directory, and delegates to the agent. A busy
//! session queues the call and returns immediately; when a run
//! finishes, prompts still queued start follow-up runs on the same
//! claim.

use std::sync::Arc;

use co_domain::config::{Config, SessionModelConfig};
use co_domain::{Error, Result};
use co_providers::{build_models, ModelPair};
use co_tools::fetch::UrlFetcher;
use co_tools::{SandboxClient, Tool, ToolRegistry};

use super::agent::{AgentCall, RunEnv, SessionAgent};
use super::summarize;
use crate::prompts;

type ModelBuilder = dyn Fn(&SessionModelConfig) -> Result<ModelPair> + Send + Sync;

pub struct Coordinator {
    pub agent: Arc<SessionAgent>,
    config: Arc<Config>,
    sandbox: Arc<SandboxClient>,
    fetcher: UrlFetcher,
    /// Tools contributed by connected MCP servers, registered into
    /// every session's tool set.
    mcp_tools: Vec<Arc<dyn Tool>>,
    model_builder: Box<ModelBuilder>,
}

impl Coordinator {
    pub fn new(
        agent: Arc<SessionAgent>,
        config: Arc<Config>,
        sandbox: Arc<SandboxClient>,
        fetcher: UrlFetcher,
        mcp_tools: Vec<Arc<dyn Tool>>,
    ) -> Self {
        Self {
            agent,
            config,
            sandbox,
            fetcher,
            mcp_tools,
            model_builder: Box::new(build_models),
        }
    }

    /// Replace the model construction seam (tests inject mocks here).
    pub fn with_model_builder(
        mut self,
        builder: impl Fn(&SessionModelConfig) -> Result<ModelPair> + Send + Sync + 'static,
    ) -> Self {
        self.model_builder = Box::new(builder);
        self
    }

    // ── Run ───────────────────────────────────────────────────────

    /// Submit a prompt. Returns immediately with `Ok(())` when the
    /// session is busy (the call was accepted for queueing); otherwise
    /// drives the run — and any prompts queued behind it — to
    /// completion.
    pub async fn run(&self, call: AgentCall) -> Result<()> {
        if call.prompt.trim().is_empty() {
            return Err(Error::EmptyPrompt);
        }
        if self.agent.store.get_session(&call.session_id)?.is_none() {
            return Err(Error::SessionMissing(call.session_id.clone()));
        }

        let session_id = call.session_id.clone();
        let Some(mut token) = self.agent.active.try_register(&session_id) else {
            tracing::debug!(session_id = %session_id, "session busy, queueing prompt");
            self.agent.queue.push(call);
            return Ok(());
        };

        tracing::debug!(session_id = %session_id, "run started");
        let mut pending = Some(call);
        let mut result = Ok(());
        loop {
            while let Some(call) = pending.take() {
                if token.is_cancelled() {
                    break;
                }
                match self.build_env(&call.session_id).await {
                    Ok(env) => {
                        if let Err(e) = self.agent.run(call, &env, &token).await {
                            result = Err(e);
                            break;
                        }
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
                // Prompts queued after the final step drain into
                // follow-up runs under the same claim.
                pending = self.agent.queue.pop_front(&session_id);
            }

            self.agent.active.take(&session_id);
            if result.is_err() {
                break;
            }
            // A prompt queued between the last drain and the release
            // above would otherwise strand; re-claim and keep going.
            if self.agent.queue.len(&session_id) == 0 {
                break;
            }
            match self.agent.active.try_register(&session_id) {
                Some(fresh) => {
                    token = fresh;
                    pending = self.agent.queue.pop_front(&session_id);
                    if pending.is_none() {
                        self.agent.active.take(&session_id);
                        break;
                    }
                }
                // A newer run claimed the session and will drain.
                None => break,
            }
        }
        result
    }

    /// Standalone summarization. Unlike `run`, a busy session is an
    /// error here.
    pub async fn summarize(&self, session_id: &str) -> Result<()> {
        let Some(token) = self.agent.active.try_register(session_id) else {
            return Err(Error::SessionBusy(session_id.to_owned()));
        };

        let result = async {
            let env = self.build_env(session_id).await?;
            let mut session = self
                .agent
                .store
                .get_session(session_id)?
                .ok_or_else(|| Error::SessionMissing(session_id.to_owned()))?;
            self.agent.eventlog.set_active(session_id, true);
            let outcome = summarize::run_summary(&self.agent, &env, &mut session, &token).await;
            self.agent.eventlog.set_active(session_id, false);
            self.agent
                .bus
                .publish(co_domain::event::BusEvent::GenerationComplete {
                    session_id: session_id.to_owned(),
                    error: outcome.is_err(),
                });
            outcome
        }
        .await;

        self.agent.active.take(session_id);
        result
    }

    pub fn cancel(&self, session_id: &str) {
        self.agent.cancel(session_id);
    }

    pub async fn cancel_all(&self) {
        self.agent.cancel_all().await;
    }

    // ── Environment construction ──────────────────────────────────

    /// Load the per-session config lazily (updates between runs take
    /// effect) and build the run environment.
    async fn build_env(&self, session_id: &str) -> Result<RunEnv> {
        let model_config = match self.agent.store.get_model_config(session_id) {
            Ok(Some(config)) => config,
            Ok(None) => SessionModelConfig::from_auto(&self.config.auto_model),
            Err(e) => {
                tracing::warn!(error = %e, session_id, "config load failed, using auto model");
                SessionModelConfig::from_auto(&self.config.auto_model)
            }
        };

        let models = (self.model_builder)(&model_config)?;

        let mut tools = ToolRegistry::builtin(self.sandbox.clone(), self.fetcher.clone());
        for tool in &self.mcp_tools {
            tools.register(tool.clone());
        }

        let session = self
            .agent
            .store
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionMissing(session_id.to_owned()))?;
        let workdir = format!(
            "{}/{}",
            self.config.sandbox.workdir_root.trim_end_matches('/'),
            session.project_id
        );
        let system_prompt = prompts::system_prompt(&workdir);

        Ok(RunEnv {
            models,
            tools,
            workdir,
            system_prompt,
            model_config,
        })
    }
}
