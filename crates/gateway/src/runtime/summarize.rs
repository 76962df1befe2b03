//! Conversation summarization.
//!
//! Produces one `is_summary` assistant message that becomes the new
//! effective root of the history (`summary_message_id` on the session),
//! and resets the prompt-token counter so the context-window check
//! starts over. A user-cancelled summarization deletes its partial
//! message instead of leaving a half-summary root.

use futures_util::StreamExt;

use co_domain::event::EventOp;
use co_domain::message::{FinishReason, Message, Role, Session};
use co_domain::stream::DeltaEvent;
use co_domain::{Error, Result};
use co_providers::ModelCall;

use super::agent::{RunEnv, SessionAgent};
use super::cancel::CancelToken;
use crate::prompts;

/// Summarize the session's active history. Mutates the session's
/// `summary_message_id` and counters; persists and publishes the
/// result.
pub(super) async fn run_summary(
    agent: &SessionAgent,
    env: &RunEnv,
    session: &mut Session,
    token: &CancelToken,
) -> Result<()> {
    let session_id = session.id.clone();
    tracing::info!(session_id = %session_id, "summarizing session");

    let mut history = agent.load_history(session)?;
    history.push(Message::user(
        &session_id,
        prompts::summary_request_prompt(),
    ));

    let mut summary = Message::new(&session_id, Role::Assistant);
    summary.is_summary = true;
    summary.model = Some(env.models.large.id().to_string());
    summary.provider = Some(env.models.large.provider().to_string());
    agent.store.create_message(&summary)?;
    agent.publish_message(EventOp::Created, &summary);

    let call = ModelCall {
        system: prompts::summary_system_prompt().into(),
        messages: history,
        max_output_tokens: env.model_config.max_output_tokens,
        ..Default::default()
    };

    let mut stream = match env.models.large.stream(call).await {
        Ok(s) => s,
        Err(e) => {
            discard_partial(agent, &summary);
            return Err(e);
        }
    };

    loop {
        let delta = tokio::select! {
            d = stream.next() => d,
            _ = token.cancelled() => {
                discard_partial(agent, &summary);
                return Err(Error::Cancelled);
            }
        };
        let Some(delta) = delta else { break };
        match delta {
            Ok(DeltaEvent::TextDelta { text, .. }) => {
                summary.append_text(&text);
                agent.publish_message(EventOp::Updated, &summary);
            }
            Ok(DeltaEvent::StepFinish { usage, .. }) => {
                session.cost += env.models.large.cost(&usage);
            }
            Ok(_) => {}
            Err(e) => {
                discard_partial(agent, &summary);
                return Err(e);
            }
        }
    }

    if summary.text().is_empty() {
        discard_partial(agent, &summary);
        return Err(Error::Other("summarization produced no content".into()));
    }

    summary.push_finish(FinishReason::EndTurn, None, None);
    session.summary_message_id = Some(summary.id.clone());
    // The summary restarts the effective context.
    session.prompt_tokens = 0;
    agent.store.save_step(&summary, session)?;
    agent.publish_message(EventOp::Updated, &summary);
    agent.publish_session(session);
    // The effective history root moved.
    agent.bus.publish(co_domain::event::BusEvent::History {
        op: EventOp::Updated,
        session_id: session_id.clone(),
    });
    Ok(())
}

fn discard_partial(agent: &SessionAgent, summary: &Message) {
    if let Err(e) = agent.store.delete_message(&summary.id) {
        tracing::warn!(error = %e, "failed to delete partial summary");
    }
    agent.publish_message(EventOp::Deleted, summary);
}
