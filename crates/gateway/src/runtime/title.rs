//! First-message title generation, fire-and-forget on the small model.

use std::sync::Arc;

use futures_util::StreamExt;

use co_domain::event::{BusEvent, EventOp};
use co_domain::stream::DeltaEvent;
use co_providers::{LanguageModel, ModelCall};
use co_sessions::SessionStore;

use super::bus::EventBus;
use crate::prompts;

const MAX_TITLE_CHARS: usize = 80;

/// Spawn a background task that titles the session from its first
/// prompt. Failures are logged and otherwise invisible.
pub fn spawn_title_generation(
    model: Arc<dyn LanguageModel>,
    store: SessionStore,
    bus: Arc<EventBus>,
    session_id: String,
    first_message: String,
) {
    tokio::spawn(async move {
        let call = ModelCall {
            system: "You generate concise session titles.".into(),
            messages: vec![co_domain::message::Message::user(
                &session_id,
                prompts::title_prompt(&first_message),
            )],
            max_output_tokens: Some(64),
            ..Default::default()
        };

        let mut stream = match model.stream(call).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, session_id, "title generation failed to start");
                return;
            }
        };

        let mut title = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(DeltaEvent::TextDelta { text, .. }) => title.push_str(&text),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, session_id, "title generation stream failed");
                    return;
                }
            }
        }

        let title = clean_title(&title);
        if title.is_empty() {
            return;
        }

        let mut session = match store.get_session(&session_id) {
            Ok(Some(s)) => s,
            _ => return,
        };
        session.title = title;
        if let Err(e) = store.save_session(&session) {
            tracing::warn!(error = %e, session_id, "failed to save generated title");
            return;
        }
        bus.publish(BusEvent::Session {
            op: EventOp::Updated,
            session,
        });
    });
}

fn clean_title(raw: &str) -> String {
    let cleaned = raw.trim().trim_matches('"').trim();
    let mut title: String = cleaned.lines().next().unwrap_or("").trim().to_string();
    if title.len() > MAX_TITLE_CHARS {
        let mut end = MAX_TITLE_CHARS;
        while !title.is_char_boundary(end) {
            end -= 1;
        }
        title.truncate(end);
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_title_strips_quotes_and_newlines() {
        assert_eq!(clean_title("\"Fix the tests\"\n"), "Fix the tests");
        assert_eq!(clean_title("  one\ntwo  "), "one");
    }

    #[test]
    fn clean_title_truncates_on_char_boundary() {
        let long = "é".repeat(100);
        let title = clean_title(&long);
        assert!(title.len() <= MAX_TITLE_CHARS);
        assert!(title.is_char_boundary(title.len()));
    }
}
