//! Per-session queued prompts.
//!
//! A `Run` on a busy session parks its call here and returns
//! immediately. The running step's preparation drains the queue and
//! injects the prompts as additional user messages; anything still
//! queued when the run ends starts a follow-up run. `Cancel` clears the
//! queue.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::agent::AgentCall;

pub struct PromptQueue {
    queues: Mutex<HashMap<String, Vec<AgentCall>>>,
}

impl Default for PromptQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn push(&self, call: AgentCall) {
        self.queues
            .lock()
            .entry(call.session_id.clone())
            .or_default()
            .push(call);
    }

    /// Atomically take every queued prompt for a session, in submission
    /// order.
    pub fn drain(&self, session_id: &str) -> Vec<AgentCall> {
        self.queues
            .lock()
            .remove(session_id)
            .unwrap_or_default()
    }

    /// Take only the first queued prompt (post-run follow-up).
    pub fn pop_front(&self, session_id: &str) -> Option<AgentCall> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(session_id)?;
        if queue.is_empty() {
            queues.remove(session_id);
            return None;
        }
        let call = queue.remove(0);
        if queue.is_empty() {
            queues.remove(session_id);
        }
        Some(call)
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.queues
            .lock()
            .get(session_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    pub fn clear(&self, session_id: &str) {
        self.queues.lock().remove(session_id);
    }

    /// Queued prompt texts, for introspection endpoints.
    pub fn prompts(&self, session_id: &str) -> Vec<String> {
        self.queues
            .lock()
            .get(session_id)
            .map(|q| q.iter().map(|c| c.prompt.clone()).collect())
            .unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
