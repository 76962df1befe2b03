//! Interactive permission broker.
//!
//! `request` blocks the calling tool dispatch until the user answers,
//! the request times out, or the run is cancelled. Short-circuits in
//! order: global skip config, session-wide auto-approve, the session
//! allowlist. Exactly one `PermissionNotification` is published per
//! interactive request, and resolving a request twice is a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use co_domain::event::{BusEvent, PermissionNotification, PermissionRequest};
use co_domain::{Error, Result};
use co_eventlog::{EventLog, PermissionStatus};

use super::bus::EventBus;
use super::cancel::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a tool dispatch asks the broker for.
#[derive(Debug, Clone)]
pub struct PermissionInput {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub action: String,
    pub path: Option<String>,
    pub description: String,
    pub params: serde_json::Value,
}

#[derive(Debug)]
enum Decision {
    Granted { always: bool },
    Denied,
}

struct Waiter {
    session_id: String,
    tool_call_id: String,
    respond: oneshot::Sender<Decision>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PermissionBroker {
    bus: Arc<EventBus>,
    eventlog: Arc<EventLog>,
    waiters: Mutex<HashMap<String, Waiter>>,
    auto_approved: Mutex<HashSet<String>>,
    skip_requests: bool,
    global_allowed: Vec<String>,
    timeout: Duration,
}

impl PermissionBroker {
    pub fn new(
        bus: Arc<EventBus>,
        eventlog: Arc<EventLog>,
        skip_requests: bool,
        global_allowed: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            bus,
            eventlog,
            waiters: Mutex::new(HashMap::new()),
            auto_approved: Mutex::new(HashSet::new()),
            skip_requests,
            global_allowed,
            timeout,
        }
    }

    /// Ask for permission; blocks until resolved. Returns whether the
    /// action was granted. Cancellation of the run surfaces as
    /// `Error::Cancelled`; an expired request counts as denial.
    pub async fn request(&self, input: PermissionInput, cancel: &CancelToken) -> Result<bool> {
        // 1. Global skip.
        if self.skip_requests {
            return Ok(true);
        }

        // 2. Session-wide auto-approve.
        if self.auto_approved.lock().contains(&input.session_id) {
            let id = uuid::Uuid::new_v4().to_string();
            self.publish_notification(&input.session_id, &id, &input.tool_call_id, true, true);
            return Ok(true);
        }

        // 3. Allowlist (global config, then the session's own).
        if self.global_allowed.contains(&input.tool_name)
            || self.eventlog.permissions().is_allowed(
                &input.session_id,
                &input.tool_name,
                Some(&input.action),
                input.path.as_deref(),
            )
        {
            return Ok(true);
        }

        // 4. Interactive.
        let id = uuid::Uuid::new_v4().to_string();
        let request = PermissionRequest {
            id: id.clone(),
            session_id: input.session_id.clone(),
            tool_call_id: input.tool_call_id.clone(),
            tool_name: input.tool_name.clone(),
            description: input.description.clone(),
            action: input.action.clone(),
            params: input.params.clone(),
            path: input.path.clone(),
            created_at: Utc::now(),
        };
        self.eventlog.permissions().set_pending(request.clone());

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(
            id.clone(),
            Waiter {
                session_id: input.session_id.clone(),
                tool_call_id: input.tool_call_id.clone(),
                respond: tx,
            },
        );
        self.bus.publish(BusEvent::PermissionRequest { request });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.resolve(&id, Decision::Denied, true);
                Err(Error::Cancelled)
            }
            decision = rx => {
                match decision {
                    Ok(Decision::Granted { always }) => {
                        if always {
                            self.eventlog.permissions().add_to_allowlist(
                                &input.session_id,
                                &input.tool_name,
                                Some(&input.action),
                                input.path.as_deref(),
                            );
                        }
                        Ok(true)
                    }
                    Ok(Decision::Denied) => Ok(false),
                    // Sender dropped without an answer (broker shutdown).
                    Err(_) => Ok(false),
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!(
                    session_id = %input.session_id,
                    tool = %input.tool_name,
                    "permission request expired"
                );
                self.resolve(&id, Decision::Denied, true);
                Ok(false)
            }
        }
    }

    /// Resolve a pending request as granted. `always` also adds the
    /// invocation to the session allowlist. Returns false when the
    /// request is unknown or already resolved (idempotent).
    pub fn grant(&self, permission_id: &str, always: bool) -> bool {
        self.resolve(permission_id, Decision::Granted { always }, false)
    }

    /// Resolve a pending request as denied. Idempotent.
    pub fn deny(&self, permission_id: &str) -> bool {
        self.resolve(permission_id, Decision::Denied, false)
    }

    /// Auto-grant everything for a session (non-interactive runs).
    pub fn auto_approve_session(&self, session_id: &str) {
        self.auto_approved.lock().insert(session_id.to_owned());
    }

    /// Deny every pending request of a session (session cancel).
    pub fn cancel_session(&self, session_id: &str) {
        let ids: Vec<String> = self
            .waiters
            .lock()
            .iter()
            .filter(|(_, w)| w.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.resolve(&id, Decision::Denied, true);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Take the waiter out, update the durable record, publish the one
    /// notification, and wake the requester. `auto` marks resolutions
    /// the broker made itself (timeout, session cancel) rather than the
    /// user. Every request event gets exactly one notification.
    fn resolve(&self, permission_id: &str, decision: Decision, auto: bool) -> bool {
        let Some(waiter) = self.waiters.lock().remove(permission_id) else {
            return false;
        };
        let granted = matches!(decision, Decision::Granted { .. });

        self.eventlog.permissions().update_status(
            &waiter.session_id,
            permission_id,
            if granted {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            },
        );
        self.publish_notification(
            &waiter.session_id,
            permission_id,
            &waiter.tool_call_id,
            granted,
            auto,
        );
        let _ = waiter.respond.send(decision);
        true
    }

    fn publish_notification(
        &self,
        session_id: &str,
        permission_id: &str,
        tool_call_id: &str,
        granted: bool,
        auto: bool,
    ) {
        self.bus.publish(BusEvent::PermissionNotification {
            notification: PermissionNotification {
                id: permission_id.to_owned(),
                session_id: session_id.to_owned(),
                tool_call_id: tool_call_id.to_owned(),
                granted,
                denied: !granted,
                auto,
                created_at: Utc::now(),
            },
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn broker_with(
        skip: bool,
        allowed: Vec<String>,
        timeout: Duration,
    ) -> (Arc<PermissionBroker>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let eventlog = Arc::new(EventLog::new(None, 100, Duration::from_secs(3600)));
        let broker = Arc::new(PermissionBroker::new(
            bus.clone(),
            eventlog,
            skip,
            allowed,
            timeout,
        ));
        (broker, bus)
    }

    fn input(session: &str, tool: &str) -> PermissionInput {
        PermissionInput {
            session_id: session.into(),
            tool_call_id: "tc1".into(),
            tool_name: tool.into(),
            action: "execute".into(),
            path: None,
            description: "test".into(),
            params: serde_json::json!({}),
        }
    }

    async fn first_request_id(rx: &mut tokio::sync::mpsc::Receiver<BusEvent>) -> String {
        loop {
            match rx.recv().await.unwrap() {
                BusEvent::PermissionRequest { request } => return request.id,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn skip_requests_auto_grants() {
        let (broker, _bus) = broker_with(true, vec![], Duration::from_secs(5));
        let cancel = CancelToken::new();
        assert!(broker.request(input("s1", "bash"), &cancel).await.unwrap());
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn auto_approved_session_grants_with_notification() {
        let (broker, bus) = broker_with(false, vec![], Duration::from_secs(5));
        let mut rx = bus.subscribe();
        broker.auto_approve_session("s1");
        let cancel = CancelToken::new();
        assert!(broker.request(input("s1", "bash"), &cancel).await.unwrap());

        let event = rx.recv().await.unwrap();
        match event {
            BusEvent::PermissionNotification { notification } => {
                assert!(notification.granted);
                assert!(notification.auto);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn global_allowlist_short_circuits_silently() {
        let (broker, bus) = broker_with(false, vec!["ls".into()], Duration::from_secs(5));
        let mut rx = bus.subscribe();
        let cancel = CancelToken::new();
        assert!(broker.request(input("s1", "ls"), &cancel).await.unwrap());
        // No PermissionRequestEvent was emitted.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn interactive_grant_resolves_waiter() {
        let (broker, bus) = broker_with(false, vec![], Duration::from_secs(5));
        let mut rx = bus.subscribe();
        let cancel = CancelToken::new();

        let broker2 = broker.clone();
        let waiter = tokio::spawn(async move {
            broker2.request(input("s1", "bash"), &cancel).await
        });

        let id = first_request_id(&mut rx).await;
        assert_eq!(broker.pending_count(), 1);
        assert!(broker.grant(&id, false));
        assert!(waiter.await.unwrap().unwrap());

        // Exactly one notification follows the request.
        match rx.recv().await.unwrap() {
            BusEvent::PermissionNotification { notification } => {
                assert!(notification.granted);
                assert!(!notification.auto);
            }
            other => panic!("expected notification, got {other:?}"),
        }
        // Second grant is a no-op.
        assert!(!broker.grant(&id, false));
    }

    #[tokio::test]
    async fn grant_always_adds_to_allowlist() {
        let bus = Arc::new(EventBus::new());
        let eventlog = Arc::new(EventLog::new(None, 100, Duration::from_secs(3600)));
        let broker = Arc::new(PermissionBroker::new(
            bus.clone(),
            eventlog.clone(),
            false,
            vec![],
            Duration::from_secs(5),
        ));
        let mut rx = bus.subscribe();
        let cancel = CancelToken::new();

        let broker2 = broker.clone();
        let waiter =
            tokio::spawn(async move { broker2.request(input("s1", "bash"), &cancel).await });
        let id = first_request_id(&mut rx).await;
        broker.grant(&id, true);
        assert!(waiter.await.unwrap().unwrap());

        // The follow-up request short-circuits without a new
        // PermissionRequestEvent.
        let cancel = CancelToken::new();
        assert!(broker.request(input("s1", "bash"), &cancel).await.unwrap());
        assert!(eventlog
            .permissions()
            .is_allowed("s1", "bash", Some("execute"), None));
    }

    #[tokio::test]
    async fn deny_resolves_false() {
        let (broker, bus) = broker_with(false, vec![], Duration::from_secs(5));
        let mut rx = bus.subscribe();
        let cancel = CancelToken::new();

        let broker2 = broker.clone();
        let waiter =
            tokio::spawn(async move { broker2.request(input("s1", "bash"), &cancel).await });
        let id = first_request_id(&mut rx).await;
        assert!(broker.deny(&id));
        assert!(!waiter.await.unwrap().unwrap());
        assert!(!broker.deny(&id));
    }

    #[tokio::test]
    async fn timeout_counts_as_denial() {
        let (broker, _bus) = broker_with(false, vec![], Duration::from_millis(30));
        let cancel = CancelToken::new();
        let granted = broker.request(input("s1", "bash"), &cancel).await.unwrap();
        assert!(!granted);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn run_cancel_surfaces_cancelled() {
        let (broker, bus) = broker_with(false, vec![], Duration::from_secs(5));
        let mut rx = bus.subscribe();
        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();

        let broker2 = broker.clone();
        let waiter =
            tokio::spawn(async move { broker2.request(input("s1", "bash"), &cancel2).await });
        let _id = first_request_id(&mut rx).await;
        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_session_denies_all_pending() {
        let (broker, bus) = broker_with(false, vec![], Duration::from_secs(5));
        let mut rx = bus.subscribe();

        let mut handles = Vec::new();
        for n in 0..2 {
            let broker2 = broker.clone();
            let cancel = CancelToken::new();
            let mut req = input("s1", "bash");
            req.tool_call_id = format!("tc{n}");
            handles.push(tokio::spawn(async move {
                broker2.request(req, &cancel).await
            }));
        }
        // Wait for both requests to land.
        first_request_id(&mut rx).await;
        first_request_id(&mut rx).await;
        assert_eq!(broker.pending_count(), 2);

        broker.cancel_session("s1");
        for handle in handles {
            assert!(!handle.await.unwrap().unwrap());
        }
        assert_eq!(broker.pending_count(), 0);
    }
}
