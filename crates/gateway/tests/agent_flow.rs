//! End-to-end runs against the scripted mock model and a mock sandbox:
//! plain replies, permission-gated tool calls, replay, denial, queued
//! prompts, auto-summarization, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;

use co_domain::config::Config;
use co_domain::event::BusEvent;
use co_domain::message::{FinishReason, MessagePart, Role, Session, ToolCallStatus};
use co_domain::stream::{DeltaEvent, StepStopReason, Usage};
use co_domain::Error;
use co_eventlog::{EventLog, StreamPos};
use co_gateway::runtime::{
    ActiveRuns, AgentCall, Coordinator, EventBus, PermissionBroker, PromptQueue, SessionAgent,
};
use co_gateway::ws::{spawn_fanout, ConnectionRegistry};
use co_providers::mock::{MockModel, ScriptItem};
use co_providers::ModelPair;
use co_sessions::{Db, SessionStore};
use co_tools::fetch::UrlFetcher;
use co_tools::SandboxClient;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    coordinator: Arc<Coordinator>,
    agent: Arc<SessionAgent>,
    store: SessionStore,
    eventlog: Arc<EventLog>,
    broker: Arc<PermissionBroker>,
    events: Arc<Mutex<Vec<BusEvent>>>,
    large: Arc<MockModel>,
}

async fn spawn_mock_sandbox() -> String {
    let app = Router::new()
        .route(
            "/execute",
            post(|| async { Json(json!({"stdout": "ok", "stderr": "", "exit_code": 0})) }),
        )
        .route(
            "/file/list",
            post(|| async {
                Json(json!({"entries": [
                    {"name": "a.txt", "is_dir": false, "size": 3},
                    {"name": "b.txt", "is_dir": false, "size": 5},
                ]}))
            }),
        )
        .route(
            "/file/read",
            post(|| async { Json(json!({"content": "hello"})) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn harness(scripts: Vec<Vec<ScriptItem>>, window: u64) -> Harness {
    let sandbox_url = spawn_mock_sandbox().await;

    let mut config = Config::default();
    config.sandbox.base_url = sandbox_url;
    let config = Arc::new(config);

    let store = SessionStore::new(Arc::new(Db::open_in_memory().unwrap()));
    let eventlog = Arc::new(EventLog::new(None, 10_000, Duration::from_secs(3600)));
    let bus = Arc::new(EventBus::new());
    let broker = Arc::new(PermissionBroker::new(
        bus.clone(),
        eventlog.clone(),
        false,
        vec![],
        Duration::from_secs(10),
    ));
    let fetcher = UrlFetcher::new().unwrap();
    let sandbox = Arc::new(
        SandboxClient::new(&config.sandbox.base_url, Duration::from_secs(5)).unwrap(),
    );

    let agent = Arc::new(SessionAgent {
        store: store.clone(),
        eventlog: eventlog.clone(),
        bus: bus.clone(),
        broker: broker.clone(),
        active: ActiveRuns::new(),
        queue: PromptQueue::new(),
        fetcher: fetcher.clone(),
        disable_auto_summarize: false,
    });

    let large = Arc::new(MockModel::new(scripts).with_context_window(window));
    let small = Arc::new(MockModel::new(vec![MockModel::text_step("Test session")]));
    let (large2, small2) = (large.clone(), small.clone());
    let coordinator = Arc::new(
        Coordinator::new(agent.clone(), config, sandbox, fetcher, vec![]).with_model_builder(
            move |_| {
                Ok(ModelPair {
                    large: large2.clone(),
                    small: small2.clone(),
                })
            },
        ),
    );

    // Collect every bus event for ordering assertions, and run the
    // real fan-out so the durable stream fills like production.
    let events: Arc<Mutex<Vec<BusEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let mut rx = bus.subscribe();
    let events2 = events.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            events2.lock().push(event);
        }
    });
    spawn_fanout(bus.clone(), eventlog.clone(), Arc::new(ConnectionRegistry::new()));

    Harness {
        coordinator,
        agent,
        store,
        eventlog,
        broker,
        events,
        large,
    }
}

fn new_session(store: &SessionStore) -> Session {
    let session = Session::new("p1", "New session");
    store.create_session(&session).unwrap();
    session
}

/// Poll the collected events until one matches, or panic on timeout.
async fn wait_for_event<F>(events: &Arc<Mutex<Vec<BusEvent>>>, what: &str, pred: F) -> BusEvent
where
    F: Fn(&BusEvent) -> bool,
{
    for _ in 0..200 {
        if let Some(event) = events.lock().iter().find(|e| pred(e)) {
            return event.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for event: {what}");
}

fn permission_request_id(events: &Arc<Mutex<Vec<BusEvent>>>) -> Option<String> {
    events.lock().iter().find_map(|e| match e {
        BusEvent::PermissionRequest { request } => Some(request.id.clone()),
        _ => None,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — simple text reply
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_simple_text_reply() {
    let h = harness(vec![MockModel::text_step("Hi!")], 200_000).await;
    let session = new_session(&h.store);

    h.coordinator
        .run(AgentCall::new(&session.id, "hello"))
        .await
        .unwrap();

    let messages = h.store.list_messages(&session.id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].text(), "hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].text(), "Hi!");
    assert_eq!(messages[1].finish_reason(), Some(FinishReason::EndTurn));

    let updated = h.store.get_session(&session.id).unwrap().unwrap();
    assert!(updated.completion_tokens >= 1);
    assert!(updated.cost > 0.0);

    wait_for_event(&h.events, "generation_complete", |e| {
        matches!(e, BusEvent::GenerationComplete { error: false, .. })
    })
    .await;

    // Title generation ran on the small model for the first message.
    wait_for_event(&h.events, "title session_update", |e| {
        matches!(e, BusEvent::Session { session, .. } if session.title == "Test session")
    })
    .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — tool call requiring permission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_tool_call_with_permission() {
    let h = harness(
        vec![
            MockModel::tool_step("tc1", "bash", json!({"command": "ls"})),
            MockModel::text_step("Found 2 files: a.txt, b.txt"),
        ],
        200_000,
    )
    .await;
    let session = new_session(&h.store);

    let coordinator = h.coordinator.clone();
    let session_id = session.id.clone();
    let run = tokio::spawn(async move {
        coordinator.run(AgentCall::new(&session_id, "list files in .")).await
    });

    // The tool parks on an interactive permission request.
    wait_for_event(&h.events, "permission_request", |e| {
        matches!(e, BusEvent::PermissionRequest { .. })
    })
    .await;
    let id = permission_request_id(&h.events).unwrap();
    assert!(h.broker.grant(&id, false));

    run.await.unwrap().unwrap();
    // Let the collector drain everything up to the terminal event.
    wait_for_event(&h.events, "generation_complete", |e| {
        matches!(e, BusEvent::GenerationComplete { .. })
    })
    .await;

    // Event order: pending record → permission request → notification
    // (granted) → running → completed → tool-result message.
    let events = h.events.lock().clone();
    let idx = |pred: &dyn Fn(&BusEvent) -> bool| -> usize {
        events.iter().position(|e| pred(e)).expect("event missing")
    };
    let pending = idx(&|e| {
        matches!(e, BusEvent::ToolCall { record, .. }
            if record.status == ToolCallStatus::Pending)
    });
    let request = idx(&|e| matches!(e, BusEvent::PermissionRequest { .. }));
    let notified = idx(&|e| {
        matches!(e, BusEvent::PermissionNotification { notification } if notification.granted)
    });
    let running = idx(&|e| {
        matches!(e, BusEvent::ToolCall { record, .. }
            if record.status == ToolCallStatus::Running)
    });
    let completed = idx(&|e| {
        matches!(e, BusEvent::ToolCall { record, .. }
            if record.status == ToolCallStatus::Completed)
    });
    let tool_result_msg = idx(&|e| {
        matches!(e, BusEvent::Message { message, .. }
            if message.role == Role::Tool
            && message.parts.iter().any(|p| matches!(p, MessagePart::ToolResult { .. })))
    });
    assert!(pending < request);
    assert!(request < notified);
    assert!(notified < running);
    assert!(running < completed);
    // Clients animate on this: the completed update precedes the
    // tool-result message event.
    assert!(completed < tool_result_msg);

    let messages = h.store.list_messages(&session.id).unwrap();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    match &tool_msg.parts[0] {
        MessagePart::ToolResult {
            tool_call_id,
            content,
            is_error,
            ..
        } => {
            assert_eq!(tool_call_id, "tc1");
            assert!(!is_error);
            assert!(content.contains("ok"));
        }
        other => panic!("expected ToolResult, got {other:?}"),
    }
    let assistant_final = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    assert_eq!(assistant_final.text(), "Found 2 files: a.txt, b.txt");

    let record = h.store.get_tool_call("tc1").unwrap().unwrap();
    assert_eq!(record.status, ToolCallStatus::Completed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — replay after disconnect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_replay_from_stream_id() {
    let h = harness(vec![MockModel::text_step("Hi!")], 200_000).await;
    let session = new_session(&h.store);

    // No live socket at all — the durable stream still fills.
    h.coordinator
        .run(AgentCall::new(&session.id, "hello"))
        .await
        .unwrap();
    wait_for_event(&h.events, "generation_complete", |e| {
        matches!(e, BusEvent::GenerationComplete { .. })
    })
    .await;
    // Let the fan-out pump drain.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (all, last_id) = h.eventlog.read_from(&session.id, StreamPos::Start, 1000);
    assert!(all.len() >= 3, "expected several stream entries");
    assert_eq!(all.last().unwrap().entry_type, "generation_complete");

    // A client that saw up to entry L receives exactly the entries
    // after L, in order.
    let l = all[1].stream_id;
    let (replayed, _) = h.eventlog.read_from(&session.id, StreamPos::After(l), 1000);
    assert_eq!(replayed.len(), all.len() - 2);
    assert_eq!(replayed.first().unwrap().stream_id, l + 1);
    assert_eq!(replayed.last().unwrap().stream_id, last_id);
    let mut ids: Vec<u64> = replayed.iter().map(|e| e.stream_id).collect();
    let sorted = {
        let mut s = ids.clone();
        s.sort_unstable();
        s
    };
    assert_eq!(ids, sorted);
    ids.dedup();
    assert_eq!(ids.len(), replayed.len());

    assert!(!h.eventlog.is_active(&session.id));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — permission denied
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_permission_denied() {
    let h = harness(
        vec![MockModel::tool_step("tc1", "bash", json!({"command": "ls"}))],
        200_000,
    )
    .await;
    let session = new_session(&h.store);

    let coordinator = h.coordinator.clone();
    let session_id = session.id.clone();
    let run = tokio::spawn(async move {
        coordinator.run(AgentCall::new(&session_id, "list files in .")).await
    });

    wait_for_event(&h.events, "permission_request", |e| {
        matches!(e, BusEvent::PermissionRequest { .. })
    })
    .await;
    let id = permission_request_id(&h.events).unwrap();
    assert!(h.broker.deny(&id));

    let result = run.await.unwrap();
    assert!(matches!(result, Err(Error::PermissionDenied)));

    wait_for_event(&h.events, "denied notification", |e| {
        matches!(e, BusEvent::PermissionNotification { notification } if notification.denied)
    })
    .await;

    let messages = h.store.list_messages(&session.id).unwrap();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    match &tool_msg.parts[0] {
        MessagePart::ToolResult {
            content, is_error, ..
        } => {
            assert_eq!(content, "User denied permission");
            assert!(is_error);
        }
        other => panic!("expected ToolResult, got {other:?}"),
    }
    let assistant = messages.iter().find(|m| m.role == Role::Assistant).unwrap();
    assert_eq!(
        assistant.finish_reason(),
        Some(FinishReason::PermissionDenied)
    );

    wait_for_event(&h.events, "generation_complete error", |e| {
        matches!(e, BusEvent::GenerationComplete { error: true, .. })
    })
    .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — queued prompts drain at the next step
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_queued_prompts_injected_in_order() {
    let h = harness(
        vec![
            MockModel::tool_step("tc1", "bash", json!({"command": "ls"})),
            MockModel::text_step("handled everything"),
        ],
        200_000,
    )
    .await;
    let session = new_session(&h.store);

    let coordinator = h.coordinator.clone();
    let session_id = session.id.clone();
    let run = tokio::spawn(async move {
        coordinator.run(AgentCall::new(&session_id, "first prompt")).await
    });

    wait_for_event(&h.events, "permission_request", |e| {
        matches!(e, BusEvent::PermissionRequest { .. })
    })
    .await;

    // Session is busy: both submissions are accepted for queueing and
    // return immediately.
    h.coordinator
        .run(AgentCall::new(&session.id, "second prompt"))
        .await
        .unwrap();
    h.coordinator
        .run(AgentCall::new(&session.id, "third prompt"))
        .await
        .unwrap();
    assert_eq!(
        h.agent.queued_prompts(&session.id),
        vec!["second prompt", "third prompt"]
    );

    let id = permission_request_id(&h.events).unwrap();
    h.broker.grant(&id, false);
    run.await.unwrap().unwrap();

    // The second model step saw all three prompts, in submission order.
    let calls = h.large.calls.lock();
    assert_eq!(calls.len(), 2);
    let user_texts: Vec<String> = calls[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .collect();
    assert_eq!(
        user_texts,
        vec!["first prompt", "second prompt", "third prompt"]
    );
    assert_eq!(h.agent.queued_prompts(&session.id).len(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — auto-summarize at the context threshold
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn heavy_tool_step() -> Vec<ScriptItem> {
    vec![
        ScriptItem::Delta(DeltaEvent::ToolInputStart {
            id: "tc1".into(),
            name: "ls".into(),
        }),
        ScriptItem::Delta(DeltaEvent::ToolCall {
            id: "tc1".into(),
            name: "ls".into(),
            input: json!({"path": "."}),
        }),
        ScriptItem::Delta(DeltaEvent::StepFinish {
            usage: Usage {
                prompt_tokens: 8_000,
                completion_tokens: 500,
                ..Default::default()
            },
            reason: StepStopReason::ToolUse,
            provider_metadata: None,
        }),
    ]
}

#[tokio::test]
async fn s6_auto_summarize_and_requeue() {
    // window 10_000 → threshold 2_000; after the heavy step the
    // remaining 1_500 is below it.
    let h = harness(
        vec![
            heavy_tool_step(),
            MockModel::text_step("Summary of the work so far"),
            MockModel::text_step("continuing after summary"),
        ],
        10_000,
    )
    .await;
    let session = new_session(&h.store);

    h.coordinator
        .run(AgentCall::new(&session.id, "do something long"))
        .await
        .unwrap();

    let updated = h.store.get_session(&session.id).unwrap().unwrap();
    let summary_id = updated.summary_message_id.clone().expect("summary set");

    let messages = h.store.list_messages(&session.id).unwrap();
    let summary = messages.iter().find(|m| m.id == summary_id).unwrap();
    assert!(summary.is_summary);
    assert_eq!(summary.role, Role::Assistant);
    assert!(summary.text().contains("Summary of the work"));

    // prompt_tokens reset at summarization; the follow-up run only
    // added its own small usage.
    assert!(updated.prompt_tokens < 8_000);

    // The interrupted prompt was re-queued with an explanation and ran
    // as a follow-up: its model call starts from the summary.
    let calls = h.large.calls.lock();
    assert_eq!(calls.len(), 3);
    let followup = &calls[2];
    let first_user = followup
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .unwrap();
    assert!(first_user.text().contains("Summary of the work"));
    let requeued = followup
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .last()
        .unwrap();
    assert!(requeued.text().contains("do something long"));
    assert!(requeued.text().contains("interrupted"));
}

fn heavy_text_step() -> Vec<ScriptItem> {
    vec![
        ScriptItem::Delta(DeltaEvent::TextDelta {
            id: "text_0".into(),
            text: "a very long answer".into(),
        }),
        ScriptItem::Delta(DeltaEvent::StepFinish {
            usage: Usage {
                prompt_tokens: 8_000,
                completion_tokens: 500,
                ..Default::default()
            },
            reason: StepStopReason::EndTurn,
            provider_metadata: None,
        }),
    ]
}

#[tokio::test]
async fn s6_auto_summarize_without_tool_calls() {
    // The threshold fires on every step, tool use or not: a text-only
    // turn crossing it still summarizes, and the finished turn is not
    // re-queued.
    let h = harness(
        vec![
            heavy_text_step(),
            MockModel::text_step("Summary of the text-only session"),
        ],
        10_000,
    )
    .await;
    let session = new_session(&h.store);

    h.coordinator
        .run(AgentCall::new(&session.id, "tell me everything"))
        .await
        .unwrap();

    let updated = h.store.get_session(&session.id).unwrap().unwrap();
    let summary_id = updated.summary_message_id.clone().expect("summary set");
    let messages = h.store.list_messages(&session.id).unwrap();
    let summary = messages.iter().find(|m| m.id == summary_id).unwrap();
    assert!(summary.is_summary);
    assert!(summary.text().contains("Summary of the text-only session"));
    assert_eq!(updated.prompt_tokens, 0);

    // One conversation step plus the summary call — no follow-up run.
    assert_eq!(h.large.calls.lock().len(), 2);
    assert!(h.agent.queued_prompts(&session.id).is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancel_during_permission_wait() {
    let h = harness(
        vec![MockModel::tool_step("tc1", "bash", json!({"command": "sleep 99"}))],
        200_000,
    )
    .await;
    let session = new_session(&h.store);

    let coordinator = h.coordinator.clone();
    let session_id = session.id.clone();
    let run = tokio::spawn(async move {
        coordinator.run(AgentCall::new(&session_id, "run something")).await
    });

    wait_for_event(&h.events, "permission_request", |e| {
        matches!(e, BusEvent::PermissionRequest { .. })
    })
    .await;

    h.coordinator.cancel(&session.id);
    let result = run.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    // Busy clears within the bounded window.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.agent.is_session_busy(&session.id) {
        assert!(std::time::Instant::now() < deadline, "session stayed busy");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.agent.is_busy());

    let messages = h.store.list_messages(&session.id).unwrap();
    let assistant = messages.iter().find(|m| m.role == Role::Assistant).unwrap();
    assert_eq!(assistant.finish_reason(), Some(FinishReason::Canceled));
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    match &tool_msg.parts[0] {
        MessagePart::ToolResult { content, .. } => {
            assert_eq!(content, "Tool execution canceled by user");
        }
        other => panic!("expected ToolResult, got {other:?}"),
    }
    let record = h.store.get_tool_call("tc1").unwrap().unwrap();
    assert_eq!(record.status, ToolCallStatus::Cancelled);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider failure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn provider_error_finalizes_with_error_finish() {
    let h = harness(
        vec![MockModel::failing_step("partial ", "overloaded", "try again later")],
        200_000,
    )
    .await;
    let session = new_session(&h.store);

    let result = h
        .coordinator
        .run(AgentCall::new(&session.id, "hello"))
        .await;
    assert!(matches!(result, Err(Error::Provider { .. })));

    let messages = h.store.list_messages(&session.id).unwrap();
    let assistant = messages.iter().find(|m| m.role == Role::Assistant).unwrap();
    // Partial text survives, and the terminal finish carries the
    // provider title/details.
    assert_eq!(assistant.text(), "partial ");
    match assistant.parts.last().unwrap() {
        MessagePart::Finish {
            reason,
            title,
            details,
        } => {
            assert_eq!(*reason, FinishReason::Error);
            assert_eq!(title.as_deref(), Some("overloaded"));
            assert_eq!(details.as_deref(), Some("try again later"));
        }
        other => panic!("expected Finish, got {other:?}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_prompt_and_missing_session_are_rejected() {
    let h = harness(vec![], 200_000).await;
    let session = new_session(&h.store);

    let result = h.coordinator.run(AgentCall::new(&session.id, "   ")).await;
    assert!(matches!(result, Err(Error::EmptyPrompt)));

    let result = h.coordinator.run(AgentCall::new("ghost", "hello")).await;
    assert!(matches!(result, Err(Error::SessionMissing(_))));
}
