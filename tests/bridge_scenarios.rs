//! End-to-end scenarios against mock agent and token servers.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use agent_bridge::config::schema::UNAVAILABLE_TEXT;
use agent_bridge::memory::types::Role;
use agent_bridge::resilience::circuit_breaker::CircuitState;
use agent_bridge::resilience::fallback::Payload;
use agent_bridge::{ConnectionStatus, ResponseKind};

use common::{Hits, MockReply};

fn ok_health() -> MockReply {
    MockReply::json(200, r#"{"status":"ok"}"#)
}

#[tokio::test]
async fn test_query_reply_is_persisted_and_sent_as_context() {
    let seen = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
    let s = seen.clone();
    let agent = common::start_mock_server(move |req| {
        let s = s.clone();
        async move {
            match req.path.as_str() {
                "/health" => ok_health(),
                "/v1/query" => {
                    let body = req.json();
                    let reply = format!("echo: {}", body["query"].as_str().unwrap_or_default());
                    s.lock().unwrap().push(body);
                    MockReply::json(200, &serde_json::json!({ "response": reply }).to_string())
                }
                _ => MockReply::json(404, "{}"),
            }
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);
    assert!(bridge.is_connected());
    assert!(bridge.agent_available());
    assert_eq!(bridge.status(), ConnectionStatus::Connected);

    let first = bridge.process_query("hello").await;
    assert_eq!(first.kind, ResponseKind::Success);
    assert_eq!(first.payload, Payload::Text("echo: hello".into()));

    let second = bridge.process_query("again").await;
    assert!(second.is_success());

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["context"].as_array().unwrap().len(), 0);
        let context = seen[1]["context"].as_array().unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0]["role"], "user");
        assert_eq!(context[0]["content"], "hello");
        assert_eq!(context[1]["role"], "assistant");
        assert_eq!(context[1]["content"], "echo: hello");
        assert_eq!(seen[1]["session_id"], bridge.memory().current_session_id().as_str());
    }

    let last = bridge.memory().get_conversation_context(1);
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].role, Role::Assistant);
    assert_eq!(last[0].content, "echo: again");
    assert_eq!(last[0].id, second.message_id);
}

#[tokio::test]
async fn test_new_session_sends_empty_context() {
    let contexts = Arc::new(Mutex::new(Vec::<usize>::new()));
    let c = contexts.clone();
    let agent = common::start_mock_server(move |req| {
        let c = c.clone();
        async move {
            if req.path == "/health" {
                return ok_health();
            }
            let len = req.json()["context"].as_array().map(|a| a.len()).unwrap_or(0);
            c.lock().unwrap().push(len);
            MockReply::json(200, r#"{"response":"ok"}"#)
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);

    bridge.process_query("one").await;
    let previous = bridge.memory().current_session_id();
    let fresh = bridge.memory().start_new_session();
    assert_ne!(previous, fresh);
    assert!(bridge.memory().get_conversation_context(10).is_empty());

    bridge.process_query("two").await;
    assert_eq!(*contexts.lock().unwrap(), vec![0, 0]);

    let stats = bridge.memory().get_memory_stats();
    assert_eq!(stats.total_messages, 4);
    assert_eq!(stats.archived_sessions, 1);
    assert_eq!(stats.current_session_messages, 2);
}

#[tokio::test]
async fn test_stream_chunks_arrive_in_order() {
    let agent = common::start_mock_server(|req| async move {
        match req.path.as_str() {
            "/health" => ok_health(),
            "/v1/stream" => MockReply::sse(&[
                r#"{"delta":"Hello "}"#,
                r#"{"delta":"world! "}"#,
                r#"{"delta":"test."}"#,
                "[DONE]",
            ]),
            _ => MockReply::json(404, "{}"),
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);

    let (tx, mut rx) = mpsc::channel(16);
    let response = bridge.process_streaming_query("hi", tx).await.unwrap();

    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    assert_eq!(chunks, vec!["Hello ", "world! ", "test."]);

    assert_eq!(response.kind, ResponseKind::Success);
    assert_eq!(response.text(), "Hello world! test.");

    let stored = bridge.memory().get_conversation_context(1);
    assert_eq!(stored[0].content, "Hello world! test.");
    assert_eq!(stored[0].id, response.message_id);
    assert!(stored[0].is_complete());
    assert_eq!(bridge.snapshot().open_streams, 0);
}

#[tokio::test]
async fn test_receiver_dropped_still_persists_reply() {
    let agent = common::start_mock_server(|req| async move {
        match req.path.as_str() {
            "/health" => ok_health(),
            _ => MockReply::sse(&[r#"{"delta":"a"}"#, r#"{"delta":"b"}"#, "[DONE]"]),
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let response = bridge.process_streaming_query("hi", tx).await.unwrap();

    assert_eq!(response.kind, ResponseKind::Success);
    assert_eq!(bridge.memory().get_conversation_context(1)[0].content, "ab");
}

#[tokio::test]
async fn test_circuit_opens_after_threshold() {
    let hits = Hits::default();
    let h = hits.clone();
    let agent = common::start_mock_server(move |req| {
        let h = h.clone();
        async move {
            h.record(&req.path);
            match req.path.as_str() {
                "/health" => ok_health(),
                _ => MockReply::json(503, r#"{"error":"overloaded"}"#),
            }
        }
    })
    .await;

    let mut config = common::bridge_config(agent);
    config.retries.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.cooldown_secs = 60;
    let bridge = common::build(&config);
    assert!(bridge.initialize_connection().await);

    for _ in 0..2 {
        let response = bridge.process_query("hello").await;
        assert_eq!(response.kind, ResponseKind::Fallback);
        assert_eq!(response.payload, Payload::Text(UNAVAILABLE_TEXT.into()));
    }
    assert_eq!(hits.get("/v1/query"), 2);
    assert_eq!(bridge.circuit().state, CircuitState::Open);
    assert!(!bridge.agent_available());
    assert!(bridge.is_connected());

    // Rejected by the breaker without reaching the backend.
    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert!(response.detail.unwrap().contains("circuit"));
    assert_eq!(hits.get("/v1/query"), 2);
    assert_eq!(bridge.status().label(), "degraded");
    assert_eq!(bridge.memory().get_memory_stats().total_messages, 0);
}

#[tokio::test]
async fn test_circuit_admits_trial_after_cooldown() {
    let hits = Hits::default();
    let healthy = Arc::new(AtomicBool::new(false));
    let (h, up) = (hits.clone(), healthy.clone());
    let agent = common::start_mock_server(move |req| {
        let (h, up) = (h.clone(), up.clone());
        async move {
            h.record(&req.path);
            match req.path.as_str() {
                "/health" => ok_health(),
                _ if up.load(Ordering::SeqCst) => MockReply::json(200, r#"{"response":"back"}"#),
                _ => MockReply::json(503, r#"{"error":"overloaded"}"#),
            }
        }
    })
    .await;

    let mut config = common::bridge_config(agent);
    config.retries.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.cooldown_secs = 1;
    let bridge = common::build(&config);
    assert!(bridge.initialize_connection().await);

    for _ in 0..3 {
        assert_eq!(bridge.process_query("hello").await.kind, ResponseKind::Fallback);
    }
    assert_eq!(hits.get("/v1/query"), 2);
    assert_eq!(bridge.circuit().state, CircuitState::Open);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // The fourth call is the half-open trial and reaches the backend.
    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Success);
    assert_eq!(response.payload, Payload::Text("back".into()));
    assert_eq!(hits.get("/v1/query"), 3);
    assert_eq!(bridge.circuit().state, CircuitState::Closed);
    assert!(bridge.agent_available());
    assert_eq!(bridge.memory().get_memory_stats().total_messages, 2);
}

#[tokio::test]
async fn test_rejected_request_falls_back_without_retry() {
    let hits = Hits::default();
    let h = hits.clone();
    let agent = common::start_mock_server(move |req| {
        let h = h.clone();
        async move {
            h.record(&req.path);
            match req.path.as_str() {
                "/health" => ok_health(),
                _ => MockReply::json(400, r#"{"error":"query too long"}"#),
            }
        }
    })
    .await;

    let mut config = common::bridge_config(agent);
    config.retries.max_attempts = 3;
    let bridge = common::build(&config);
    assert!(bridge.initialize_connection().await);

    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(response.payload, Payload::Text(UNAVAILABLE_TEXT.into()));
    assert!(response.detail.unwrap().contains("400"));
    assert_eq!(hits.get("/v1/query"), 1);
    assert_eq!(bridge.status().label(), "degraded");

    let (tx, mut rx) = mpsc::channel(4);
    let response = bridge.process_streaming_query("hello", tx).await.unwrap();
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(rx.recv().await.as_deref(), Some(UNAVAILABLE_TEXT));
    assert_eq!(rx.recv().await, None);
    assert_eq!(hits.get("/v1/stream"), 1);

    assert_eq!(bridge.circuit().consecutive_failures, 0);
    assert_eq!(bridge.memory().get_memory_stats().total_messages, 0);
}

#[tokio::test]
async fn test_retries_then_configured_fallback() {
    let attempts = Arc::new(AtomicU32::new(0));
    let a = attempts.clone();
    let agent = common::start_mock_server(move |req| {
        let a = a.clone();
        async move {
            if req.path == "/health" {
                return ok_health();
            }
            a.fetch_add(1, Ordering::SeqCst);
            MockReply::json(502, "{}")
        }
    })
    .await;

    let mut config = common::bridge_config(agent);
    config.retries.max_attempts = 3;
    config
        .fallbacks
        .insert("process_query".to_string(), Payload::Text("offline".into()));
    let bridge = common::build(&config);
    assert!(bridge.initialize_connection().await);

    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(response.payload, Payload::Text("offline".into()));
    assert!(response.detail.unwrap().contains("after 3 attempts"));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let attempts = Arc::new(AtomicU32::new(0));
    let a = attempts.clone();
    let agent = common::start_mock_server(move |req| {
        let a = a.clone();
        async move {
            if req.path == "/health" {
                return ok_health();
            }
            if a.fetch_add(1, Ordering::SeqCst) == 0 {
                MockReply::json(503, "{}")
            } else {
                MockReply::json(200, r#"{"response":"recovered"}"#)
            }
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);

    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Success);
    assert_eq!(response.text(), "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(bridge.circuit().consecutive_failures, 0);
}

#[tokio::test]
async fn test_unauthorized_forces_one_refresh() {
    let token = common::start_token_endpoint(Duration::ZERO, 3600).await;
    let agent = common::start_mock_server(|req| async move {
        if req.authorization.as_deref() != Some("Bearer token-2") {
            return MockReply::json(401, r#"{"error":"invalid_token"}"#);
        }
        match req.path.as_str() {
            "/health" => ok_health(),
            _ => MockReply::json(200, r#"{"response":"authorized"}"#),
        }
    })
    .await;

    let config = common::with_auth(common::bridge_config(agent), &token);
    let bridge = common::build(&config);

    assert!(bridge.initialize_connection().await);
    assert_eq!(token.request_count(), 2);
    assert_eq!(token.grants(), vec!["client_credentials", "refresh_token"]);

    let response = bridge.process_query("hello").await;
    assert_eq!(response.text(), "authorized");
    assert_eq!(token.request_count(), 2);

    let snapshot = bridge.snapshot();
    assert!(snapshot.auth_enabled);
    assert!(snapshot.authenticated);
}

#[tokio::test]
async fn test_persistent_unauthorized_falls_back() {
    let token = common::start_token_endpoint(Duration::ZERO, 3600).await;
    let hits = Hits::default();
    let h = hits.clone();
    let agent = common::start_mock_server(move |req| {
        let h = h.clone();
        async move {
            h.record(&req.path);
            match req.path.as_str() {
                "/health" => ok_health(),
                _ => MockReply::json(401, "{}"),
            }
        }
    })
    .await;

    let config = common::with_auth(common::bridge_config(agent), &token);
    let bridge = common::build(&config);
    assert!(bridge.initialize_connection().await);
    assert_eq!(token.request_count(), 1);

    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(response.payload, Payload::Text(UNAVAILABLE_TEXT.into()));
    assert!(response.detail.unwrap().contains("401"));

    // One forced refresh, one retried call, no backoff retries.
    assert_eq!(token.request_count(), 2);
    assert_eq!(hits.get("/v1/query"), 2);
    assert_eq!(bridge.circuit().consecutive_failures, 0);
    assert_eq!(bridge.status().label(), "degraded");
    assert_eq!(bridge.memory().get_memory_stats().total_messages, 0);
}

#[tokio::test]
async fn test_interrupted_stream_keeps_partial_reply() {
    let hits = Hits::default();
    let h = hits.clone();
    let agent = common::start_mock_server(move |req| {
        let h = h.clone();
        async move {
            h.record(&req.path);
            match req.path.as_str() {
                "/health" => ok_health(),
                _ => MockReply::sse(&[r#"{"delta":"partial "}"#, r#"{"error":"model overloaded"}"#]),
            }
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);

    let (mut rx, handle) = bridge.open_stream("tell me");
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    let response = handle.await.unwrap().unwrap();

    assert_eq!(chunks, vec!["partial "]);
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(response.payload, Payload::Text("partial ".into()));
    assert!(response.detail.unwrap().contains("model overloaded"));
    assert_eq!(hits.get("/v1/stream"), 1);

    let stored = bridge.memory().get_conversation_context(2);
    assert_eq!(stored[0].content, "tell me");
    assert_eq!(stored[1].content, "partial ");
}

#[tokio::test]
async fn test_stream_failing_before_first_chunk_sends_fallback() {
    let hits = Hits::default();
    let h = hits.clone();
    let agent = common::start_mock_server(move |req| {
        let h = h.clone();
        async move {
            h.record(&req.path);
            match req.path.as_str() {
                "/health" => ok_health(),
                _ => MockReply::json(503, "{}"),
            }
        }
    })
    .await;

    let mut config = common::bridge_config(agent);
    config.retries.max_attempts = 2;
    let bridge = common::build(&config);
    assert!(bridge.initialize_connection().await);

    let (tx, mut rx) = mpsc::channel(4);
    let response = bridge.process_streaming_query("hi", tx).await.unwrap();

    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(rx.recv().await.as_deref(), Some(UNAVAILABLE_TEXT));
    assert_eq!(hits.get("/v1/stream"), 2);
    assert_eq!(bridge.memory().get_memory_stats().total_messages, 0);
}

#[tokio::test]
async fn test_cleanup_cancels_inflight_stream() {
    let agent = common::start_mock_server(|req| async move {
        match req.path.as_str() {
            "/health" => ok_health(),
            _ => MockReply::Sse {
                frames: vec![r#"{"delta":"first"}"#.to_string()],
                delay: Duration::ZERO,
                hold_open: Duration::from_secs(30),
            },
        }
    })
    .await;

    let bridge = common::build(&common::bridge_config(agent));
    assert!(bridge.initialize_connection().await);

    let (mut rx, handle) = bridge.open_stream("long answer");
    assert_eq!(rx.recv().await.as_deref(), Some("first"));
    assert_eq!(bridge.snapshot().open_streams, 1);

    bridge.cleanup_connection();

    let response = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("stream task did not stop after cleanup")
        .unwrap()
        .unwrap();
    assert_eq!(response.kind, ResponseKind::Error);
    assert_eq!(bridge.snapshot().open_streams, 0);
    assert!(!bridge.is_connected());
    assert_eq!(bridge.status(), ConnectionStatus::Disconnected { reason: None });
    assert_eq!(bridge.memory().get_memory_stats().total_messages, 0);
}

#[tokio::test]
async fn test_unreachable_backend_reports_disconnected() {
    // Bind and release a port so nothing is listening on it.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = common::bridge_config(addr);
    config.retries.max_attempts = 2;
    let bridge = common::build(&config);

    assert!(!bridge.initialize_connection().await);
    assert!(matches!(
        bridge.status(),
        ConnectionStatus::Disconnected { reason: Some(_) }
    ));

    let response = bridge.process_query("hello").await;
    assert_eq!(response.kind, ResponseKind::Fallback);
    assert_eq!(response.detail.as_deref(), Some("agent not connected"));
}

#[tokio::test]
async fn test_reloaded_fallbacks_apply_to_next_call() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let mut config = common::bridge_config(addr);
    let bridge = common::build(&config);

    let before = bridge.process_query("hello").await;
    assert_eq!(before.payload, Payload::Text(UNAVAILABLE_TEXT.into()));

    config
        .fallbacks
        .insert("process_query".to_string(), Payload::List(vec!["maintenance".into()]));
    bridge.apply_config(&config);

    let after = bridge.process_query("hello").await;
    assert_eq!(after.payload, Payload::List(vec!["maintenance".into()]));
}
