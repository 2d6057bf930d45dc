//! Integration tests against a real child process.
//!
//! These tests drive the `mock-mcp-server` binary built from this package.

use std::sync::Arc;
use std::time::Duration;

use mcp_harness_assert::{Assertion, ErrorKind};
use mcp_harness_mcp::{
    Direction, EntryKind, Framing, McpError, ServerConfig, Session, SessionState, StderrMode,
    Supervisor, ToolCaller, Transcript,
};
use serde_json::json;

const MOCK: &str = env!("CARGO_BIN_EXE_mock-mcp-server");
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

fn mock(name: &str) -> ServerConfig {
    ServerConfig::new(name, MOCK)
        .with_startup_timeout(Duration::from_secs(10))
        .with_shutdown_timeout(Duration::from_secs(2))
        .with_stderr(StderrMode::Discard)
}

async fn start_one(config: ServerConfig) -> (Supervisor, Arc<Session>, Transcript) {
    let transcript = Transcript::new();
    let supervisor = Supervisor::new(transcript.clone());
    let name = config.name.clone();
    let report = supervisor.start(vec![config]).await.unwrap();
    assert!(report.all_started(), "startup failed: {:?}", report.failed);
    let session = supervisor.get(&name).unwrap();
    (supervisor, session, transcript)
}

#[tokio::test]
async fn test_lines_framing_round_trip() {
    let (supervisor, session, _) = start_one(mock("lines")).await;
    assert_eq!(session.server_info().unwrap().name, "mock-mcp-server");

    let caller = ToolCaller::new(session, CALL_TIMEOUT);
    let result = caller.call("echo", json!({"text": "hello"}), None).await;
    assert!(result.is_success());
    assert_eq!(result.text(), "hello");

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_content_length_framing_round_trip() {
    let config = mock("framed")
        .with_args(vec!["--framing".into(), "content-length".into()])
        .with_framing(Framing::ContentLength);
    let (supervisor, session, _) = start_one(config).await;

    let caller = ToolCaller::new(session, CALL_TIMEOUT);
    let result = caller.call("add", json!({"a": 2, "b": 3}), None).await;
    assert_eq!(result.text(), "5");

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_list_tools() {
    let (supervisor, session, _) = start_one(mock("tools")).await;
    let tools = session.list_tools(CALL_TIMEOUT).await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["echo", "add", "slow", "crash", "write_file", "notify"]
    );
    assert_eq!(tools[0].description.as_deref(), Some("Echo back the input"));
    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let (supervisor, session, transcript) = start_one(mock("concurrent")).await;
    let caller = ToolCaller::new(session, CALL_TIMEOUT);

    let (slow, fast) = tokio::join!(
        caller.call("slow", json!({"delay_ms": 300}), None),
        caller.call("echo", json!({"text": "fast"}), None),
    );
    assert_eq!(slow.text(), "Slept for 300 ms");
    assert_eq!(fast.text(), "fast");
    assert!(fast.duration() < slow.duration());

    // The echo response was read first.
    let responses: Vec<_> = transcript
        .with_kind(EntryKind::Response)
        .into_iter()
        .filter(|e| e.method.as_deref() == Some("tools/call"))
        .collect();
    assert_eq!(responses.len(), 2);
    assert!(responses[0].summary.contains("fast"));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_timeout_then_late_response() {
    let (supervisor, session, transcript) = start_one(mock("late")).await;
    let caller = ToolCaller::new(Arc::clone(&session), CALL_TIMEOUT);

    let result = caller
        .call(
            "slow",
            json!({"delay_ms": 300}),
            Some(Duration::from_millis(50)),
        )
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(result.duration(), Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let anomalies = transcript.with_kind(EntryKind::Anomaly);
    assert_eq!(anomalies.len(), 1);
    assert!(anomalies[0].summary.starts_with("late response"));

    // The session survives a late response.
    assert!(session.is_usable());
    let ok = caller.call("echo", json!({"text": "still here"}), None).await;
    assert!(ok.is_success());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_server_crash_closes_connection() {
    let (supervisor, session, _) = start_one(mock("crashy")).await;
    let caller = ToolCaller::new(Arc::clone(&session), CALL_TIMEOUT);

    let result = caller.call("crash", json!({}), None).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Transport));
    assert!(matches!(
        session.state(),
        SessionState::Failed(McpError::ConnectionClosed)
    ));

    let again = caller.call("echo", json!({"text": "x"}), None).await;
    assert!(!again.is_success());
    assert!(!supervisor.is_running("crashy"));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_garbage_frame_is_protocol_error() {
    let config = mock("garbage").with_args(vec!["--garbage-on".into(), "echo".into()]);
    let (supervisor, session, transcript) = start_one(config).await;
    let caller = ToolCaller::new(Arc::clone(&session), CALL_TIMEOUT);

    let result = caller.call("echo", json!({"text": "x"}), None).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Protocol));
    assert!(matches!(
        session.state(),
        SessionState::Failed(McpError::Protocol(_))
    ));
    assert!(
        transcript
            .with_kind(EntryKind::Anomaly)
            .iter()
            .any(|e| e.summary == "this is not json")
    );

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_duplicate_response_is_anomaly() {
    let config = mock("dupes").with_arg("--duplicate-responses");
    let (supervisor, session, transcript) = start_one(config).await;
    let caller = ToolCaller::new(Arc::clone(&session), CALL_TIMEOUT);

    let result = caller.call("echo", json!({"text": "twice"}), None).await;
    assert_eq!(result.text(), "twice");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let anomalies = transcript.with_kind(EntryKind::Anomaly);
    assert_eq!(anomalies.len(), 1);
    assert!(anomalies[0].summary.starts_with("response with no pending request"));
    assert!(session.is_usable());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_notifications_are_recorded() {
    let (supervisor, session, transcript) = start_one(mock("notes")).await;
    let caller = ToolCaller::new(session, CALL_TIMEOUT);

    let result = caller.call("notify", json!({"message": "hi"}), None).await;
    assert!(result.is_success());

    let notes: Vec<_> = transcript
        .with_kind(EntryKind::Notification)
        .into_iter()
        .filter(|e| e.direction == Direction::Inbound)
        .collect();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].method.as_deref(), Some("notifications/message"));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let config = mock("pinger").with_arg("--ping-on-init");
    let (supervisor, session, transcript) = start_one(config).await;

    // A round trip after the handshake guarantees the ping has been read.
    let caller = ToolCaller::new(session, CALL_TIMEOUT);
    caller.call("echo", json!({"text": "x"}), None).await;

    let entries = transcript.entries_for("pinger");
    assert!(entries.iter().any(|e| e.direction == Direction::Inbound
        && e.kind == EntryKind::Request
        && e.method.as_deref() == Some("ping")));
    assert!(entries.iter().any(|e| e.direction == Direction::Outbound
        && e.kind == EntryKind::Response
        && e.method.as_deref() == Some("ping")));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_supervisor_isolates_startup_failures() {
    let transcript = Transcript::new();
    let supervisor = Supervisor::new(transcript);
    let report = supervisor
        .start(vec![
            mock("good"),
            ServerConfig::new("missing", "nonexistent-command-12345"),
            mock("sleepy")
                .with_args(vec!["--startup-delay-ms".into(), "3000".into()])
                .with_startup_timeout(Duration::from_millis(200)),
        ])
        .await
        .unwrap();

    assert_eq!(report.started, vec!["good"]);
    assert_eq!(report.failed.len(), 2);
    assert!(matches!(report.failed[0].error, McpError::SpawnFailed { .. }));
    assert!(matches!(
        report.failed[1].error,
        McpError::StartupTimeout { ref server, timeout_ms: 200 } if server == "sleepy"
    ));

    assert!(supervisor.is_running("good"));
    assert_eq!(supervisor.default_session().unwrap().name(), "good");
    assert!(matches!(supervisor.get("sleepy"), Err(McpError::NotFound(_))));

    let first = supervisor.stop_all().await;
    assert_eq!(first.stopped, vec!["good"]);
    assert!(first.errors.is_empty());
    let second = supervisor.stop_all().await;
    assert!(second.stopped.is_empty());
}

#[tokio::test]
async fn test_teardown_cancels_in_flight_call() {
    let (supervisor, session, _) = start_one(mock("busy")).await;
    let caller = Arc::new(ToolCaller::new(session, CALL_TIMEOUT));

    let pending = tokio::spawn({
        let caller = Arc::clone(&caller);
        async move { caller.call("slow", json!({"delay_ms": 5000}), None).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    supervisor.stop_all().await;
    let result = pending.await.unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
}

#[tokio::test]
async fn test_restart_replaces_failed_session() {
    let (supervisor, session, _) = start_one(mock("phoenix")).await;
    let caller = ToolCaller::new(session, CALL_TIMEOUT);
    caller.call("crash", json!({}), None).await;
    assert!(!supervisor.is_running("phoenix"));

    let fresh = supervisor.restart("phoenix").await.unwrap();
    assert!(fresh.is_usable());
    assert!(supervisor.is_running("phoenix"));

    let caller = ToolCaller::new(fresh, CALL_TIMEOUT);
    assert!(
        caller
            .call_and_assert(
                "echo",
                json!({"text": "back"}),
                &[Assertion::success(), Assertion::equals("back")],
                None,
            )
            .await
            .is_ok()
    );

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_tool_error_and_assertions() {
    let (supervisor, session, _) = start_one(mock("asserts")).await;
    let caller = ToolCaller::new(session, CALL_TIMEOUT);

    let report = caller
        .call_expect_error("no_such_tool", json!({}), Some("tool not found"), None)
        .await
        .unwrap();
    assert_eq!(report.result.error_kind(), Some(ErrorKind::Tool));

    let failure = caller
        .call_and_assert(
            "echo",
            json!({"text": "abc"}),
            &[
                Assertion::contains("xyz"),
                Assertion::matches("^a.c$").unwrap(),
                Assertion::duration_under(Duration::from_secs(5)),
            ],
            None,
        )
        .await
        .unwrap_err();
    let passed: Vec<bool> = failure.outcomes().iter().map(|o| o.passed).collect();
    assert_eq!(passed, vec![false, true, true]);
    assert_eq!(caller.history().len(), 2);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_three_servers_one_exceeds_startup_timeout() {
    let supervisor = Supervisor::new(Transcript::new());
    let report = supervisor
        .start(vec![
            mock("alpha"),
            mock("beta"),
            mock("gamma")
                .with_args(vec!["--startup-delay-ms".into(), "3000".into()])
                .with_startup_timeout(Duration::from_millis(200)),
        ])
        .await
        .unwrap();

    assert_eq!(report.started, vec!["alpha", "beta"]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].error, McpError::StartupTimeout { .. }));

    for name in ["alpha", "beta"] {
        let caller = ToolCaller::new(supervisor.get(name).unwrap(), CALL_TIMEOUT);
        assert!(caller.call("echo", json!({"text": name}), None).await.is_success());
    }
    assert!(matches!(supervisor.get("gamma"), Err(McpError::NotFound(_))));

    let teardown = supervisor.stop_all().await;
    assert_eq!(teardown.stopped.len(), 2);
    assert!(teardown.errors.is_empty());
}

#[tokio::test]
async fn test_nonexistent_tool_reports_structured_error() {
    let (supervisor, session, _) = start_one(mock("missing-tool")).await;
    let caller = ToolCaller::new(session, CALL_TIMEOUT);

    let report = caller
        .check(
            "does_not_exist",
            json!({}),
            &[Assertion::error_containing("not found"), Assertion::success()],
            None,
        )
        .await;
    assert!(!report.result.is_success());
    assert_eq!(report.result.error_kind(), Some(ErrorKind::Tool));
    assert!(report.outcomes[0].passed);
    assert!(!report.outcomes[1].passed);
    assert!(
        report.outcomes[1]
            .detail
            .as_deref()
            .unwrap()
            .contains("Tool not found: does_not_exist")
    );

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_server_that_stops_reading_stdin() {
    let (supervisor, session, _) =
        start_one(mock("deaf").with_arg("--stop-reading-after-init")).await;

    // Larger than any pipe buffer, so the write can never complete.
    let blob = "x".repeat(1024 * 1024);
    let deadline = Duration::from_millis(300);
    let started = std::time::Instant::now();
    let (first, second) = tokio::join!(
        session.call_tool("echo", json!({"text": blob}), deadline),
        session.call_tool("echo", json!({"text": "queued"}), deadline),
    );
    assert!(matches!(first, Err(McpError::Timeout { .. })), "{first:?}");
    assert!(second.is_err());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!session.is_usable());

    let teardown = tokio::time::timeout(Duration::from_secs(10), supervisor.stop_all())
        .await
        .expect("teardown hung behind a stalled write");
    assert_eq!(teardown.stopped, vec!["deaf"]);
}

#[tokio::test]
async fn test_stop_one_server_keeps_siblings() {
    let supervisor = Supervisor::new(Transcript::new());
    supervisor
        .start(vec![mock("keep"), mock("drop")])
        .await
        .unwrap();

    supervisor.stop("drop").await.unwrap();
    assert!(!supervisor.is_running("drop"));
    assert!(matches!(supervisor.get("drop"), Err(McpError::NotFound(_))));
    assert_eq!(supervisor.started_names(), vec!["keep"]);

    let caller = ToolCaller::new(supervisor.get("keep").unwrap(), CALL_TIMEOUT);
    assert!(caller.call("echo", json!({"text": "still here"}), None).await.is_success());

    let fresh = supervisor.restart("drop").await.unwrap();
    assert!(fresh.is_usable());

    let teardown = supervisor.stop_all().await;
    assert_eq!(teardown.stopped.len(), 2);
}
