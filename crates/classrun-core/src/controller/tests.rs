use super::*;
use crate::testing::{ApiCall, MemoryTransport, RecordingViewport, RemoteEnd, ScriptedOrchestrator};
use crate::terminal::Viewport;
use crate::transport::Outgoing;
use classrun_proto::{FileStatus, SUMMARY_ERROR_FILE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Harness {
    handle: SessionHandle,
    api: Arc<ScriptedOrchestrator>,
    transport: MemoryTransport,
    remotes: mpsc::UnboundedReceiver<RemoteEnd>,
    viewport: RecordingViewport,
    viewports_created: Arc<AtomicUsize>,
}

fn harness_with(api: ScriptedOrchestrator) -> Harness {
    let api = Arc::new(api);
    let (transport, remotes) = MemoryTransport::new();
    let viewport = RecordingViewport::new(24, 80);
    let viewports_created = Arc::new(AtomicUsize::new(0));

    let factory_viewport = viewport.clone();
    let counter = Arc::clone(&viewports_created);
    let viewport_factory: ViewportFactory = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(factory_viewport.clone()) as Box<dyn Viewport>
    });

    let controller = SessionController::new(
        ReviewContext {
            submission_id: "sub-42".to_string(),
            file_url: "https://files.example.edu/sub-42/main.py".to_string(),
        },
        api.clone(),
        Arc::new(transport.clone()),
        viewport_factory,
        ClassrunConfig::default(),
    );

    Harness {
        handle: controller.spawn(),
        api,
        transport,
        remotes,
        viewport,
        viewports_created,
    }
}

fn harness() -> Harness {
    let api = ScriptedOrchestrator::new();
    api.push_start(Ok(StartedSession {
        container_id: "abc123".to_string(),
        language: Some("python".to_string()),
    }));
    harness_with(api)
}

async fn wait_for(
    handle: &SessionHandle,
    mut condition: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| condition(s)))
        .await
        .expect("timed out waiting for session state")
        .expect("controller exited")
        .clone()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Starts a session and returns the container side of its open channel.
async fn start_connected(h: &mut Harness) -> RemoteEnd {
    h.handle.request_start();
    let remote = h.remotes.recv().await.unwrap();
    wait_for(&h.handle, |s| s.is_connected).await;
    remote
}

#[tokio::test]
async fn test_start_stream_stop_summarize() {
    let mut h = harness();
    let remote = start_connected(&mut h).await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, LifecyclePhase::Running);
    assert_eq!(snapshot.container_id.as_deref(), Some("abc123"));
    assert_eq!(snapshot.language.as_deref(), Some("python"));
    assert_eq!(remote.url(), "ws://localhost:5000/ws/code-execution/abc123");

    for n in 1..=5 {
        remote.send_text(&format!("{}\n", n));
    }
    wait_until(|| h.viewport.presented_text() == "1\n2\n3\n4\n5\n").await;

    h.handle.request_stop();
    let done = wait_for(&h.handle, |s| s.summary.is_some()).await;

    assert_eq!(done.phase, LifecyclePhase::Idle);
    assert!(!done.is_connected);
    assert_eq!(done.container_id, None);
    assert_eq!(done.summary.unwrap().files()[0].status, FileStatus::Success);
    assert_eq!(h.api.stopped(), vec!["abc123".to_string()]);
    assert!(h.api.calls().contains(&ApiCall::Analyze {
        terminal_log: "1\n2\n3\n4\n5\n".to_string(),
        language_hint: "python".to_string(),
    }));
    assert!(remote.is_closed());
}

#[tokio::test]
async fn test_rejected_start_ends_in_error() {
    let api = ScriptedOrchestrator::new();
    api.push_start(Err(ExecError::Rejected("No runtime for .xyz files".to_string())));
    let h = harness_with(api);

    h.handle.request_start();
    let snapshot = wait_for(&h.handle, |s| s.phase == LifecyclePhase::Error).await;

    assert_eq!(snapshot.error.as_deref(), Some("No runtime for .xyz files"));
    assert_eq!(snapshot.container_id, None);
    assert_eq!(h.transport.open_count(), 0);
    assert_eq!(h.viewports_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unexpected_close_keeps_session_running() {
    let mut h = harness();
    let remote = start_connected(&mut h).await;

    remote.send_text("Enter a number: ");
    wait_until(|| h.viewport.presented_text().contains("Enter a number")).await;
    remote.close(1006, "abnormal");

    let snapshot = wait_for(&h.handle, |s| s.notice.is_some()).await;
    assert_eq!(snapshot.phase, LifecyclePhase::Running);
    assert!(!snapshot.is_connected);
    assert_eq!(snapshot.container_id.as_deref(), Some("abc123"));
    assert!(snapshot.notice.unwrap().contains("Connection lost"));

    let shown = h.viewport.presented_text();
    assert!(shown.starts_with("Enter a number: "));
    assert!(shown.contains("Connection lost"));

    // The partial transcript can still be summarized, without the notice.
    h.handle.request_stop();
    wait_for(&h.handle, |s| s.summary.is_some()).await;
    assert_eq!(h.api.analyzed(), vec!["Enter a number:".to_string()]);
}

#[tokio::test]
async fn test_stop_failure_still_summarizes() {
    let api = ScriptedOrchestrator::new();
    api.push_start(Ok(StartedSession {
        container_id: "abc123".to_string(),
        language: Some("python".to_string()),
    }));
    api.push_stop(Err(ExecError::Api(
        "Failed to stop session: 500 Internal Server Error - boom".to_string(),
    )));
    let mut h = harness_with(api);
    let remote = start_connected(&mut h).await;

    remote.send_text("42\n");
    wait_until(|| h.viewport.presented_text() == "42\n").await;
    h.handle.request_stop();

    let snapshot = wait_for(&h.handle, |s| s.summary.is_some()).await;
    assert_eq!(snapshot.phase, LifecyclePhase::Error);
    assert!(snapshot.error.unwrap().contains("failed to cleanly stop"));
    assert_eq!(h.api.analyzed(), vec!["42\n".to_string()]);

    h.handle.reset();
    let snapshot = wait_for(&h.handle, |s| s.phase == LifecyclePhase::Idle).await;
    assert!(snapshot.error.is_none());
    assert!(snapshot.summary.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stop_timeout_is_an_error_and_still_summarizes() {
    let api = ScriptedOrchestrator::new();
    api.push_start(Ok(StartedSession {
        container_id: "abc123".to_string(),
        language: Some("python".to_string()),
    }));
    api.set_stop_delay(Duration::from_secs(600));
    let mut h = harness_with(api);
    let remote = start_connected(&mut h).await;

    remote.send_text("Hello\n");
    wait_until(|| h.viewport.presented_text() == "Hello\n").await;
    h.handle.request_stop();

    let snapshot = wait_for(&h.handle, |s| s.summary.is_some()).await;
    assert_eq!(snapshot.phase, LifecyclePhase::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("The session failed to cleanly stop: session stop timed out after 15 seconds")
    );
    assert!(!snapshot.is_connected);
    assert_eq!(h.api.stopped(), vec!["abc123".to_string()]);
    assert_eq!(h.api.analyzed(), vec!["Hello\n".to_string()]);
    assert!(remote.is_closed());
}

#[tokio::test]
async fn test_summary_network_error_becomes_synthetic_entry() {
    let api = ScriptedOrchestrator::new();
    api.push_analysis(Err(ExecError::Api("network unreachable".to_string())));
    let mut h = harness_with(api);
    let remote = start_connected(&mut h).await;

    remote.send_text("hello\n");
    wait_until(|| h.viewport.presented_text() == "hello\n").await;
    h.handle.request_stop();

    let snapshot = wait_for(&h.handle, |s| s.summary.is_some()).await;
    assert_eq!(snapshot.phase, LifecyclePhase::Idle);
    let summary = snapshot.summary.unwrap();
    assert_eq!(summary.len(), 1);
    assert_eq!(summary.files()[0].file_name, SUMMARY_ERROR_FILE);
    assert_eq!(summary.files()[0].errors[0].kind, "Fetch Error");
    assert_eq!(summary.files()[0].errors[0].message, "network unreachable");
}

#[tokio::test]
async fn test_repeated_start_keeps_single_channel_and_terminal() {
    let mut h = harness();
    let _remote = start_connected(&mut h).await;

    for _ in 0..5 {
        h.handle.request_start();
    }
    h.handle.fit();
    wait_for(&h.handle, |s| s.phase == LifecyclePhase::Running).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.transport.open_count(), 1);
    assert_eq!(h.viewports_created.load(Ordering::SeqCst), 1);
    let starts = h
        .api
        .calls()
        .iter()
        .filter(|c| matches!(c, ApiCall::Start(_)))
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn test_input_is_forwarded_to_channel() {
    let mut h = harness();
    let mut remote = start_connected(&mut h).await;

    h.handle.input(b"print(6 * 7)\r");
    assert_eq!(
        remote.next_outgoing().await,
        Some(Outgoing::Data(b"print(6 * 7)\r".to_vec()))
    );
}

#[tokio::test]
async fn test_shutdown_while_running_cleans_up() {
    let mut h = harness();
    let remote = start_connected(&mut h).await;
    remote.send_text("running\n");
    wait_until(|| h.viewport.presented_text() == "running\n").await;

    h.handle.shutdown().await;

    assert!(remote.is_closed());
    assert_eq!(h.api.stopped(), vec!["abc123".to_string()]);

    remote.send_text("late output\n");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.viewport.presented_text(), "running\n");
}

#[tokio::test]
async fn test_dropping_handle_triggers_cleanup() {
    let mut h = harness();
    let remote = start_connected(&mut h).await;

    drop(h.handle);

    wait_until(|| remote.is_closed() && h.api.stopped() == vec!["abc123".to_string()]).await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_start_cancels_and_stops_container() {
    let api = ScriptedOrchestrator::new();
    api.set_start_delay(Duration::from_secs(5));
    let h = harness_with(api);

    h.handle.request_start();
    wait_for(&h.handle, |s| s.phase == LifecyclePhase::Starting).await;
    h.handle.request_stop();
    wait_for(&h.handle, |s| s.phase == LifecyclePhase::Stopping).await;

    let snapshot = wait_for(&h.handle, |s| s.phase == LifecyclePhase::Idle).await;
    assert_eq!(snapshot.notice.as_deref(), Some("Start cancelled"));
    assert_eq!(snapshot.container_id, None);
    assert_eq!(h.api.stopped(), vec!["container-1".to_string()]);
    assert_eq!(h.transport.open_count(), 0);
    assert_eq!(h.viewports_created.load(Ordering::SeqCst), 0);
    assert!(h.api.analyzed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_failed_start_returns_to_idle() {
    let api = ScriptedOrchestrator::new();
    api.set_start_delay(Duration::from_secs(5));
    api.push_start(Err(ExecError::Rejected("quota exceeded".to_string())));
    let h = harness_with(api);

    h.handle.request_start();
    h.handle.request_stop();

    let snapshot = wait_for(&h.handle, |s| s.phase == LifecyclePhase::Idle && s.notice.is_some()).await;
    assert_eq!(snapshot.error, None);
    assert!(h.api.stopped().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_is_an_error() {
    let api = ScriptedOrchestrator::new();
    api.set_start_delay(Duration::from_secs(600));
    let h = harness_with(api);

    h.handle.request_start();
    let snapshot = wait_for(&h.handle, |s| s.phase == LifecyclePhase::Error).await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some("session start timed out after 30 seconds")
    );
}

#[tokio::test]
async fn test_stop_with_empty_transcript_skips_summary() {
    let mut h = harness();
    let _remote = start_connected(&mut h).await;

    h.handle.request_stop();
    let snapshot = wait_for(&h.handle, |s| {
        s.phase == LifecyclePhase::Idle && s.notice.is_some()
    })
    .await;

    assert!(snapshot.summary.is_none());
    assert!(h.api.analyzed().is_empty());
    assert_eq!(h.api.stopped(), vec!["abc123".to_string()]);
}

#[tokio::test]
async fn test_restart_after_error_and_dismiss_summary() {
    let api = ScriptedOrchestrator::new();
    api.push_start(Err(ExecError::Api("Failed to start session: 503".to_string())));
    let mut h = harness_with(api);

    h.handle.request_start();
    wait_for(&h.handle, |s| s.phase == LifecyclePhase::Error).await;

    let remote = start_connected(&mut h).await;
    assert!(h.handle.snapshot().error.is_none());
    assert_eq!(remote.url(), "ws://localhost:5000/ws/code-execution/container-1");

    remote.send_text("done\n");
    wait_until(|| h.viewport.presented_text() == "done\n").await;
    h.handle.request_stop();
    wait_for(&h.handle, |s| s.summary.is_some()).await;

    h.handle.dismiss_summary();
    let snapshot = wait_for(&h.handle, |s| s.summary.is_none()).await;
    assert_eq!(snapshot.phase, LifecyclePhase::Idle);
}

#[tokio::test]
async fn test_language_inferred_when_orchestrator_omits_it() {
    let api = ScriptedOrchestrator::new();
    api.push_start(Ok(StartedSession {
        container_id: "abc123".to_string(),
        language: None,
    }));
    let mut h = harness_with(api);

    let _remote = start_connected(&mut h).await;
    assert_eq!(h.handle.snapshot().language.as_deref(), Some("python"));
}

#[tokio::test]
async fn test_reset_ignored_outside_error() {
    let mut h = harness();
    let _remote = start_connected(&mut h).await;

    h.handle.reset();
    h.handle.request_start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.phase, LifecyclePhase::Running);
    assert!(snapshot.is_connected);
}
