//! Interactive sessions in the current terminal.
//!
//! The terminal is put in raw mode so keystrokes reach the container as typed.
//! `Ctrl-]` ends the session; its summary is printed once raw mode is off.

use anyhow::{Context, Result};
use classrun_core::{
    ClassrunConfig, ExecutionSummary, HttpOrchestrator, LifecyclePhase, ReviewContext,
    SessionController, SessionHandle, SessionSnapshot, Viewport, ViewportFactory, WsTransport,
};
use std::io::{self, Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Ctrl-]
const STOP_KEY: u8 = 0x1d;

/// How an interactive session ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    pub summary: Option<ExecutionSummary>,
    pub notice: Option<String>,
    pub error: Option<String>,
}

impl SessionOutcome {
    fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            summary: snapshot.summary.clone(),
            notice: snapshot.notice.clone(),
            error: snapshot.error.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Draws straight to stdout.
struct StdoutViewport;

impl Viewport for StdoutViewport {
    fn dimensions(&self) -> Option<(u16, u16)> {
        crossterm::terminal::size().ok().map(|(cols, rows)| (rows, cols))
    }

    fn present(&mut self, bytes: &[u8]) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }

    fn redraw(&mut self, screen: &[u8]) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(b"\x1b[H\x1b[2J");
        let _ = stdout.write_all(screen);
        let _ = stdout.flush();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum InputEvent {
    Data(Vec<u8>),
    Stop,
}

/// Splits a chunk read from stdin at the stop key.
fn split_input(chunk: &[u8]) -> Vec<InputEvent> {
    match chunk.iter().position(|&b| b == STOP_KEY) {
        Some(0) => vec![InputEvent::Stop],
        Some(idx) => vec![InputEvent::Data(chunk[..idx].to_vec()), InputEvent::Stop],
        None if chunk.is_empty() => Vec::new(),
        None => vec![InputEvent::Data(chunk.to_vec())],
    }
}

/// Reads stdin on a dedicated thread. The channel closes on EOF or a read error.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<InputEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for event in split_input(&buf[..n]) {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("stdin reader: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader exiting");
    });
    rx
}

/// Terminal resize notifications.
struct ResizeEvents {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl ResizeEvents {
    #[cfg(unix)]
    fn new() -> Self {
        use tokio::signal::unix::{SignalKind, signal};
        let signal = signal(SignalKind::window_change())
            .map_err(|e| warn!("Cannot watch terminal resizes: {}", e))
            .ok();
        Self { signal }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if let Some(signal) = self.signal.as_mut() {
            if signal.recv().await.is_some() {
                return;
            }
            self.signal = None;
        }
        std::future::pending::<()>().await;
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// Tracks whether the session has run its course.
#[derive(Debug, Default)]
struct Progress {
    started: bool,
    stop_requested: bool,
}

impl Progress {
    /// Returns true once the session is over and nothing more will arrive.
    ///
    /// A session that failed to stop keeps its container id until the
    /// summary of what was captured lands.
    fn observe(&mut self, snapshot: &SessionSnapshot) -> bool {
        match snapshot.phase {
            LifecyclePhase::Idle => self.started || self.stop_requested,
            LifecyclePhase::Error => snapshot.container_id.is_none(),
            _ => {
                self.started = true;
                false
            }
        }
    }

    fn request_stop(&mut self, handle: &SessionHandle) {
        if !self.stop_requested {
            self.stop_requested = true;
            handle.request_stop();
        }
    }
}

/// Runs one session to completion in the current terminal.
pub async fn run(
    context: ReviewContext,
    api: Arc<HttpOrchestrator>,
    config: ClassrunConfig,
) -> Result<SessionOutcome> {
    let viewports: ViewportFactory =
        Arc::new(|| Box::new(StdoutViewport) as Box<dyn Viewport>);
    let handle =
        SessionController::new(context, api, Arc::new(WsTransport), viewports, config).spawn();

    println!("Starting session... press Ctrl-] to stop.");
    crossterm::terminal::enable_raw_mode().context("Failed to enable raw mode")?;
    let raw_mode = scopeguard::guard((), |()| {
        let _ = crossterm::terminal::disable_raw_mode();
    });

    let outcome = drive(&handle, spawn_stdin_reader()).await;

    drop(raw_mode);
    println!();
    handle.shutdown().await;
    Ok(outcome)
}

async fn drive(
    handle: &SessionHandle,
    mut input: mpsc::UnboundedReceiver<InputEvent>,
) -> SessionOutcome {
    let mut snapshots = handle.subscribe();
    let mut resizes = ResizeEvents::new();
    let mut progress = Progress::default();
    let mut input_open = true;

    handle.request_start();

    loop {
        {
            let snapshot = snapshots.borrow_and_update();
            if progress.observe(&snapshot) {
                return SessionOutcome::from_snapshot(&snapshot);
            }
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return SessionOutcome::from_snapshot(&snapshots.borrow());
                }
            }
            event = input.recv(), if input_open => match event {
                Some(InputEvent::Data(bytes)) => handle.input(&bytes),
                Some(InputEvent::Stop) => progress.request_stop(handle),
                None => {
                    input_open = false;
                    progress.request_stop(handle);
                }
            },
            () = resizes.recv() => handle.fit(),
        }
    }
}
