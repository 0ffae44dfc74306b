//! Session lifecycle controller.
//!
//! The controller is the single authority over one review context's session.
//! It runs as an actor: UI commands arrive through a [`SessionHandle`], side
//! tasks (remote calls, the channel) post events back, and each event is
//! handled by one transition function. State is published to the UI as a
//! [`SessionSnapshot`] after every step.
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Summarizing -> Idle
//!            |           |           |
//!            +-----------+-----------+--> Error --reset--> Idle
//! ```
//!
//! Every session gets a new epoch. Events from side tasks carry the epoch
//! they were started under and are dropped once it is no longer current.

#[cfg(test)]
mod tests;

use crate::api::{OrchestratorApi, StartedSession};
use crate::channel::{ChannelAdapter, ChannelEvent, ChannelObserver};
use crate::config::ClassrunConfig;
use crate::error::{ExecError, with_deadline};
use crate::language::infer_language;
use crate::summarizer::TranscriptSummarizer;
use crate::terminal::{SharedTerminal, TerminalSurface, ViewportFactory};
use crate::transport::Transport;
use classrun_proto::{ExecutionSummary, StartSessionRequest};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const START_CANCELLED: &str = "Start cancelled";
const NOTHING_CAPTURED: &str = "Session stopped; no output was captured to summarize";

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LifecyclePhase {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Summarizing,
    Error,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Idle => "idle",
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Stopping => "stopping",
            LifecyclePhase::Summarizing => "summarizing",
            LifecyclePhase::Error => "error",
        }
    }

    /// True while a session holds, or is acquiring, remote resources.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            LifecyclePhase::Starting
                | LifecyclePhase::Running
                | LifecyclePhase::Stopping
                | LifecyclePhase::Summarizing
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub phase: LifecyclePhase,
    /// Only ever true while `phase` is `Running`.
    pub is_connected: bool,
    pub container_id: Option<String>,
    pub language: Option<String>,
    /// Latest summary, kept until dismissed or a new session starts.
    pub summary: Option<ExecutionSummary>,
    /// Neutral status message.
    pub notice: Option<String>,
    /// User-facing failure message.
    pub error: Option<String>,
}

/// The submission under review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewContext {
    pub submission_id: String,
    pub file_url: String,
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Reset,
    DismissSummary,
    Input(Vec<u8>),
    Fit,
}

#[derive(Debug)]
enum Event {
    StartSucceeded { epoch: u64, session: StartedSession },
    StartFailed { epoch: u64, error: ExecError },
    Channel { epoch: u64, event: ChannelEvent },
    StopAcked { epoch: u64 },
    StopFailed { epoch: u64, error: ExecError },
    SummaryReady { epoch: u64, summary: ExecutionSummary },
    SummaryFailed { epoch: u64, message: String },
}

pub struct SessionController {
    context: ReviewContext,
    api: Arc<dyn OrchestratorApi>,
    summarizer: TranscriptSummarizer,
    adapter: ChannelAdapter,
    viewport_factory: ViewportFactory,
    config: ClassrunConfig,

    phase: LifecyclePhase,
    epoch: u64,
    container_id: Option<String>,
    language: Option<String>,
    connected: bool,
    start_in_flight: bool,
    start_cancelled: bool,
    stop_issued: bool,
    terminal: Option<SharedTerminal>,
    transcript: String,

    summary: Option<ExecutionSummary>,
    notice: Option<String>,
    error: Option<String>,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(
        context: ReviewContext,
        api: Arc<dyn OrchestratorApi>,
        transport: Arc<dyn Transport>,
        viewport_factory: ViewportFactory,
        config: ClassrunConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());

        Self {
            context,
            summarizer: TranscriptSummarizer::new(Arc::clone(&api), config.api.analyze_timeout()),
            adapter: ChannelAdapter::new(transport, config.api.clone()),
            api,
            viewport_factory,
            config,
            phase: LifecyclePhase::Idle,
            epoch: 0,
            container_id: None,
            language: None,
            connected: false,
            start_in_flight: false,
            start_cancelled: false,
            stop_issued: false,
            terminal: None,
            transcript: String::new(),
            summary: None,
            notice: None,
            error: None,
            events_tx,
            events_rx,
            snapshot,
        }
    }

    /// Runs the controller on the current tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let snapshot = self.snapshot.subscribe();
        let task = tokio::spawn(self.run(commands_rx));
        SessionHandle {
            commands,
            snapshot,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Session controller started for submission {}", self.context.submission_id);
        loop {
            tokio::select! {
                biased;
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
            self.publish();
        }

        self.force_cleanup().await;
        self.publish();
        debug!("Session controller for submission {} exited", self.context.submission_id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.on_start_requested().await,
            Command::Stop => self.on_stop_requested().await,
            Command::Reset => self.on_reset().await,
            Command::DismissSummary => self.summary = None,
            Command::Input(bytes) => self.on_input(&bytes),
            Command::Fit => {
                if let Some(terminal) = &self.terminal {
                    terminal.fit();
                }
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::StartSucceeded { epoch, session } => {
                self.on_remote_session_created(epoch, session).await;
            }
            Event::StartFailed { epoch, error } => self.on_remote_start_failed(epoch, &error),
            Event::Channel { epoch, event } => self.on_channel_event(epoch, event),
            Event::StopAcked { epoch } => self.on_remote_stop_acked(epoch),
            Event::StopFailed { epoch, error } => self.on_remote_stop_failed(epoch, &error),
            Event::SummaryReady { epoch, summary } => self.on_summary(epoch, summary),
            Event::SummaryFailed { epoch, message } => {
                self.on_summary(epoch, ExecutionSummary::failure("Summary Error", message));
            }
        }
    }

    // Transitions

    async fn on_start_requested(&mut self) {
        if self.phase.is_busy() {
            debug!("Ignoring start request while {}", self.phase);
            return;
        }

        self.release_resources().await;
        self.clear_session();
        self.summary = None;
        self.notice = None;
        self.error = None;

        self.epoch += 1;
        self.transition(LifecyclePhase::Starting);
        self.spawn_start();
    }

    async fn on_remote_session_created(&mut self, epoch: u64, session: StartedSession) {
        if epoch != self.epoch {
            warn!("Start result for a discarded session; stopping container {}", session.container_id);
            self.spawn_orphan_stop(session.container_id);
            return;
        }
        self.start_in_flight = false;

        if self.start_cancelled {
            info!("Start was cancelled; stopping container {}", session.container_id);
            self.container_id = Some(session.container_id.clone());
            self.spawn_stop(session.container_id);
            return;
        }
        if self.phase != LifecyclePhase::Starting {
            warn!("Unexpected start result while {}", self.phase);
            self.spawn_orphan_stop(session.container_id);
            return;
        }

        self.language = session
            .language
            .or_else(|| infer_language(&self.context.file_url).map(str::to_string));
        self.container_id = Some(session.container_id.clone());
        self.transition(LifecyclePhase::Running);

        let mut surface = TerminalSurface::new(&self.config.terminal);
        surface.attach((self.viewport_factory)());
        let terminal = SharedTerminal::new(surface);
        self.terminal = Some(terminal.clone());

        let events = self.events_tx.clone();
        let observer: ChannelObserver = Arc::new(move |event| {
            let _ = events.send(Event::Channel { epoch, event });
        });

        let connected = self
            .adapter
            .connect(&session.container_id, Arc::new(terminal.clone()), observer)
            .await
            .map(|channel| channel.writer());

        match connected {
            Ok(writer) => {
                terminal.lock().on_input(Box::new(move |bytes| {
                    writer.send(bytes);
                }));
            }
            Err(e) => {
                error!("Cannot connect to container {}: {}", session.container_id, e);
                self.error = Some(format!("Could not connect to the session: {}", e.user_message()));
                self.spawn_orphan_stop(session.container_id);
                self.release_resources().await;
                self.clear_session();
                self.transition(LifecyclePhase::Error);
            }
        }
    }

    fn on_remote_start_failed(&mut self, epoch: u64, error: &ExecError) {
        if epoch != self.epoch {
            return;
        }
        self.start_in_flight = false;

        if self.start_cancelled {
            info!("Cancelled start failed on its own: {}", error);
            self.clear_session();
            self.notice = Some(START_CANCELLED.to_string());
            self.transition(LifecyclePhase::Idle);
            return;
        }

        warn!("Failed to start session: {}", error);
        self.error = Some(error.user_message());
        self.transition(LifecyclePhase::Error);
    }

    fn on_channel_event(&mut self, epoch: u64, event: ChannelEvent) {
        if epoch != self.epoch {
            debug!("Dropping channel event from a previous session: {:?}", event);
            return;
        }

        match event {
            ChannelEvent::Opened => {
                if self.phase == LifecyclePhase::Running {
                    self.connected = true;
                    self.notice = None;
                }
            }
            ChannelEvent::Closed {
                code,
                reason,
                initiated_locally,
            } => {
                self.connected = false;
                if self.phase == LifecyclePhase::Running && !initiated_locally {
                    warn!("Connection to container lost ({}: {})", code, reason);
                    let message = if reason.is_empty() {
                        format!("Connection lost (code {})", code)
                    } else {
                        format!("Connection lost (code {}: {})", code, reason)
                    };
                    if let Some(terminal) = &self.terminal {
                        terminal.notice(&message);
                    }
                    self.notice = Some(message);
                }
            }
        }
    }

    async fn on_stop_requested(&mut self) {
        match self.phase {
            LifecyclePhase::Starting => {
                info!("Stop requested while starting; cancelling the pending start");
                self.start_cancelled = true;
                self.notice = Some("Cancelling start".to_string());
                self.transition(LifecyclePhase::Stopping);
            }
            LifecyclePhase::Running => {
                self.transition(LifecyclePhase::Stopping);

                // Close first so nothing is written while the transcript is read.
                self.adapter.close().await;
                self.connected = false;
                self.transcript = self
                    .terminal
                    .as_ref()
                    .map(SharedTerminal::read_all_lines)
                    .unwrap_or_default();
                debug!("Captured {} bytes of transcript", self.transcript.len());

                if let Some(container_id) = self.container_id.clone() {
                    self.spawn_stop(container_id);
                } else {
                    self.on_remote_stop_acked(self.epoch);
                }
            }
            phase => debug!("Ignoring stop request while {}", phase),
        }
    }

    fn on_remote_stop_acked(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        if self.start_cancelled {
            self.finish_cancelled_start();
            return;
        }
        if self.phase != LifecyclePhase::Stopping {
            return;
        }

        if self.transcript.trim().is_empty() {
            self.dispose_terminal();
            self.clear_session();
            self.notice = Some(NOTHING_CAPTURED.to_string());
            self.transition(LifecyclePhase::Idle);
        } else {
            self.transition(LifecyclePhase::Summarizing);
            self.spawn_summary();
        }
    }

    fn on_remote_stop_failed(&mut self, epoch: u64, error: &ExecError) {
        if epoch != self.epoch {
            return;
        }
        if self.start_cancelled {
            warn!("Stopping the cancelled session failed: {}", error);
            self.finish_cancelled_start();
            return;
        }
        if self.phase != LifecyclePhase::Stopping {
            return;
        }

        warn!("Failed to stop session: {}", error);
        self.error = Some(format!(
            "The session failed to cleanly stop: {}",
            error.user_message()
        ));
        self.transition(LifecyclePhase::Error);

        if self.transcript.trim().is_empty() {
            self.dispose_terminal();
            self.clear_session();
        } else {
            self.spawn_summary();
        }
    }

    fn on_summary(&mut self, epoch: u64, summary: ExecutionSummary) {
        if epoch != self.epoch {
            debug!("Dropping summary from a previous session");
            return;
        }

        info!("Summary ready ({} file(s))", summary.len());
        self.summary = Some(summary);
        self.dispose_terminal();
        self.clear_session();
        if self.phase == LifecyclePhase::Summarizing {
            self.transition(LifecyclePhase::Idle);
        }
    }

    async fn on_reset(&mut self) {
        if self.phase != LifecyclePhase::Error {
            debug!("Ignoring reset while {}", self.phase);
            return;
        }
        self.release_resources().await;
        self.clear_session();
        self.error = None;
        self.transition(LifecyclePhase::Idle);
    }

    fn on_input(&self, bytes: &[u8]) {
        match &self.terminal {
            Some(terminal) if self.phase == LifecyclePhase::Running => terminal.input(bytes),
            _ => debug!(len = bytes.len(), "Dropping input while {}", self.phase),
        }
    }

    fn finish_cancelled_start(&mut self) {
        self.clear_session();
        self.notice = Some(START_CANCELLED.to_string());
        self.transition(LifecyclePhase::Idle);
    }

    // Side tasks

    fn spawn_start(&mut self) {
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        let epoch = self.epoch;
        let limit = self.config.api.start_timeout();
        let request = StartSessionRequest {
            file_url: self.context.file_url.clone(),
            submission_id: self.context.submission_id.clone(),
        };

        self.start_in_flight = true;
        tokio::spawn(async move {
            let event = match with_deadline("session start", limit, api.start_session(&request)).await
            {
                Ok(session) => Event::StartSucceeded { epoch, session },
                Err(error) => Event::StartFailed { epoch, error },
            };
            let _ = events.send(event);
        });
    }

    fn spawn_stop(&mut self, container_id: String) {
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        let epoch = self.epoch;
        let limit = self.config.api.stop_timeout();

        self.stop_issued = true;
        tokio::spawn(async move {
            let event = match with_deadline("session stop", limit, api.stop_session(&container_id)).await
            {
                Ok(()) => Event::StopAcked { epoch },
                Err(error) => Event::StopFailed { epoch, error },
            };
            let _ = events.send(event);
        });
    }

    /// Stops a container no session owns. The outcome is only logged.
    fn spawn_orphan_stop(&self, container_id: String) {
        let api = Arc::clone(&self.api);
        let limit = self.config.api.stop_timeout();
        tokio::spawn(async move {
            match with_deadline("session stop", limit, api.stop_session(&container_id)).await {
                Ok(()) => info!("Stopped orphaned container {}", container_id),
                Err(e) => warn!("Failed to stop orphaned container {}: {}", container_id, e),
            }
        });
    }

    fn spawn_summary(&self) {
        let summarizer = self.summarizer.clone();
        let events = self.events_tx.clone();
        let epoch = self.epoch;
        let transcript = self.transcript.clone();
        let language = self.language.clone();

        tokio::spawn(async move {
            let job = tokio::spawn(async move {
                summarizer.summarize(&transcript, language.as_deref()).await
            });
            let event = match job.await {
                Ok(summary) => Event::SummaryReady { epoch, summary },
                Err(e) => {
                    error!("Summarization task failed: {}", e);
                    Event::SummaryFailed {
                        epoch,
                        message: "Summarization stopped unexpectedly".to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    // Resources

    /// Closes the channel and disposes the terminal.
    async fn release_resources(&mut self) {
        self.adapter.close().await;
        self.connected = false;
        self.dispose_terminal();
    }

    fn dispose_terminal(&mut self) {
        if let Some(terminal) = self.terminal.take() {
            terminal.dispose();
        }
    }

    fn clear_session(&mut self) {
        self.container_id = None;
        self.language = None;
        self.connected = false;
        self.start_cancelled = false;
        self.stop_issued = false;
        self.transcript.clear();
    }

    /// Releases everything when the owning context goes away.
    async fn force_cleanup(&mut self) {
        if self.phase != LifecyclePhase::Idle || self.terminal.is_some() {
            info!("Session context discarded while {}; cleaning up", self.phase);
        }

        self.release_resources().await;

        if self.start_in_flight {
            let epoch = self.epoch;
            let events = &mut self.events_rx;
            let outcome = tokio::time::timeout(self.config.api.start_timeout(), async {
                while let Some(event) = events.recv().await {
                    match event {
                        Event::StartSucceeded { epoch: e, session } if e == epoch => {
                            return Some(session.container_id);
                        }
                        Event::StartFailed { epoch: e, .. } if e == epoch => return None,
                        _ => {}
                    }
                }
                None
            })
            .await;

            if let Ok(Some(container_id)) = outcome {
                self.container_id = Some(container_id);
                self.stop_issued = false;
            }
            self.start_in_flight = false;
        }

        if let Some(container_id) = self.container_id.take() {
            if self.stop_issued {
                debug!("Stop for container {} already issued", container_id);
            } else {
                match with_deadline(
                    "session stop",
                    self.config.api.stop_timeout(),
                    self.api.stop_session(&container_id),
                )
                .await
                {
                    Ok(()) => info!("Stopped container {} during cleanup", container_id),
                    Err(e) => warn!("Failed to stop container {} during cleanup: {}", container_id, e),
                }
            }
        }

        self.clear_session();
        self.phase = LifecyclePhase::Idle;
    }

    // Publishing

    fn transition(&mut self, to: LifecyclePhase) {
        if self.phase != to {
            info!("Session {} -> {}", self.phase, to);
            self.phase = to;
        }
        if to != LifecyclePhase::Running {
            self.connected = false;
        }
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            phase: self.phase,
            is_connected: self.connected && self.phase == LifecyclePhase::Running,
            container_id: self.container_id.clone(),
            language: self.language.clone(),
            summary: self.summary.clone(),
            notice: self.notice.clone(),
            error: self.error.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// The UI's handle on a running [`SessionController`].
///
/// Dropping the handle discards the review context: the controller closes the
/// channel, disposes the terminal and stops any live container.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn request_start(&self) {
        self.send(Command::Start);
    }

    pub fn request_stop(&self) {
        self.send(Command::Stop);
    }

    /// Leaves the `Error` phase.
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    pub fn dismiss_summary(&self) {
        self.send(Command::DismissSummary);
    }

    /// Forwards keystrokes to the terminal surface.
    pub fn input(&self, bytes: &[u8]) {
        self.send(Command::Input(bytes.to_vec()));
    }

    /// Refits the terminal after the display region changed size.
    pub fn fit(&self) {
        self.send(Command::Fit);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Discards the context and waits for cleanup to finish.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            error!("Session controller task failed: {}", e);
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Session controller has exited; command dropped");
        }
    }
}
