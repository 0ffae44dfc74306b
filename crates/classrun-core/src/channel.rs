//! Duplex channel between a terminal surface and a remote container.
//!
//! Each [`DuplexChannel`] runs two tasks:
//! - an I/O task that opens the transport, forwards outbound writes and
//!   reads inbound frames
//! - a decode task that materializes inbound frames one at a time and renders
//!   them, so arrival order is preserved even when a frame needs async work
//!
//! Lifecycle notifications (open, close) travel through the same ordered
//! queue as data, so a close is reported only after every frame received
//! before it has been rendered.

use crate::config::ApiConfig;
use crate::error::Result;
use crate::transport::{ABNORMAL_CLOSE, NORMAL_CLOSE, Outgoing, RawFrame, Transport};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on sending the close frame during an explicit close.
const CLOSE_FRAME_GRACE: Duration = Duration::from_secs(1);

/// Connection state as seen by writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

/// Notifications delivered to the channel's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Closed {
        code: u16,
        reason: String,
        /// True when the close came from [`DuplexChannel::close`].
        initiated_locally: bool,
    },
}

pub type ChannelObserver = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Destination for decoded inbound bytes.
pub trait FrameRenderer: Send + Sync {
    fn render(&self, bytes: &[u8]);
}

enum Pipeline {
    Opened,
    Frame(RawFrame),
    Closed { code: u16, reason: String },
}

/// Cloneable write half handed to terminal input handlers.
#[derive(Clone)]
pub struct ChannelWriter {
    outbound: mpsc::UnboundedSender<Outgoing>,
    state: watch::Receiver<ReadyState>,
}

impl ChannelWriter {
    /// Queues `bytes` for the remote side.
    ///
    /// Writes are only accepted while the channel is open; otherwise they are
    /// dropped and `false` is returned.
    pub fn send(&self, bytes: &[u8]) -> bool {
        let state = *self.state.borrow();
        if state != ReadyState::Open {
            debug!(?state, len = bytes.len(), "Dropping write on channel that is not open");
            return false;
        }
        if self.outbound.send(Outgoing::Data(bytes.to_vec())).is_err() {
            debug!(len = bytes.len(), "Dropping write, channel task has exited");
            return false;
        }
        true
    }
}

/// One live connection to a container's execution stream.
pub struct DuplexChannel {
    url: String,
    state: Arc<watch::Sender<ReadyState>>,
    writer: ChannelWriter,
    cancel: CancellationToken,
    close_reported: Arc<AtomicBool>,
    observer: ChannelObserver,
    io_task: Option<JoinHandle<()>>,
    decode_task: Option<JoinHandle<()>>,
}

impl DuplexChannel {
    /// Starts connecting to `url`. Returns immediately in `Connecting` state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        transport: Arc<dyn Transport>,
        url: String,
        renderer: Arc<dyn FrameRenderer>,
        observer: ChannelObserver,
        handshake_timeout: Duration,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
        let state = Arc::new(state_tx);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (pipe_tx, pipe_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let close_reported = Arc::new(AtomicBool::new(false));

        let io_task = tokio::spawn(run_io(
            transport,
            url.clone(),
            handshake_timeout,
            Arc::clone(&state),
            outbound_rx,
            pipe_tx,
            cancel.clone(),
        ));
        let decode_task = tokio::spawn(run_decode(
            pipe_rx,
            renderer,
            Arc::clone(&state),
            Arc::clone(&observer),
            Arc::clone(&close_reported),
            cancel.clone(),
        ));

        Self {
            url,
            state,
            writer: ChannelWriter {
                outbound: outbound_tx,
                state: state_rx,
            },
            cancel,
            close_reported,
            observer,
            io_task: Some(io_task),
            decode_task: Some(decode_task),
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    pub fn writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    /// See [`ChannelWriter::send`].
    pub fn send(&self, bytes: &[u8]) -> bool {
        self.writer.send(bytes)
    }

    /// Closes the channel and waits for both tasks to finish.
    ///
    /// Nothing is rendered after this returns. Calling it again is a no-op.
    pub async fn close(&mut self) {
        let (Some(decode_task), Some(io_task)) = (self.decode_task.take(), self.io_task.take())
        else {
            return;
        };

        debug!("Closing channel to {}", self.url);
        self.cancel.cancel();
        self.state.send_replace(ReadyState::Closed);
        let _ = decode_task.await;
        let _ = io_task.await;

        if !self.close_reported.swap(true, Ordering::SeqCst) {
            (self.observer)(ChannelEvent::Closed {
                code: NORMAL_CLOSE,
                reason: "closed by client".to_string(),
                initiated_locally: true,
            });
        }
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.state.send_replace(ReadyState::Closed);
        // The I/O task is left to send its close frame; rendering stops now.
        if let Some(task) = self.decode_task.take() {
            task.abort();
        }
    }
}

async fn run_io(
    transport: Arc<dyn Transport>,
    url: String,
    handshake_timeout: Duration,
    state: Arc<watch::Sender<ReadyState>>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    pipe: mpsc::UnboundedSender<Pipeline>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = tokio::time::timeout(handshake_timeout, transport.open(&url)) => result,
    };

    let (mut sink, mut stream) = match opened {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!("Failed to open channel to {}: {}", url, e);
            let _ = pipe.send(Pipeline::Closed {
                code: ABNORMAL_CLOSE,
                reason: e.user_message(),
            });
            return;
        }
        Err(_) => {
            warn!("Channel handshake to {} timed out", url);
            let _ = pipe.send(Pipeline::Closed {
                code: ABNORMAL_CLOSE,
                reason: format!(
                    "handshake timed out after {} seconds",
                    handshake_timeout.as_secs()
                ),
            });
            return;
        }
    };

    state.send_replace(ReadyState::Open);
    let _ = pipe.send(Pipeline::Opened);
    info!("Channel open: {}", url);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let goodbye = Outgoing::Close {
                    code: NORMAL_CLOSE,
                    reason: "closed by client".to_string(),
                };
                let _ = tokio::time::timeout(CLOSE_FRAME_GRACE, async {
                    let _ = sink.send(goodbye).await;
                    let _ = sink.close().await;
                })
                .await;
                break;
            }
            Some(out) = outbound.recv() => {
                if let Err(e) = sink.send(out).await {
                    warn!("Channel write failed: {}", e);
                    let _ = pipe.send(Pipeline::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: e.user_message(),
                    });
                    break;
                }
            }
            item = stream.next() => match item {
                Some(Ok(RawFrame::Close { code, reason })) => {
                    let _ = pipe.send(Pipeline::Closed { code, reason });
                    break;
                }
                Some(Ok(frame)) => {
                    let _ = pipe.send(Pipeline::Frame(frame));
                }
                Some(Err(e)) => {
                    let _ = pipe.send(Pipeline::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: e.user_message(),
                    });
                    break;
                }
                None => {
                    let _ = pipe.send(Pipeline::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: "connection dropped".to_string(),
                    });
                    break;
                }
            },
        }
    }
    debug!("Channel I/O task for {} finished", url);
}

async fn run_decode(
    mut pipe: mpsc::UnboundedReceiver<Pipeline>,
    renderer: Arc<dyn FrameRenderer>,
    state: Arc<watch::Sender<ReadyState>>,
    observer: ChannelObserver,
    close_reported: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                flush_received(&mut pipe, renderer.as_ref());
                break;
            }
            item = pipe.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        match item {
            Pipeline::Opened => observer(ChannelEvent::Opened),
            Pipeline::Frame(frame) => {
                let decoded = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    decoded = decode(frame) => decoded,
                };
                match decoded {
                    Ok(bytes) if !bytes.is_empty() => renderer.render(&bytes),
                    Ok(_) => {}
                    Err(e) => warn!("Dropping inbound frame that failed to decode: {}", e),
                }
            }
            Pipeline::Closed { code, reason } => {
                state.send_replace(ReadyState::Closed);
                if !close_reported.swap(true, Ordering::SeqCst) {
                    info!("Channel closed by remote side ({}: {})", code, reason);
                    observer(ChannelEvent::Closed {
                        code,
                        reason,
                        initiated_locally: false,
                    });
                }
                break;
            }
        }
    }
}

/// Renders frames that had already arrived when the channel was closed, up
/// to the first one that would need async decoding.
fn flush_received(pipe: &mut mpsc::UnboundedReceiver<Pipeline>, renderer: &dyn FrameRenderer) {
    while let Ok(item) = pipe.try_recv() {
        match item {
            Pipeline::Frame(RawFrame::Text(text)) => renderer.render(text.as_bytes()),
            Pipeline::Frame(RawFrame::Binary(bytes)) => renderer.render(&bytes),
            Pipeline::Frame(RawFrame::Deferred(_)) | Pipeline::Closed { .. } => break,
            Pipeline::Opened | Pipeline::Frame(RawFrame::Close { .. }) => {}
        }
    }
}

async fn decode(frame: RawFrame) -> Result<Vec<u8>> {
    match frame {
        RawFrame::Text(text) => Ok(text.into_bytes()),
        RawFrame::Binary(bytes) => Ok(bytes),
        RawFrame::Deferred(payload) => payload.await,
        RawFrame::Close { .. } => Ok(Vec::new()),
    }
}

/// Owns at most one [`DuplexChannel`] and addresses channels by container id.
pub struct ChannelAdapter {
    transport: Arc<dyn Transport>,
    config: ApiConfig,
    current: Option<DuplexChannel>,
}

impl ChannelAdapter {
    pub fn new(transport: Arc<dyn Transport>, config: ApiConfig) -> Self {
        Self {
            transport,
            config,
            current: None,
        }
    }

    /// Connects to the stream for `container_id`, closing any existing
    /// channel first.
    pub async fn connect(
        &mut self,
        container_id: &str,
        renderer: Arc<dyn FrameRenderer>,
        observer: ChannelObserver,
    ) -> Result<&DuplexChannel> {
        let url = self.config.channel_url(container_id)?;

        if let Some(mut previous) = self.current.take() {
            info!("Closing previous channel before connecting to {}", container_id);
            previous.close().await;
        }

        let channel = DuplexChannel::connect(
            Arc::clone(&self.transport),
            url.to_string(),
            renderer,
            observer,
            self.config.connect_timeout(),
        );
        Ok(self.current.insert(channel))
    }

    /// Closes and discards the current channel. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut channel) = self.current.take() {
            channel.close().await;
        }
    }
}
