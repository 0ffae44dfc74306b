//! In-memory duplex transport.

use crate::error::{ExecError, Result};
use crate::transport::{FrameSink, FrameStream, Outgoing, RawFrame, Transport};
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch};

struct Inner {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    refuse: AtomicBool,
    held: watch::Sender<bool>,
    opened: AtomicUsize,
}

/// Transport whose connections are handed to the test as [`RemoteEnd`]s.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    /// Returns the transport and the receiver on which each opened
    /// connection's remote side appears.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let (held, _) = watch::channel(false);
        let transport = Self {
            inner: Arc::new(Inner {
                remotes,
                refuse: AtomicBool::new(false),
                held,
                opened: AtomicUsize::new(0),
            }),
        };
        (transport, rx)
    }

    /// Makes every later `open` fail with "connection refused".
    pub fn refuse_connections(&self) {
        self.inner.refuse.store(true, Ordering::SeqCst);
    }

    /// Stalls handshakes until [`release_handshakes`](Self::release_handshakes).
    pub fn hold_handshakes(&self) {
        self.inner.held.send_replace(true);
    }

    pub fn release_handshakes(&self) {
        self.inner.held.send_replace(false);
    }

    /// Number of connections opened successfully.
    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        let mut held = self.inner.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;

        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(ExecError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded::<Result<RawFrame>>();
        let (outgoing_tx, outgoing_rx) = fmpsc::unbounded::<Outgoing>();

        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.inner.remotes.send(RemoteEnd {
            url: url.to_string(),
            inbound: inbound_tx,
            outgoing: outgoing_rx,
        });

        let sink = outgoing_tx.sink_map_err(|_| ExecError::ChannelClosed);
        Ok((Box::pin(sink), Box::pin(inbound_rx)))
    }
}

/// The container's side of an in-memory connection.
///
/// Dropping it ends the stream without a close frame.
pub struct RemoteEnd {
    url: String,
    inbound: fmpsc::UnboundedSender<Result<RawFrame>>,
    outgoing: fmpsc::UnboundedReceiver<Outgoing>,
}

impl RemoteEnd {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send_text(&self, text: &str) {
        self.push(RawFrame::Text(text.to_string()));
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        self.push(RawFrame::Binary(bytes.to_vec()));
    }

    pub fn send_deferred(&self, payload: BoxFuture<'static, Result<Vec<u8>>>) {
        self.push(RawFrame::Deferred(payload));
    }

    /// Sends a close frame and ends the stream.
    pub fn close(&self, code: u16, reason: &str) {
        self.push(RawFrame::Close {
            code,
            reason: reason.to_string(),
        });
        self.inbound.close_channel();
    }

    /// Next message written by the local side, or `None` once it hung up.
    pub async fn next_outgoing(&mut self) -> Option<Outgoing> {
        self.outgoing.next().await
    }

    /// True once the local side has dropped its end of the stream.
    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    fn push(&self, frame: RawFrame) {
        let _ = self.inbound.unbounded_send(Ok(frame));
    }
}
