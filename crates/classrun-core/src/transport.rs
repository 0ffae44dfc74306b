//! Transport seam for the execution stream.
//!
//! Transports hand the channel a frame sink and a frame stream. Inbound
//! payloads are normalized into [`RawFrame`] at this boundary so nothing
//! downstream branches on transport message types.

use crate::error::{ExecError, Result};
use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

/// Close code for an orderly close.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close frame carried no status code.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// An inbound payload as it arrived on the wire.
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Large-object payload whose bytes become available asynchronously.
    Deferred(BoxFuture<'static, Result<Vec<u8>>>),
    Close { code: u16, reason: String },
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawFrame::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            RawFrame::Binary(bytes) => f.debug_tuple("Binary").field(&bytes.len()).finish(),
            RawFrame::Deferred(_) => f.write_str("Deferred"),
            RawFrame::Close { code, reason } => f
                .debug_struct("Close")
                .field("code", code)
                .field("reason", reason)
                .finish(),
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Data(Vec<u8>),
    Close { code: u16, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<Outgoing, Error = ExecError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame>> + Send>>;

/// Opens duplex connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)>;
}

/// WebSocket transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        debug!("Opening WebSocket to {}", url);
        let (socket, _response) = tokio_tungstenite::connect_async(url).await?;
        let (sink, stream) = socket.split();

        let sink = sink.with(|out: Outgoing| future::ready(Ok::<_, ExecError>(to_message(out))));
        let stream = stream.filter_map(|item| future::ready(from_message(item)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Keystrokes go out as text when they are valid UTF-8.
fn to_message(out: Outgoing) -> Message {
    match out {
        Outgoing::Data(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        },
        Outgoing::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

fn from_message(
    item: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<RawFrame>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(RawFrame::Text(text))),
        Ok(Message::Binary(bytes)) => Some(Ok(RawFrame::Binary(bytes))),
        Ok(Message::Close(frame)) => {
            let (code, reason) = frame.map_or((NO_STATUS, String::new()), |f| {
                (u16::from(f.code), f.reason.into_owned())
            });
            Some(Ok(RawFrame::Close { code, reason }))
        }
        // Pings are answered by tungstenite on the next poll
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_data_goes_out_as_text() {
        assert_eq!(
            to_message(Outgoing::Data(b"ls -la\r".to_vec())),
            Message::Text("ls -la\r".to_string())
        );
    }

    #[test]
    fn test_non_utf8_data_goes_out_as_binary() {
        assert_eq!(
            to_message(Outgoing::Data(vec![0xff, 0x00])),
            Message::Binary(vec![0xff, 0x00])
        );
    }

    #[test]
    fn test_close_frame_maps_code_and_reason() {
        let frame = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "container stopped".into(),
        }));

        match from_message(Ok(frame)) {
            Some(Ok(RawFrame::Close { code, reason })) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "container stopped");
            }
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_close_without_frame_has_no_status() {
        assert!(matches!(
            from_message(Ok(Message::Close(None))),
            Some(Ok(RawFrame::Close { code: NO_STATUS, .. }))
        ));
    }

    #[test]
    fn test_control_frames_are_skipped() {
        assert!(from_message(Ok(Message::Ping(vec![1]))).is_none());
        assert!(from_message(Ok(Message::Pong(vec![1]))).is_none());
    }
}
