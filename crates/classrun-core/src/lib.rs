//! Interactive code-execution sessions for classrun.
//!
//! This crate provides:
//! - A client for the execution orchestrator's REST endpoints
//! - A duplex channel that streams a container's terminal I/O
//! - A vt100-backed terminal surface that captures the session transcript
//! - The session lifecycle controller tying these together
//! - Transcript summarization and non-interactive batch execution
//!
//! # Examples
//!
//! ```no_run
//! use classrun_core::{
//!     ClassrunConfig, HttpOrchestrator, ReviewContext, SessionController, Viewport,
//!     ViewportFactory, WsTransport,
//! };
//! use std::sync::Arc;
//!
//! struct Discard;
//!
//! impl Viewport for Discard {
//!     fn dimensions(&self) -> Option<(u16, u16)> {
//!         Some((24, 80))
//!     }
//!     fn present(&mut self, _bytes: &[u8]) {}
//!     fn redraw(&mut self, _screen: &[u8]) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClassrunConfig::load(None)?;
//!     let api = Arc::new(HttpOrchestrator::new(config.api.clone())?);
//!     let viewports: ViewportFactory = Arc::new(|| Box::new(Discard) as Box<dyn Viewport>);
//!
//!     let session = SessionController::new(
//!         ReviewContext {
//!             submission_id: "sub-42".to_string(),
//!             file_url: "https://files.example.edu/sub-42/main.py".to_string(),
//!         },
//!         api,
//!         Arc::new(WsTransport),
//!         viewports,
//!         config,
//!     )
//!     .spawn();
//!
//!     session.request_start();
//!     // ... later
//!     session.request_stop();
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod batch;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod language;
pub mod summarizer;
pub mod terminal;
pub mod testing;
pub mod transcript;
pub mod transport;

pub use api::{HttpOrchestrator, OrchestratorApi, StartedSession};
pub use batch::{BatchClient, BatchFailure, BatchJob, BatchState};
pub use channel::{
    ChannelAdapter, ChannelEvent, ChannelObserver, ChannelWriter, DuplexChannel, FrameRenderer,
    ReadyState,
};
pub use config::{ApiConfig, ClassrunConfig, TerminalConfig};
pub use controller::{
    LifecyclePhase, ReviewContext, SessionController, SessionHandle, SessionSnapshot,
};
pub use error::{ExecError, Result};
pub use language::infer_language;
pub use summarizer::TranscriptSummarizer;
pub use terminal::{SharedTerminal, TerminalSurface, Viewport, ViewportFactory};
pub use transport::{Outgoing, RawFrame, Transport, WsTransport};

// Re-export proto types for convenience
pub use classrun_proto::{ExecutionSummary, FileReport, FileStatus};
