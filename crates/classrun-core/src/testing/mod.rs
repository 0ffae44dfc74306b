//! Test doubles for the orchestrator, the stream transport and the display.
//!
//! These stand in at the crate's seams so the channel, the controller and the
//! front-ends can be driven deterministically without a network.

mod memory_transport;
mod recording;
mod scripted_orchestrator;

pub use memory_transport::{MemoryTransport, RemoteEnd};
pub use recording::{RecordingRenderer, RecordingViewport};
pub use scripted_orchestrator::{ApiCall, ScriptedOrchestrator};

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
