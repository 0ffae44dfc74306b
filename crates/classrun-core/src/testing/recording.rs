use super::lock;
use crate::channel::FrameRenderer;
use crate::terminal::Viewport;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ViewportState {
    dimensions: Option<(u16, u16)>,
    presented: Vec<u8>,
    redraws: usize,
}

/// Viewport that records what was drawn. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingViewport {
    state: Arc<Mutex<ViewportState>>,
}

impl RecordingViewport {
    pub fn new(rows: u16, cols: u16) -> Self {
        let viewport = Self::default();
        viewport.set_dimensions(Some((rows, cols)));
        viewport
    }

    /// A viewport that is not visible yet.
    pub fn hidden() -> Self {
        Self::default()
    }

    pub fn set_dimensions(&self, dimensions: Option<(u16, u16)>) {
        lock(&self.state).dimensions = dimensions;
    }

    pub fn presented(&self) -> Vec<u8> {
        lock(&self.state).presented.clone()
    }

    pub fn presented_text(&self) -> String {
        String::from_utf8_lossy(&self.presented()).into_owned()
    }

    pub fn redraw_count(&self) -> usize {
        lock(&self.state).redraws
    }
}

impl Viewport for RecordingViewport {
    fn dimensions(&self) -> Option<(u16, u16)> {
        lock(&self.state).dimensions
    }

    fn present(&mut self, bytes: &[u8]) {
        lock(&self.state).presented.extend_from_slice(bytes);
    }

    fn redraw(&mut self, _screen: &[u8]) {
        lock(&self.state).redraws += 1;
    }
}

/// Renderer that collects everything the channel delivers.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl RecordingRenderer {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&lock(&self.bytes)).into_owned()
    }
}

impl FrameRenderer for RecordingRenderer {
    fn render(&self, bytes: &[u8]) {
        lock(&self.bytes).extend_from_slice(bytes);
    }
}
