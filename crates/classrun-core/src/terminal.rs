//! Terminal surface: a vt100 emulator bound to a display region.

use crate::channel::FrameRenderer;
use crate::config::TerminalConfig;
use crate::transcript;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use vt100::Parser;

/// Allowance per grid cell for escape sequences in replayed output.
const REPLAY_BYTES_PER_CELL: usize = 4;

/// The display region a [`TerminalSurface`] draws into.
pub trait Viewport: Send {
    /// Visible size as `(rows, cols)`, or `None` while the region is hidden.
    fn dimensions(&self) -> Option<(u16, u16)>;

    /// Shows freshly written bytes.
    fn present(&mut self, bytes: &[u8]);

    /// Repaints the whole region after a reflow.
    fn redraw(&mut self, screen: &[u8]);
}

/// Creates the viewport for each new session.
pub type ViewportFactory = Arc<dyn Fn() -> Box<dyn Viewport> + Send + Sync>;

pub type InputHandler = Box<dyn Fn(&[u8]) + Send>;

pub struct TerminalSurface {
    parser: Parser,
    scrollback: usize,
    viewport: Option<Box<dyn Viewport>>,
    /// Program output only; this is what the transcript is built from.
    transcript: Vec<u8>,
    /// Everything drawn, notices included. Replayed on reflow, so only the
    /// tail that can still reach the scrollback is kept.
    rendered: Vec<u8>,
    input_handler: Option<InputHandler>,
    pending_fit: bool,
    disposed: bool,
}

impl TerminalSurface {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            parser: Parser::new(config.rows, config.cols, config.scrollback),
            scrollback: config.scrollback,
            viewport: None,
            transcript: Vec::new(),
            rendered: Vec::new(),
            input_handler: None,
            pending_fit: false,
            disposed: false,
        }
    }

    /// Binds the surface to a display region and fits it.
    pub fn attach(&mut self, viewport: Box<dyn Viewport>) {
        if self.disposed {
            warn!("Ignoring attach on a disposed terminal");
            return;
        }
        if self.viewport.is_some() {
            warn!("Terminal attached twice without dispose; replacing viewport");
        }
        self.viewport = Some(viewport);
        self.fit();
    }

    pub fn is_attached(&self) -> bool {
        self.viewport.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Appends program output to the screen and the transcript.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(viewport) = self.viewport.as_mut() else {
            debug!(len = bytes.len(), "Dropping write to detached terminal");
            return;
        };

        self.parser.process(bytes);
        self.transcript.extend_from_slice(bytes);
        self.rendered.extend_from_slice(bytes);
        viewport.present(bytes);
        self.trim_rendered();
    }

    /// Shows a status line without recording it in the transcript.
    pub fn notice(&mut self, text: &str) {
        let Some(viewport) = self.viewport.as_mut() else {
            return;
        };

        let line = format!("\r\n\x1b[33m[classrun] {}\x1b[0m\r\n", text);
        self.parser.process(line.as_bytes());
        self.rendered.extend_from_slice(line.as_bytes());
        viewport.present(line.as_bytes());
        self.trim_rendered();
    }

    /// Registers the keystroke callback, replacing any previous one.
    pub fn on_input(&mut self, handler: InputHandler) {
        if !self.disposed {
            self.input_handler = Some(handler);
        }
    }

    /// Delivers a keystroke or paste from the user.
    pub fn input(&self, bytes: &[u8]) {
        match &self.input_handler {
            Some(handler) if !self.disposed => handler(bytes),
            _ => debug!(len = bytes.len(), "No input handler, dropping keystrokes"),
        }
    }

    /// Matches the grid to the viewport's current size.
    ///
    /// While the viewport is missing or hidden the fit is deferred until the
    /// next call. On a size change the parser is rebuilt and everything drawn
    /// so far is replayed, so long lines reflow to the new width.
    pub fn fit(&mut self) {
        if self.disposed {
            return;
        }
        let Some(viewport) = self.viewport.as_mut() else {
            self.pending_fit = true;
            return;
        };
        let (rows, cols) = match viewport.dimensions() {
            Some((rows, cols)) if rows > 0 && cols > 0 => (rows, cols),
            _ => {
                debug!("Viewport not visible, deferring fit");
                self.pending_fit = true;
                return;
            }
        };

        self.pending_fit = false;
        if self.parser.screen().size() == (rows, cols) {
            return;
        }

        debug!("Reflowing terminal to {}x{}", cols, rows);
        let mut parser = Parser::new(rows, cols, self.scrollback);
        parser.process(&self.rendered);
        self.parser = parser;
        viewport.redraw(&self.parser.screen().contents_formatted());
    }

    /// Bytes of drawn output worth replaying: enough to refill the
    /// scrollback and the screen at the current width.
    fn replay_limit(&self) -> usize {
        let (rows, cols) = self.parser.screen().size();
        (self.scrollback + usize::from(rows)) * (usize::from(cols) + 1) * REPLAY_BYTES_PER_CELL
    }

    /// Drops the oldest drawn output once it is twice the replay limit,
    /// cutting at a line boundary where one exists.
    fn trim_rendered(&mut self) {
        let limit = self.replay_limit();
        if self.rendered.len() <= 2 * limit {
            return;
        }
        let excess = self.rendered.len() - limit;
        let cut = self.rendered[excess..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(excess, |i| excess + i + 1);
        self.rendered.drain(..cut);
    }

    pub fn has_pending_fit(&self) -> bool {
        self.pending_fit
    }

    /// Returns `(rows, cols)`.
    pub fn size(&self) -> (u16, u16) {
        self.parser.screen().size()
    }

    /// The visible screen as plain text.
    pub fn screen_text(&self) -> String {
        self.parser.screen().contents()
    }

    /// The full transcript as plain text lines.
    pub fn read_all_lines(&self) -> String {
        transcript::normalize(&self.transcript)
    }

    /// Releases the viewport, input handler and buffers.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.viewport = None;
        self.input_handler = None;
        self.pending_fit = false;
        self.transcript = Vec::new();
        self.rendered = Vec::new();
        let (rows, cols) = self.parser.screen().size();
        self.parser = Parser::new(rows, cols, 0);
    }
}

/// A terminal surface shared between the controller and the channel's
/// decode task.
#[derive(Clone)]
pub struct SharedTerminal(Arc<Mutex<TerminalSurface>>);

impl SharedTerminal {
    pub fn new(surface: TerminalSurface) -> Self {
        Self(Arc::new(Mutex::new(surface)))
    }

    /// Locks the surface. A panic while rendering does not poison it for
    /// teardown.
    pub fn lock(&self) -> MutexGuard<'_, TerminalSurface> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self, bytes: &[u8]) {
        self.lock().write(bytes);
    }

    pub fn notice(&self, text: &str) {
        self.lock().notice(text);
    }

    pub fn input(&self, bytes: &[u8]) {
        self.lock().input(bytes);
    }

    pub fn fit(&self) {
        self.lock().fit();
    }

    pub fn read_all_lines(&self) -> String {
        self.lock().read_all_lines()
    }

    pub fn dispose(&self) {
        self.lock().dispose();
    }
}

impl FrameRenderer for SharedTerminal {
    fn render(&self, bytes: &[u8]) {
        self.write(bytes);
    }
}
