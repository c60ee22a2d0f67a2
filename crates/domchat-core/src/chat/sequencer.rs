//! Per-turn frame ordering guard.
//!
//! A turn emits zero or more `delta` frames and then exactly one terminal
//! frame. `FrameSequencer` sits between the generation loop and the wire and
//! enforces that shape: anything offered after the terminal frame is dropped
//! (and logged), never sent.

use tracing::warn;

use domchat_types::frame::StreamFrame;

#[derive(Debug, Default)]
pub struct FrameSequencer {
    emitted: usize,
    terminated: bool,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a frame. Returns `None` if the turn has already terminated.
    pub fn admit(&mut self, frame: StreamFrame) -> Option<StreamFrame> {
        if self.terminated {
            warn!(?frame, emitted = self.emitted, "Frame after terminal frame dropped");
            return None;
        }
        self.terminated = frame.is_terminal();
        self.emitted += 1;
        Some(frame)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Frames admitted so far, terminal included.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}
