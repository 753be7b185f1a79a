//! Frames queued while the connection is not open.

use std::collections::VecDeque;

/// FIFO of serialized frames awaiting an open connection.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    frames: VecDeque<String>,
}

impl OutboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame behind everything already buffered.
    pub fn push(&mut self, frame: String) {
        self.frames.push_back(frame);
    }

    /// Return frames that were accepted but never written, ahead of the rest.
    pub fn requeue_front(&mut self, frames: Vec<String>) {
        for frame in frames.into_iter().rev() {
            self.frames.push_front(frame);
        }
    }

    /// Take every buffered frame in FIFO order, leaving the buffer empty.
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.frames.drain(..)
    }

    /// Keep only the frames for which `keep` returns true. Returns how many
    /// were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.frames.len();
        self.frames.retain(|frame| keep(frame));
        before - self.frames.len()
    }

    /// Discard every buffered frame. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.frames.len();
        self.frames.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
