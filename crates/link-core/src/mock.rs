//! In-memory sink for host-less use and tests.

use parking_lot::Mutex;

use crate::{FrameSink, LinkError, OutboundFrame};

/// Keeps every frame it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<OutboundFrame>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    /// Frames sent so far with the given message name.
    pub fn named(&self, name: &str) -> Vec<OutboundFrame> {
        self.frames.lock().iter().filter(|f| f.name() == name).cloned().collect()
    }

    pub fn take(&self) -> Vec<OutboundFrame> {
        std::mem::take(&mut *self.frames.lock())
    }
}

impl FrameSink for RecordingSink {
    fn send(&self, frame: OutboundFrame) -> Result<(), LinkError> {
        self.frames.lock().push(frame);
        Ok(())
    }
}
