use std::sync::Arc;

use link_core::{FrameSink, LinkError, LinkTargets, OutboundFrame, Targets};

/// Outbound side of a connection: the host's sink plus the current targets.
#[derive(Clone)]
pub struct Outbox {
    sink: Arc<dyn FrameSink>,
    targets: Arc<LinkTargets>,
}

impl Outbox {
    pub fn new(sink: Arc<dyn FrameSink>, targets: Arc<LinkTargets>) -> Self {
        Self { sink, targets }
    }

    pub fn targets(&self) -> Targets {
        self.targets.get()
    }

    pub fn retarget(&self, t: Targets) {
        self.targets.set(t);
    }

    pub fn send(&self, mut frame: OutboundFrame) -> Result<(), LinkError> {
        frame.fix_targets(self.targets.get());
        self.send_untargeted(frame)
    }

    pub fn send_untargeted(&self, frame: OutboundFrame) -> Result<(), LinkError> {
        log::trace!("tx {}", frame.name());
        self.sink.send(frame)
    }
}
