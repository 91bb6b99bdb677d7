//! Link-level types shared by the vehicle API and its hosts

mod frames;
pub mod mock;

pub use frames::*;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU16, Ordering};

/// System/component ids our outbound frames are addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targets {
    pub system: u8,
    pub component: u8,
}

impl Default for Targets {
    fn default() -> Self {
        Self { system: 1, component: 1 }
    }
}

/// Targets shared with the host, which may retarget at run time.
#[derive(Debug, Default)]
pub struct LinkTargets(AtomicU16);

impl LinkTargets {
    pub fn new(t: Targets) -> Self {
        Self(AtomicU16::new(pack(t)))
    }

    pub fn get(&self) -> Targets {
        let v = self.0.load(Ordering::Relaxed);
        Targets { system: (v >> 8) as u8, component: v as u8 }
    }

    pub fn set(&self, t: Targets) {
        self.0.store(pack(t), Ordering::Relaxed);
    }
}

fn pack(t: Targets) -> u16 {
    (t.system as u16) << 8 | t.component as u16
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,
    #[error("{0}")]
    Msg(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FrameTx = crossbeam_channel::Sender<Frame>;
pub type FrameRx = crossbeam_channel::Receiver<Frame>;
pub type OutboundTx = crossbeam_channel::Sender<OutboundFrame>;
pub type OutboundRx = crossbeam_channel::Receiver<OutboundFrame>;

/// Where outbound frames go. Sends may come from any thread.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: OutboundFrame) -> Result<(), LinkError>;
}

impl FrameSink for OutboundTx {
    fn send(&self, frame: OutboundFrame) -> Result<(), LinkError> {
        crossbeam_channel::Sender::send(self, frame).map_err(|_| LinkError::Closed)
    }
}

/// Trait for anything that produces inbound frames (radio, network, log replay)
#[async_trait::async_trait]
pub trait FrameSource: Send + Sync {
    async fn run(&self, tx: FrameTx) -> Result<(), LinkError>;
}

pub fn channel() -> (FrameTx, FrameRx) {
    crossbeam_channel::unbounded()
}

pub fn outbound_channel() -> (OutboundTx, OutboundRx) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_targets_roundtrip() {
        let t = LinkTargets::new(Targets::default());
        assert_eq!(t.get(), Targets { system: 1, component: 1 });
        t.set(Targets { system: 255, component: 190 });
        assert_eq!(t.get(), Targets { system: 255, component: 190 });
    }

    #[test]
    fn sender_sink_reports_closed_link() {
        let (tx, rx) = outbound_channel();
        let frame = OutboundFrame::ParamRequestList(TargetedData::default());
        assert!(FrameSink::send(&tx, frame.clone()).is_ok());
        assert_eq!(rx.recv().unwrap(), frame);
        drop(rx);
        assert!(matches!(FrameSink::send(&tx, frame), Err(LinkError::Closed)));
    }
}
