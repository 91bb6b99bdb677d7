use std::collections::HashSet;
use std::sync::Arc;

use link_core::Frame;
use parking_lot::Mutex;

/// Drops chatty inbound categories while at least one script holds a suppression.
#[derive(Debug)]
pub struct RxFilter {
    blocked: HashSet<String>,
    holders: Mutex<usize>,
}

impl RxFilter {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            blocked: names.into_iter().map(Into::into).collect(),
            holders: Mutex::new(0),
        }
    }

    /// Suppression lasts until the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> Suppression {
        let mut holders = self.holders.lock();
        *holders += 1;
        if *holders == 1 {
            log::debug!("suppressing {:?}", self.blocked);
        }
        Suppression(self.clone())
    }

    fn release(&self) {
        let mut holders = self.holders.lock();
        *holders = holders.saturating_sub(1);
        if *holders == 0 {
            log::debug!("rx suppression lifted");
        }
    }

    pub fn is_active(&self) -> bool {
        *self.holders.lock() > 0
    }

    pub fn blocks(&self, frame: &Frame) -> bool {
        self.is_active() && self.blocked.contains(frame.name())
    }
}

#[must_use = "suppression ends when this is dropped"]
#[derive(Debug)]
pub struct Suppression(Arc<RxFilter>);

impl Drop for Suppression {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_core::{CommandAckData, MissionCurrentData, StatustextData};

    #[test]
    fn nested_holders() {
        let filter = Arc::new(RxFilter::new(["COMMAND_ACK", "STATUSTEXT"]));
        let ack = Frame::CommandAck(CommandAckData::default());
        let text = Frame::Statustext(StatustextData::default());
        let cur = Frame::MissionCurrent(MissionCurrentData::default());

        assert!(!filter.blocks(&ack));
        let a = filter.acquire();
        let b = filter.acquire();
        assert!(filter.blocks(&ack) && filter.blocks(&text));
        assert!(!filter.blocks(&cur));

        drop(a);
        assert!(filter.blocks(&ack));
        drop(b);
        assert!(!filter.is_active());
        assert!(!filter.blocks(&text));
    }
}
