//! Local copy of the vehicle's command sequence and the MISSION_* transfer protocol.
//!
//! `download()` only starts a fetch; the dispatcher drives it to completion as
//! MISSION_COUNT / MISSION_ITEM frames arrive. Edits are local until `flush()`
//! uploads the whole list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use link_core::*;
use model::{cmd, Command, Location};
use parking_lot::Mutex;

use crate::error::{DispatchError, VehicleError};
use crate::outbox::Outbox;
use crate::store::TelemetryStore;
use crate::wait::Poller;

/// `current` value marking a MISSION_ITEM as a guided-mode target.
pub const GUIDED_TARGET: u8 = 2;

#[derive(Debug, Default)]
enum Fetch {
    #[default]
    Idle,
    AwaitingCount,
    Receiving { expected: u16, items: Vec<Command> },
}

/// Snapshot being uploaded. `sent` is the highest item handed out so far;
/// the upload only ends on an ACK once the last item has gone.
#[derive(Debug)]
struct Upload {
    items: Vec<Command>,
    sent: Option<u16>,
}

impl Upload {
    fn complete(&self) -> bool {
        self.sent.is_some_and(|s| s as usize + 1 >= self.items.len())
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: Vec<Command>,
    fetch: Fetch,
    upload: Option<Upload>,
}

pub struct CommandSequence {
    inner: Mutex<Inner>,
    dirty: AtomicBool,
    store: Arc<TelemetryStore>,
    outbox: Outbox,
    poller: Poller,
}

impl CommandSequence {
    pub(crate) fn new(store: Arc<TelemetryStore>, outbox: Outbox, poller: Poller) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            dirty: AtomicBool::new(false),
            store,
            outbox,
            poller,
        }
    }

    /// Start fetching the vehicle's list. Returns immediately; call `await_valid` to wait.
    pub fn download(&self) -> Result<(), VehicleError> {
        self.await_valid();
        self.inner.lock().fetch = Fetch::AwaitingCount;
        if let Err(e) = self.outbox.send(OutboundFrame::MissionRequestList(TargetedData::default())) {
            self.inner.lock().fetch = Fetch::Idle;
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait for any fetch in progress. False means shutdown.
    pub fn await_valid(&self) -> bool {
        self.poller.until(|| !self.is_fetching())
    }

    pub fn is_fetching(&self) -> bool {
        !matches!(self.inner.lock().fetch, Fetch::Idle)
    }

    pub fn is_uploading(&self) -> bool {
        self.inner.lock().upload.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn get(&self, index: usize) -> Option<Command> {
        self.inner.lock().items.get(index).cloned()
    }

    pub fn items(&self) -> Vec<Command> {
        self.inner.lock().items.clone()
    }

    pub fn set(&self, index: usize, cmd: Command) -> Result<(), VehicleError> {
        let mut inner = self.inner.lock();
        let len = inner.items.len();
        let slot = inner.items.get_mut(index).ok_or(VehicleError::IndexOutOfRange { index, len })?;
        *slot = cmd;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn add(&self, mut cmd: Command) {
        self.await_valid();
        let t = self.outbox.targets();
        cmd.target_system = t.system;
        cmd.target_component = t.component;
        self.inner.lock().items.push(cmd);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.await_valid();
        self.inner.lock().items.clear();
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Last MISSION_CURRENT reported by the vehicle.
    pub fn active_index(&self) -> u16 {
        self.store.read(|s| s.active_index)
    }

    /// Ask the vehicle to jump; `active_index` follows once it reports back.
    pub fn set_active_index(&self, seq: u16) -> Result<(), VehicleError> {
        self.outbox.send(OutboundFrame::MissionSetCurrent(MissionSetCurrentData { seq, ..Default::default() }))?;
        Ok(())
    }

    pub fn takeoff(&self, alt: f32) -> Result<(), VehicleError> {
        self.outbox.send(OutboundFrame::CommandLong(CommandLongData {
            command: cmd::NAV_TAKEOFF,
            params: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, alt],
            ..Default::default()
        }))?;
        Ok(())
    }

    /// Fly to `loc` in guided mode.
    pub fn goto(&self, loc: &Location) -> Result<(), VehicleError> {
        let item = Command { seq: 0, current: GUIDED_TARGET, autocontinue: 0, ..Command::waypoint(loc) };
        self.outbox.send(OutboundFrame::MissionItem(item))?;
        Ok(())
    }

    /// Upload the local list if it changed since the last upload or fetch.
    /// Returns whether an upload was started.
    pub fn flush(&self) -> Result<bool, VehicleError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let snapshot = self.items();
        let count = snapshot.len() as u16;
        self.inner.lock().upload = match snapshot.is_empty() {
            true => None,
            false => Some(Upload { items: snapshot, sent: None }),
        };

        let sent = self
            .outbox
            .send(OutboundFrame::MissionClearAll(TargetedData::default()))
            .and_then(|_| match count {
                0 => Ok(()),
                _ => self.outbox.send(OutboundFrame::MissionCount(MissionCountData { count, ..Default::default() })),
            });
        if let Err(e) = sent {
            self.inner.lock().upload = None;
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        log::info!("uploading {count} commands");
        Ok(true)
    }

    pub(crate) fn on_mission_count(&self, d: &MissionCountData) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.fetch, Fetch::AwaitingCount) {
            return Ok(());
        }
        if d.count == 0 {
            inner.items.clear();
            inner.fetch = Fetch::Idle;
            self.dirty.store(false, Ordering::SeqCst);
            drop(inner);
            log::info!("vehicle has no commands");
            return self.ack();
        }
        inner.fetch = Fetch::Receiving { expected: d.count, items: Vec::with_capacity(d.count as usize) };
        drop(inner);
        self.request(0)
    }

    pub(crate) fn on_mission_item(&self, item: &Command) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        let (expected, mut items) = match std::mem::take(&mut inner.fetch) {
            Fetch::Receiving { expected, items } => (expected, items),
            other => {
                inner.fetch = other;
                return Ok(());
            }
        };

        let want = items.len() as u16;
        if item.seq != want {
            inner.fetch = Fetch::Receiving { expected, items };
            drop(inner);
            log::debug!("got command {} while waiting for {want}", item.seq);
            return self.request(want);
        }

        items.push(item.clone());
        if items.len() as u16 == expected {
            inner.items = items;
            self.dirty.store(false, Ordering::SeqCst);
            drop(inner);
            log::info!("downloaded {expected} commands");
            self.ack()
        } else {
            inner.fetch = Fetch::Receiving { expected, items };
            drop(inner);
            self.request(want + 1)
        }
    }

    pub(crate) fn on_mission_request(&self, d: &MissionRequestData) -> Result<(), DispatchError> {
        let mut item = {
            let mut inner = self.inner.lock();
            let Some(up) = inner.upload.as_mut() else { return Ok(()) };
            let item = up.items.get(d.seq as usize).cloned().ok_or(DispatchError::UnknownItem(d.seq))?;
            up.sent = up.sent.max(Some(d.seq));
            item
        };
        item.seq = d.seq;
        self.outbox.send(OutboundFrame::MissionItem(item))?;
        Ok(())
    }

    pub(crate) fn on_mission_ack(&self, d: &MissionAckData) {
        let mut inner = self.inner.lock();
        if let Some(up) = inner.upload.take() {
            if d.result != MISSION_ACCEPTED {
                log::warn!("vehicle rejected commands (result {})", d.result);
            } else if up.complete() {
                log::info!("vehicle accepted {} commands", up.items.len());
            } else {
                // clear-all, or a guided target sent meanwhile
                log::debug!("ack before the last command was requested");
                inner.upload = Some(up);
            }
        } else if !matches!(inner.fetch, Fetch::Idle) && d.result != MISSION_ACCEPTED {
            log::warn!("command download aborted by vehicle (result {})", d.result);
            inner.fetch = Fetch::Idle;
        }
    }

    fn request(&self, seq: u16) -> Result<(), DispatchError> {
        self.outbox.send(OutboundFrame::MissionRequest(MissionRequestData { seq, ..Default::default() }))?;
        Ok(())
    }

    fn ack(&self) -> Result<(), DispatchError> {
        self.outbox.send(OutboundFrame::MissionAck(MissionAckData { result: MISSION_ACCEPTED, ..Default::default() }))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use link_core::mock::RecordingSink;
    use model::MavFrame;
    use std::time::Duration;

    fn sequence() -> (Arc<RecordingSink>, CommandSequence) {
        let (sink, outbox) = testutil::outbox();
        let seq = CommandSequence::new(
            Arc::new(TelemetryStore::new()),
            outbox,
            testutil::poller(Duration::from_millis(5)),
        );
        (sink, seq)
    }

    fn wp(seq: u16, lat: f64) -> Command {
        Command { seq, ..Command::waypoint(&Location::relative(lat, 149.0, 20.0)) }
    }

    #[test]
    fn edits_mark_dirty_and_flush_uploads_once() {
        let (sink, seq) = sequence();
        assert!(!seq.is_dirty());
        seq.add(wp(0, -35.0));
        seq.add(wp(0, -35.1));
        assert!(seq.is_dirty());
        assert_eq!(seq.get(1).unwrap().target_system, 1);

        assert!(seq.flush().unwrap());
        assert!(!seq.flush().unwrap());
        assert_eq!(sink.named("MISSION_CLEAR_ALL").len(), 1);
        match &sink.named("MISSION_COUNT")[..] {
            [OutboundFrame::MissionCount(d)] => assert_eq!(d.count, 2),
            other => panic!("unexpected {other:?}"),
        }

        seq.set(0, wp(0, -36.0)).unwrap();
        assert!(seq.is_dirty());
        seq.clear();
        assert_eq!(seq.count(), 0);
        assert!(seq.flush().unwrap());
        // empty list: clear only
        assert_eq!(sink.named("MISSION_CLEAR_ALL").len(), 2);
        assert_eq!(sink.named("MISSION_COUNT").len(), 1);
    }

    #[test]
    fn set_out_of_range() {
        let (_sink, seq) = sequence();
        seq.add(wp(0, -35.0));
        assert!(matches!(
            seq.set(3, wp(0, 0.0)),
            Err(VehicleError::IndexOutOfRange { index: 3, len: 1 })
        ));
    }

    #[test]
    fn fetch_protocol() {
        let (sink, seq) = sequence();
        seq.add(wp(0, 1.0));
        seq.download().unwrap();
        assert!(seq.is_fetching());
        assert_eq!(sink.named("MISSION_REQUEST_LIST").len(), 1);

        seq.on_mission_count(&MissionCountData { count: 2, ..Default::default() }).unwrap();
        seq.on_mission_item(&wp(0, -35.0)).unwrap();
        // duplicate of 0 re-requests 1
        seq.on_mission_item(&wp(0, -35.0)).unwrap();
        seq.on_mission_item(&wp(1, -35.5)).unwrap();

        assert!(!seq.is_fetching());
        assert!(seq.await_valid());
        assert!(!seq.is_dirty());
        assert_eq!(seq.count(), 2);
        assert_eq!(seq.get(1).unwrap().x, -35.5);

        let requested: Vec<u16> = sink.named("MISSION_REQUEST").into_iter().map(|f| match f {
            OutboundFrame::MissionRequest(d) => d.seq,
            other => panic!("unexpected {other:?}"),
        }).collect();
        assert_eq!(requested, vec![0, 1, 1]);
        assert_eq!(sink.named("MISSION_ACK").len(), 1);
    }

    #[test]
    fn empty_fetch_completes_immediately() {
        let (sink, seq) = sequence();
        seq.download().unwrap();
        seq.on_mission_count(&MissionCountData::default()).unwrap();
        assert!(!seq.is_fetching());
        assert_eq!(seq.count(), 0);
        assert_eq!(sink.named("MISSION_ACK").len(), 1);
    }

    #[test]
    fn unsolicited_frames_are_ignored() {
        let (sink, seq) = sequence();
        seq.on_mission_count(&MissionCountData { count: 3, ..Default::default() }).unwrap();
        seq.on_mission_item(&wp(0, 1.0)).unwrap();
        seq.on_mission_request(&MissionRequestData::default()).unwrap();
        assert_eq!(seq.count(), 0);
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn upload_answers_requests_until_ack() {
        let (sink, seq) = sequence();
        seq.add(wp(0, -35.0));
        seq.add(Command::takeoff(10.0));
        seq.flush().unwrap();
        sink.take();

        seq.on_mission_request(&MissionRequestData { seq: 1, ..Default::default() }).unwrap();
        match &sink.take()[..] {
            [OutboundFrame::MissionItem(c)] => {
                assert_eq!((c.seq, c.command), (1, cmd::NAV_TAKEOFF));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            seq.on_mission_request(&MissionRequestData { seq: 5, ..Default::default() }),
            Err(DispatchError::UnknownItem(5))
        ));

        seq.on_mission_ack(&MissionAckData::default());
        assert!(!seq.is_uploading());
        seq.on_mission_request(&MissionRequestData::default()).unwrap();
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn clear_all_ack_keeps_upload_open() {
        let (sink, seq) = sequence();
        seq.add(Command::takeoff(10.0));
        seq.add(Command::takeoff(20.0));
        seq.flush().unwrap();
        sink.take();

        // vehicle acknowledges MISSION_CLEAR_ALL before asking for items
        seq.on_mission_ack(&MissionAckData::default());
        assert!(seq.is_uploading());
        seq.on_mission_request(&MissionRequestData { seq: 0, ..Default::default() }).unwrap();
        seq.on_mission_ack(&MissionAckData::default());
        assert!(seq.is_uploading());
        seq.on_mission_request(&MissionRequestData { seq: 1, ..Default::default() }).unwrap();

        let alts: Vec<f32> = sink.take().into_iter().map(|f| match f {
            OutboundFrame::MissionItem(c) => c.z,
            other => panic!("unexpected {other:?}"),
        }).collect();
        assert_eq!(alts, vec![10.0, 20.0]);

        seq.on_mission_ack(&MissionAckData::default());
        assert!(!seq.is_uploading());
    }

    #[test]
    fn rejection_ends_upload_early() {
        let (_sink, seq) = sequence();
        seq.add(wp(0, -35.0));
        seq.flush().unwrap();
        seq.on_mission_ack(&MissionAckData { result: 4, ..Default::default() });
        assert!(!seq.is_uploading());
    }

    #[test]
    fn accepted_ack_does_not_abort_fetch() {
        let (_sink, seq) = sequence();
        seq.goto(&Location::relative(-35.3, 149.1, 30.0)).unwrap();
        seq.download().unwrap();
        // ack for the guided target
        seq.on_mission_ack(&MissionAckData::default());
        assert!(seq.is_fetching());

        seq.on_mission_count(&MissionCountData { count: 1, ..Default::default() }).unwrap();
        assert!(seq.is_fetching());
        seq.on_mission_item(&wp(0, -35.5)).unwrap();
        assert!(!seq.is_fetching());
        assert_eq!(seq.get(0).unwrap().x, -35.5);

        seq.download().unwrap();
        seq.on_mission_ack(&MissionAckData { result: 1, ..Default::default() });
        assert!(!seq.is_fetching());
        assert_eq!(seq.count(), 1);
    }

    #[test]
    fn goto_and_takeoff_frames() {
        let (sink, seq) = sequence();
        seq.goto(&Location::relative(-35.3, 149.1, 30.0)).unwrap();
        seq.goto(&Location::absolute(-35.3, 149.1, 600.0)).unwrap();
        seq.takeoff(12.5).unwrap();
        match &sink.frames()[..] {
            [OutboundFrame::MissionItem(rel), OutboundFrame::MissionItem(abs), OutboundFrame::CommandLong(to)] => {
                assert_eq!((rel.current, rel.command, rel.frame), (2, cmd::NAV_WAYPOINT, MavFrame::GlobalRelativeAlt));
                assert_eq!((rel.x, rel.y, rel.z), (-35.3, 149.1, 30.0));
                assert_eq!(abs.frame, MavFrame::Global);
                assert_eq!(to.command, cmd::NAV_TAKEOFF);
                assert_eq!(to.params[6], 12.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
