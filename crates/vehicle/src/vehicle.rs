use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use link_core::*;
use model::*;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::commands::CommandSequence;
use crate::dispatcher::Dispatcher;
use crate::error::VehicleError;
use crate::modes::{self, MAV_MODE_FLAG_CUSTOM_MODE_ENABLED};
use crate::outbox::Outbox;
use crate::params::{Parameters, MAV_PARAM_TYPE_REAL32};
use crate::store::{SubscriptionId, TelemetryState, TelemetryStore, Topic};
use crate::wait::{PollOutcome, Poller};

pub const RC_CHANNELS: usize = 8;

/// Builds outbound frames addressed to the vehicle.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageFactory {
    targets: Targets,
}

impl MessageFactory {
    pub fn new(targets: Targets) -> Self {
        Self { targets }
    }

    pub fn command_long(&self, command: u16, params: [f32; 7]) -> OutboundFrame {
        OutboundFrame::CommandLong(CommandLongData {
            target_system: self.targets.system,
            target_component: self.targets.component,
            command,
            confirmation: 0,
            params,
        })
    }

    pub fn set_mode(&self, custom_mode: u32) -> OutboundFrame {
        OutboundFrame::SetMode(SetModeData {
            target_system: self.targets.system,
            base_mode: MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            custom_mode,
        })
    }

    pub fn mission_item(&self, cmd: Command) -> OutboundFrame {
        let mut f = OutboundFrame::MissionItem(cmd);
        f.fix_targets(self.targets);
        f
    }

    pub fn param_set(&self, name: &str, value: f32) -> OutboundFrame {
        OutboundFrame::ParamSet(ParamSetData {
            target_system: self.targets.system,
            target_component: self.targets.component,
            param_id: name.to_ascii_uppercase(),
            param_value: value,
            param_type: MAV_PARAM_TYPE_REAL32,
        })
    }

    pub fn rc_override(&self, chan_raw: [u16; RC_CHANNELS]) -> OutboundFrame {
        OutboundFrame::RcChannelsOverride(RcChannelsOverrideData {
            target_system: self.targets.system,
            target_component: self.targets.component,
            chan_raw,
        })
    }

    /// Any message by name, for types without a typed record. Non-object `fields` encode as empty.
    pub fn encode(&self, name: &str, fields: Value) -> OutboundFrame {
        let fields = match fields {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        let mut f = OutboundFrame::Other { name: name.to_ascii_uppercase(), fields };
        f.fix_targets(self.targets);
        f
    }
}

/// The vehicle as seen by scripts.
pub struct Vehicle {
    store: Arc<TelemetryStore>,
    params: Arc<Parameters>,
    commands: Arc<CommandSequence>,
    dispatcher: Arc<Dispatcher>,
    outbox: Outbox,
    poller: Poller,
    init_timeout: Duration,
    ready: AtomicBool,
    rc_override: Mutex<[u16; RC_CHANNELS]>,
}

impl Vehicle {
    pub(crate) fn new(
        store: Arc<TelemetryStore>,
        params: Arc<Parameters>,
        commands: Arc<CommandSequence>,
        dispatcher: Arc<Dispatcher>,
        outbox: Outbox,
        poller: Poller,
        init_timeout: Duration,
    ) -> Self {
        Self {
            store,
            params,
            commands,
            dispatcher,
            outbox,
            poller,
            init_timeout,
            ready: AtomicBool::new(false),
            rc_override: Mutex::new([0; RC_CHANNELS]),
        }
    }

    /// Wait until the autopilot has booted (a heartbeat with a mode other than
    /// INITIALISING). Once ready it never waits again.
    pub fn wait_ready(&self) -> Result<(), VehicleError> {
        if self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.poller.within(self.init_timeout, || self.store.read(booted)) {
            PollOutcome::Ready => {
                self.ready.store(true, Ordering::SeqCst);
                Ok(())
            }
            PollOutcome::TimedOut => {
                log::warn!("vehicle still initialising after {:?}", self.init_timeout);
                Err(VehicleError::NotReady)
            }
            PollOutcome::Shutdown => Err(VehicleError::NotReady),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) || self.store.read(booted)
    }

    pub fn mode(&self) -> Result<VehicleMode, VehicleError> {
        self.wait_ready()?;
        self.store.read(TelemetryState::mode).ok_or(VehicleError::NotReady)
    }

    pub fn set_mode(&self, mode: impl Into<VehicleMode>) -> Result<(), VehicleError> {
        let mode = mode.into();
        self.wait_ready()?;
        let kind = self.store.read(TelemetryState::vehicle_kind);
        let custom = modes::mode_number(kind, &mode.name).ok_or_else(|| VehicleError::UnknownMode(mode.name.clone()))?;
        log::info!("requesting mode {}", mode.name);
        self.send_frame(self.message_factory().set_mode(custom))
    }

    pub fn armed(&self) -> bool {
        self.store.read(TelemetryState::armed)
    }

    pub fn set_armed(&self, arm: bool) -> Result<(), VehicleError> {
        self.wait_ready()?;
        let p1 = if arm { 1.0 } else { 0.0 };
        self.send_frame(self.message_factory().command_long(cmd::COMPONENT_ARM_DISARM, [p1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
    }

    pub fn location(&self) -> Option<Location> {
        self.store.read(TelemetryState::location)
    }

    pub fn velocity(&self) -> Option<[f32; 3]> {
        self.store.read(|s| s.velocity)
    }

    pub fn attitude(&self) -> Option<Attitude> {
        self.store.read(|s| s.attitude)
    }

    pub fn attitude_rates(&self) -> Option<AttitudeRates> {
        self.store.read(|s| s.rates)
    }

    pub fn gps_0(&self) -> Option<GpsInfo> {
        self.store.read(|s| s.gps)
    }

    pub fn airspeed(&self) -> Option<f32> {
        self.store.read(|s| s.airspeed)
    }

    pub fn groundspeed(&self) -> Option<f32> {
        self.store.read(|s| s.groundspeed)
    }

    pub fn heading(&self) -> Option<i16> {
        self.store.read(|s| s.heading)
    }

    pub fn system_status(&self) -> Option<u8> {
        self.store.read(TelemetryState::system_status)
    }

    pub fn mount_status(&self) -> Option<MountStatus> {
        self.store.read(|s| s.mount)
    }

    pub fn gopro_state(&self) -> CameraState {
        self.store.read(|s| s.camera)
    }

    pub fn gopro_get_response(&self) -> Option<CameraGetResponse> {
        self.store.read(|s| s.camera_get_response)
    }

    pub fn gopro_set_response(&self) -> Option<CameraSetResponse> {
        self.store.read(|s| s.camera_set_response)
    }

    pub fn ekf_ok(&self) -> bool {
        self.store.read(|s| s.ekf_ok)
    }

    pub fn channel_readback(&self) -> BTreeMap<u16, u16> {
        self.store.read(|s| s.rc_readback.clone())
    }

    pub fn camera_trigger(&self) -> Option<CameraFeedbackData> {
        self.store.read(|s| s.camera_trigger.clone())
    }

    pub fn clear_camera_trigger(&self) {
        self.store.apply(&[], |s| s.camera_trigger = None);
    }

    pub fn snapshot(&self) -> TelemetryState {
        self.store.snapshot()
    }

    /// JSON view of one attribute, `null` while unset.
    pub fn attribute(&self, topic: Topic) -> Value {
        let s = self.store.snapshot();
        let v = match topic {
            Topic::Location => serde_json::to_value(s.location()),
            Topic::Velocity => serde_json::to_value(s.velocity),
            Topic::Gps0 => serde_json::to_value(s.gps),
            Topic::Airspeed => serde_json::to_value(s.airspeed),
            Topic::Groundspeed => serde_json::to_value(s.groundspeed),
            Topic::Attitude => serde_json::to_value(s.attitude),
            Topic::Mode => serde_json::to_value(s.mode().map(|m| m.name)),
            Topic::Armed => serde_json::to_value(s.armed()),
            Topic::Mount => serde_json::to_value(s.mount),
            Topic::GoproState => serde_json::to_value(s.camera),
            Topic::GoproGetResponse => serde_json::to_value(s.camera_get_response),
            Topic::GoproSetResponse => serde_json::to_value(s.camera_set_response),
            Topic::EkfOk => serde_json::to_value(s.ekf_ok),
            Topic::CameraTrigger => serde_json::to_value(s.camera_trigger),
        };
        v.unwrap_or(Value::Null)
    }

    /// Active RC overrides, channel (1..=8) -> pwm. Zero means released.
    pub fn channel_override(&self) -> BTreeMap<u8, u16> {
        self.rc_override
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(|(i, v)| (i as u8 + 1, *v))
            .collect()
    }

    /// Merge `entries` into the override table and send all eight channels.
    pub fn set_channel_override(&self, entries: impl IntoIterator<Item = (u8, u16)>) -> Result<(), VehicleError> {
        let entries: Vec<_> = entries.into_iter().collect();
        if let Some((ch, _)) = entries.iter().find(|(ch, _)| !(1..=RC_CHANNELS as u8).contains(ch)) {
            return Err(VehicleError::InvalidChannel(*ch));
        }
        let chan_raw = {
            let mut table = self.rc_override.lock();
            for (ch, v) in entries {
                table[ch as usize - 1] = v;
            }
            *table
        };
        self.send_frame(self.message_factory().rc_override(chan_raw))
    }

    pub fn message_factory(&self) -> MessageFactory {
        MessageFactory::new(self.outbox.targets())
    }

    pub fn send_frame(&self, frame: OutboundFrame) -> Result<(), VehicleError> {
        Ok(self.outbox.send(frame)?)
    }

    pub fn send_frame_untargeted(&self, frame: OutboundFrame) -> Result<(), VehicleError> {
        Ok(self.outbox.send_untargeted(frame)?)
    }

    /// Called on the dispatcher thread with every frame that passes the rx filter.
    pub fn set_frame_callback(&self, f: impl Fn(&Frame) + Send + Sync + 'static) {
        self.dispatcher.set_hook(Arc::new(f));
    }

    pub fn clear_frame_callback(&self) {
        self.dispatcher.clear_hook();
    }

    pub fn add_attribute_observer(&self, topic: Topic, f: impl Fn(Topic) + Send + Sync + 'static) -> SubscriptionId {
        self.store.subscribe(topic, f)
    }

    pub fn add_attribute_channel(&self, topic: Topic, tx: Sender<Topic>) -> SubscriptionId {
        self.store.subscribe_channel(topic, tx)
    }

    pub fn remove_attribute_observer(&self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn commands(&self) -> &CommandSequence {
        &self.commands
    }

    /// Push pending command sequence edits to the vehicle.
    pub fn flush(&self) -> Result<(), VehicleError> {
        self.commands.flush().map(|_| ())
    }
}

fn booted(s: &TelemetryState) -> bool {
    s.mode().map_or(false, |m| m.name != "INITIALISING")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleConfig;
    use crate::Connection;
    use link_core::mock::RecordingSink;
    use serde_json::json;
    use std::time::Instant;

    fn connect(init_timeout_ms: u64) -> (Arc<RecordingSink>, Connection) {
        let sink = Arc::new(RecordingSink::new());
        let cfg = VehicleConfig { poll_interval_ms: 10, init_timeout_ms, ..Default::default() };
        let conn = Connection::new(cfg, sink.clone());
        (sink, conn)
    }

    fn heartbeat(mavtype: u8, base_mode: u8, custom_mode: u32) -> Frame {
        Frame::Heartbeat(HeartbeatData { mavtype, autopilot: 3, base_mode, custom_mode, system_status: 3 })
    }

    #[test]
    fn rc_override_reads_back_nonzero_entries() {
        let (sink, conn) = connect(100);
        let v = conn.vehicle();
        assert!(v.channel_override().is_empty());

        v.set_channel_override([(1, 1500), (3, 1600)]).unwrap();
        let ov = v.channel_override();
        assert_eq!(ov, BTreeMap::from([(1, 1500), (3, 1600)]));
        assert_eq!(serde_json::to_value(&ov).unwrap(), json!({"1": 1500, "3": 1600}));

        v.set_channel_override([(3, 0)]).unwrap();
        assert_eq!(v.channel_override(), BTreeMap::from([(1, 1500)]));
        match sink.named("RC_CHANNELS_OVERRIDE").last() {
            Some(OutboundFrame::RcChannelsOverride(d)) => assert_eq!(d.chan_raw, [1500, 0, 0, 0, 0, 0, 0, 0]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_channel_changes_nothing() {
        let (sink, conn) = connect(100);
        let v = conn.vehicle();
        assert!(matches!(v.set_channel_override([(2, 1200), (9, 1500)]), Err(VehicleError::InvalidChannel(9))));
        assert!(matches!(v.set_channel_override([(0, 1500)]), Err(VehicleError::InvalidChannel(0))));
        assert!(v.channel_override().is_empty());
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn mode_times_out_without_heartbeat() {
        let (sink, conn) = connect(60);
        let v = conn.vehicle();
        let t0 = Instant::now();
        assert!(matches!(v.mode(), Err(VehicleError::NotReady)));
        assert!(t0.elapsed() >= Duration::from_millis(60));
        assert!(matches!(v.set_armed(true), Err(VehicleError::NotReady)));
        assert!(sink.frames().is_empty());
        // plain read never waits
        assert!(!v.armed());
    }

    #[test]
    fn initialising_plane_is_not_ready() {
        let (_sink, conn) = connect(50);
        conn.dispatcher().handle(&heartbeat(1, 1, 16)).unwrap();
        assert!(!conn.vehicle().is_ready());
        assert!(matches!(conn.vehicle().mode(), Err(VehicleError::NotReady)));

        conn.dispatcher().handle(&heartbeat(1, 1, 10)).unwrap();
        assert_eq!(conn.vehicle().mode().unwrap().name, "AUTO");
    }

    #[test]
    fn set_mode_and_arm_frames() {
        let (sink, conn) = connect(100);
        conn.dispatcher().handle(&heartbeat(2, 1, 0)).unwrap();
        let v = conn.vehicle();
        v.set_mode("GUIDED").unwrap();
        v.set_armed(true).unwrap();
        assert!(matches!(v.set_mode("QHOVER"), Err(VehicleError::UnknownMode(m)) if m == "QHOVER"));

        match &sink.frames()[..] {
            [OutboundFrame::SetMode(m), OutboundFrame::CommandLong(c)] => {
                assert_eq!((m.target_system, m.base_mode, m.custom_mode), (1, 1, 4));
                assert_eq!(c.command, cmd::COMPONENT_ARM_DISARM);
                assert_eq!(c.params[0], 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flush_is_idempotent() {
        let (sink, conn) = connect(100);
        let v = conn.vehicle();
        v.commands().add(Command::takeoff(10.0));
        v.commands().add(Command::waypoint(&Location::relative(-35.0, 149.0, 20.0)));
        v.flush().unwrap();
        v.flush().unwrap();
        assert_eq!(sink.named("MISSION_COUNT").len(), 1);
    }

    #[test]
    fn camera_trigger_can_be_cleared() {
        let (_sink, conn) = connect(100);
        conn.dispatcher().handle(&Frame::CameraFeedback(CameraFeedbackData { img_idx: 3, ..Default::default() })).unwrap();
        let v = conn.vehicle();
        assert_eq!(v.attribute(Topic::CameraTrigger)["img_idx"], 3);
        v.clear_camera_trigger();
        assert!(v.camera_trigger().is_none());
        assert_eq!(v.attribute(Topic::CameraTrigger), Value::Null);
    }

    #[test]
    fn factory_escape_hatch() {
        let (sink, conn) = connect(100);
        let v = conn.vehicle();
        let f = v.message_factory().encode("image_trigger_control", json!({"enable": 1, "target_system": 0}));
        v.send_frame_untargeted(f).unwrap();
        match &sink.frames()[..] {
            [OutboundFrame::Other { name, fields }] => {
                assert_eq!(name, "IMAGE_TRIGGER_CONTROL");
                assert_eq!(fields["target_system"], 1);
                assert_eq!(fields["enable"], 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
