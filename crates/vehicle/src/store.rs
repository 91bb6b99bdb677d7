//! Telemetry state record plus the topic-keyed observer registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use link_core::{CameraFeedbackData, HeartbeatData};
use model::*;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::VehicleError;
use crate::modes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Location,
    Velocity,
    Gps0,
    Airspeed,
    Groundspeed,
    Attitude,
    Mode,
    Armed,
    Mount,
    GoproState,
    GoproGetResponse,
    GoproSetResponse,
    EkfOk,
    CameraTrigger,
}

impl Topic {
    pub const ALL: [Topic; 14] = [
        Topic::Location, Topic::Velocity, Topic::Gps0, Topic::Airspeed,
        Topic::Groundspeed, Topic::Attitude, Topic::Mode, Topic::Armed,
        Topic::Mount, Topic::GoproState, Topic::GoproGetResponse,
        Topic::GoproSetResponse, Topic::EkfOk, Topic::CameraTrigger,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Location => "location",
            Topic::Velocity => "velocity",
            Topic::Gps0 => "gps_0",
            Topic::Airspeed => "airspeed",
            Topic::Groundspeed => "groundspeed",
            Topic::Attitude => "attitude",
            Topic::Mode => "mode",
            Topic::Armed => "armed",
            Topic::Mount => "mount",
            Topic::GoproState => "gopro_state",
            Topic::GoproGetResponse => "gopro_get_response",
            Topic::GoproSetResponse => "gopro_set_response",
            Topic::EkfOk => "ekf_ok",
            Topic::CameraTrigger => "camera_trigger",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = VehicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| VehicleError::UnknownTopic(s.to_string()))
    }
}

/// Everything the dispatcher has learned about the vehicle. Unset until the first
/// frame of the matching type arrives.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetryState {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Relative altitude from VFR_HUD, meters
    pub alt: Option<f32>,
    /// MSL altitude from GLOBAL_POSITION_INT, meters
    pub abs_alt: Option<f32>,
    /// m/s, north/east/down
    pub velocity: Option<[f32; 3]>,
    pub attitude: Option<Attitude>,
    pub rates: Option<AttitudeRates>,
    pub gps: Option<GpsInfo>,
    pub heartbeat: Option<HeartbeatData>,
    pub heading: Option<i16>,
    pub airspeed: Option<f32>,
    pub groundspeed: Option<f32>,
    pub mount: Option<MountStatus>,
    pub camera: CameraState,
    pub camera_get_response: Option<CameraGetResponse>,
    pub camera_set_response: Option<CameraSetResponse>,
    pub ekf_ok: bool,
    /// port * 8 + channel (1..=8) -> pwm
    pub rc_readback: BTreeMap<u16, u16>,
    pub camera_trigger: Option<CameraFeedbackData>,
    pub active_index: u16,
}

impl TelemetryState {
    pub fn location(&self) -> Option<Location> {
        Some(Location {
            lat: self.lat?,
            lon: self.lon?,
            alt: self.alt,
            is_relative: false,
            abs_alt: self.abs_alt,
        })
    }

    pub fn mode(&self) -> Option<VehicleMode> {
        self.heartbeat.as_ref().map(|hb| VehicleMode::new(modes::mode_name(hb)))
    }

    pub fn armed(&self) -> bool {
        self.heartbeat
            .as_ref()
            .map_or(false, |hb| hb.base_mode & modes::MAV_MODE_FLAG_SAFETY_ARMED != 0)
    }

    pub fn system_status(&self) -> Option<u8> {
        self.heartbeat.as_ref().map(|hb| hb.system_status)
    }

    pub fn vehicle_kind(&self) -> modes::VehicleKind {
        self.heartbeat
            .as_ref()
            .map_or(modes::VehicleKind::Unknown, |hb| modes::VehicleKind::from_mavtype(hb.mavtype))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Observer = Arc<dyn Fn(Topic) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Callback(Observer),
    Channel(Sender<Topic>),
}

pub struct TelemetryStore {
    state: RwLock<TelemetryState>,
    observers: Mutex<HashMap<Topic, Vec<(SubscriptionId, Subscriber)>>>,
    next_id: AtomicU64,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TelemetryState::default()),
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> TelemetryState {
        self.state.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&TelemetryState) -> R) -> R {
        f(&self.state.read())
    }

    /// Apply one frame's worth of changes, then notify `topics` with the lock released.
    pub fn apply(&self, topics: &[Topic], update: impl FnOnce(&mut TelemetryState)) {
        {
            let mut state = self.state.write();
            update(&mut state);
        }
        for t in topics {
            self.notify(*t);
        }
    }

    pub fn subscribe(&self, topic: Topic, f: impl Fn(Topic) + Send + Sync + 'static) -> SubscriptionId {
        self.insert(topic, Subscriber::Callback(Arc::new(f)))
    }

    /// Notifications are dropped, not queued, while the channel is full.
    pub fn subscribe_channel(&self, topic: Topic, tx: Sender<Topic>) -> SubscriptionId {
        self.insert(topic, Subscriber::Channel(tx))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let mut found = false;
        for subs in observers.values_mut() {
            let before = subs.len();
            subs.retain(|(sid, _)| *sid != id);
            found |= subs.len() != before;
        }
        found
    }

    pub fn observer_count(&self, topic: Topic) -> usize {
        self.observers.lock().get(&topic).map_or(0, Vec::len)
    }

    pub fn notify(&self, topic: Topic) {
        // copied out so observers may subscribe/unsubscribe from inside a callback
        let subs = match self.observers.lock().get(&topic) {
            Some(subs) if !subs.is_empty() => subs.clone(),
            _ => return,
        };

        let mut dead = Vec::new();
        for (id, sub) in subs {
            match sub {
                Subscriber::Callback(f) => {
                    if panic::catch_unwind(AssertUnwindSafe(|| f(topic))).is_err() {
                        log::error!("observer for {topic} panicked");
                    }
                }
                Subscriber::Channel(tx) => match tx.try_send(topic) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => log::debug!("observer channel for {topic} full"),
                    Err(TrySendError::Disconnected(_)) => dead.push(id),
                },
            }
        }

        if !dead.is_empty() {
            if let Some(subs) = self.observers.lock().get_mut(&topic) {
                subs.retain(|(id, _)| !dead.contains(id));
            }
        }
    }

    fn insert(&self, topic: Topic, sub: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().entry(topic).or_default().push((id, sub));
        id
    }
}
