use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use link_core::*;
use model::*;
use parking_lot::RwLock;

use crate::commands::CommandSequence;
use crate::error::DispatchError;
use crate::filter::RxFilter;
use crate::modes::MAV_TYPE_GCS;
use crate::params::Parameters;
use crate::store::{TelemetryStore, Topic};
use crate::wait::Shutdown;

bitflags::bitflags! {
    /// EKF_STATUS_FLAGS
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EkfFlags: u16 {
        const ATTITUDE = 1;
        const VELOCITY_HORIZ = 2;
        const VELOCITY_VERT = 4;
        const POS_HORIZ_REL = 8;
        const POS_HORIZ_ABS = 16;
        const POS_VERT_ABS = 32;
        const POS_VERT_AGL = 64;
        const CONST_POS_MODE = 128;
        const PRED_POS_HORIZ_REL = 256;
        const PRED_POS_HORIZ_ABS = 512;
    }
}

/// Whether the EKF position estimate is good enough to navigate on.
pub fn ekf_healthy(flags: EkfFlags, armed: bool) -> bool {
    if armed {
        flags.contains(EkfFlags::POS_HORIZ_ABS) && !flags.contains(EkfFlags::CONST_POS_MODE)
    } else {
        flags.intersects(EkfFlags::POS_HORIZ_ABS | EkfFlags::PRED_POS_HORIZ_ABS)
    }
}

pub type FrameHook = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Routes each inbound frame to the store, parameters or command sequence.
/// Sole writer of all three.
pub struct Dispatcher {
    store: Arc<TelemetryStore>,
    params: Arc<Parameters>,
    commands: Arc<CommandSequence>,
    filter: Arc<RxFilter>,
    hook: RwLock<Option<FrameHook>>,
}

impl Dispatcher {
    pub(crate) fn new(
        store: Arc<TelemetryStore>,
        params: Arc<Parameters>,
        commands: Arc<CommandSequence>,
        filter: Arc<RxFilter>,
    ) -> Self {
        Self { store, params, commands, filter, hook: RwLock::new(None) }
    }

    pub fn filter(&self) -> &Arc<RxFilter> {
        &self.filter
    }

    pub fn set_hook(&self, hook: FrameHook) {
        *self.hook.write() = Some(hook);
    }

    pub fn clear_hook(&self) {
        *self.hook.write() = None;
    }

    pub fn handle(&self, frame: &Frame) -> Result<(), DispatchError> {
        if self.filter.blocks(frame) {
            log::trace!("suppressed {}", frame.name());
            return Ok(());
        }
        let res = self.route(frame);

        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            if panic::catch_unwind(AssertUnwindSafe(|| hook(frame))).is_err() {
                log::error!("frame callback panicked on {}", frame.name());
            }
        }
        res
    }

    /// Receive loop for the dispatcher thread. Exits on shutdown or once every sender is gone.
    pub fn run(&self, rx: &FrameRx, shutdown: &Shutdown, poll: Duration) {
        while !shutdown.is_set() {
            match rx.recv_timeout(poll) {
                Ok(frame) => {
                    if let Err(e) = self.handle(&frame) {
                        log::warn!("{}: {e}", frame.name());
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("inbound link closed");
                    break;
                }
            }
        }
    }

    fn route(&self, frame: &Frame) -> Result<(), DispatchError> {
        match frame {
            Frame::GlobalPositionInt(d) => {
                self.store.apply(&[Topic::Location, Topic::Velocity], |s| {
                    s.lat = Some(d.lat as f64 / 1.0e7);
                    s.lon = Some(d.lon as f64 / 1.0e7);
                    s.abs_alt = Some(d.alt as f32 / 1000.0);
                    s.velocity = Some([d.vx as f32 / 100.0, d.vy as f32 / 100.0, d.vz as f32 / 100.0]);
                });
            }
            Frame::GpsRawInt(d) => {
                self.store.apply(&[Topic::Gps0], |s| {
                    s.gps = Some(GpsInfo {
                        eph: d.eph,
                        epv: d.epv,
                        fix_type: d.fix_type,
                        satellites_visible: d.satellites_visible,
                    });
                });
            }
            Frame::VfrHud(d) => {
                self.store.apply(&[Topic::Location, Topic::Airspeed, Topic::Groundspeed], |s| {
                    s.alt = Some(d.alt);
                    s.heading = Some(d.heading);
                    s.airspeed = Some(d.airspeed);
                    s.groundspeed = Some(d.groundspeed);
                });
            }
            Frame::Attitude(d) => {
                self.store.apply(&[Topic::Attitude], |s| {
                    s.attitude = Some(Attitude { pitch: d.pitch, yaw: d.yaw, roll: d.roll });
                    s.rates = Some(AttitudeRates {
                        pitchspeed: d.pitchspeed,
                        yawspeed: d.yawspeed,
                        rollspeed: d.rollspeed,
                    });
                });
            }
            Frame::Heartbeat(d) => {
                // other ground stations on the link
                if d.mavtype == MAV_TYPE_GCS {
                    return Ok(());
                }
                self.store.apply(&[Topic::Mode, Topic::Armed], |s| s.heartbeat = Some(d.clone()));
            }
            Frame::MissionCurrent(d) => self.store.apply(&[], |s| s.active_index = d.seq),
            Frame::RcChannelsRaw(d) => {
                self.store.apply(&[], |s| {
                    for (i, v) in d.chan_raw.iter().enumerate() {
                        s.rc_readback.insert(d.port as u16 * 8 + i as u16 + 1, *v);
                    }
                });
            }
            Frame::MountStatus(d) => {
                self.store.apply(&[Topic::Mount], |s| {
                    s.mount = Some(MountStatus {
                        pitch: d.pointing_a as f32 / 100.0,
                        roll: d.pointing_b as f32 / 100.0,
                        yaw: d.pointing_c as f32 / 100.0,
                    });
                });
            }
            Frame::GoproHeartbeat(d) => {
                self.store.apply(&[Topic::GoproState], |s| {
                    s.camera = CameraState {
                        status: CameraStatus::from_raw(d.status),
                        capture_mode: d.capture_mode,
                        flags: d.flags,
                    };
                });
            }
            Frame::GoproGetResponse(d) => {
                self.store.apply(&[Topic::GoproGetResponse], |s| {
                    s.camera_get_response = Some(CameraGetResponse { cmd_id: d.cmd_id, status: d.status, value: d.value });
                });
            }
            Frame::GoproSetResponse(d) => {
                self.store.apply(&[Topic::GoproSetResponse], |s| {
                    s.camera_set_response = Some(CameraSetResponse { cmd_id: d.cmd_id, status: d.status });
                });
            }
            Frame::EkfStatusReport(d) => {
                let flags = EkfFlags::from_bits_truncate(d.flags);
                self.store.apply(&[Topic::EkfOk], |s| s.ekf_ok = ekf_healthy(flags, s.armed()));
            }
            Frame::CameraFeedback(d) => {
                self.store.apply(&[Topic::CameraTrigger], |s| s.camera_trigger = Some(d.clone()));
            }
            Frame::ParamValue(d) => self.params.on_param_value(d),
            Frame::MissionCount(d) => self.commands.on_mission_count(d)?,
            Frame::MissionItem(c) => self.commands.on_mission_item(c)?,
            Frame::MissionRequest(d) => self.commands.on_mission_request(d)?,
            Frame::MissionAck(d) => self.commands.on_mission_ack(d),
            Frame::CommandAck(d) => log::debug!("command {} ack result {}", d.command, d.result),
            Frame::Statustext(d) => log::info!("vehicle: {}", d.text),
            Frame::Other { .. } => {}
        }
        Ok(())
    }
}
