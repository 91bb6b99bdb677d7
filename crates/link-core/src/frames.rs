//! Decoded telemetry frames exchanged with the host link.
//!
//! Field names and units follow the MAVLink message definitions; the host's
//! codec is responsible for the wire layout.

use model::Command;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Targets;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatData {
    pub mavtype: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub custom_mode: u32,
    pub system_status: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalPositionIntData {
    pub time_boot_ms: u32,
    pub lat: i32,          // degE7
    pub lon: i32,          // degE7
    pub alt: i32,          // mm, MSL
    pub relative_alt: i32, // mm
    pub vx: i16,           // cm/s
    pub vy: i16,
    pub vz: i16,
    pub hdg: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsRawIntData {
    pub time_usec: u64,
    pub fix_type: u8,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub eph: u16,
    pub epv: u16,
    pub vel: u16,
    pub cog: u16,
    pub satellites_visible: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfrHudData {
    pub airspeed: f32,
    pub groundspeed: f32,
    pub heading: i16,
    pub throttle: u16,
    pub alt: f32,
    pub climb: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttitudeData {
    pub time_boot_ms: u32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionCurrentData {
    pub seq: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionCountData {
    pub target_system: u8,
    pub target_component: u8,
    pub count: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionRequestData {
    pub target_system: u8,
    pub target_component: u8,
    pub seq: u16,
}

pub const MISSION_ACCEPTED: u8 = 0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionAckData {
    pub target_system: u8,
    pub target_component: u8,
    pub result: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcChannelsRawData {
    pub time_boot_ms: u32,
    pub port: u8,
    pub chan_raw: [u16; 8],
    pub rssi: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountStatusData {
    pub target_system: u8,
    pub target_component: u8,
    pub pointing_a: i32, // pitch, cdeg
    pub pointing_b: i32, // roll, cdeg
    pub pointing_c: i32, // yaw, cdeg
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoproHeartbeatData {
    pub status: u8,
    pub capture_mode: u8,
    pub flags: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoproGetResponseData {
    pub cmd_id: u8,
    pub status: u8,
    pub value: [u8; 4],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoproSetResponseData {
    pub cmd_id: u8,
    pub status: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EkfStatusReportData {
    pub flags: u16,
    pub velocity_variance: f32,
    pub pos_horiz_variance: f32,
    pub pos_vert_variance: f32,
    pub compass_variance: f32,
    pub terrain_alt_variance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraFeedbackData {
    pub time_usec: u64,
    pub target_system: u8,
    pub cam_idx: u8,
    pub img_idx: u16,
    pub lat: i32,
    pub lng: i32,
    pub alt_msl: f32,
    pub alt_rel: f32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub foc_len: f32,
    pub flags: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamValueData {
    pub param_id: String,
    pub param_value: f32,
    pub param_type: u8,
    pub param_count: u16,
    pub param_index: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandAckData {
    pub command: u16,
    pub result: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatustextData {
    pub severity: u8,
    pub text: String,
}

/// An inbound frame, already decoded by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    Heartbeat(HeartbeatData),
    GlobalPositionInt(GlobalPositionIntData),
    GpsRawInt(GpsRawIntData),
    VfrHud(VfrHudData),
    Attitude(AttitudeData),
    MissionCurrent(MissionCurrentData),
    MissionCount(MissionCountData),
    MissionItem(Command),
    MissionRequest(MissionRequestData),
    MissionAck(MissionAckData),
    RcChannelsRaw(RcChannelsRawData),
    MountStatus(MountStatusData),
    GoproHeartbeat(GoproHeartbeatData),
    GoproGetResponse(GoproGetResponseData),
    GoproSetResponse(GoproSetResponseData),
    EkfStatusReport(EkfStatusReportData),
    CameraFeedback(CameraFeedbackData),
    ParamValue(ParamValueData),
    CommandAck(CommandAckData),
    Statustext(StatustextData),
    /// Anything the core has no typed record for.
    Other {
        name: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
}

impl Frame {
    /// MAVLink message name, used for rx filtering.
    pub fn name(&self) -> &str {
        match self {
            Frame::Heartbeat(_) => "HEARTBEAT",
            Frame::GlobalPositionInt(_) => "GLOBAL_POSITION_INT",
            Frame::GpsRawInt(_) => "GPS_RAW_INT",
            Frame::VfrHud(_) => "VFR_HUD",
            Frame::Attitude(_) => "ATTITUDE",
            Frame::MissionCurrent(_) => "MISSION_CURRENT",
            Frame::MissionCount(_) => "MISSION_COUNT",
            Frame::MissionItem(_) => "MISSION_ITEM",
            Frame::MissionRequest(_) => "MISSION_REQUEST",
            Frame::MissionAck(_) => "MISSION_ACK",
            Frame::RcChannelsRaw(_) => "RC_CHANNELS_RAW",
            Frame::MountStatus(_) => "MOUNT_STATUS",
            Frame::GoproHeartbeat(_) => "GOPRO_HEARTBEAT",
            Frame::GoproGetResponse(_) => "GOPRO_GET_RESPONSE",
            Frame::GoproSetResponse(_) => "GOPRO_SET_RESPONSE",
            Frame::EkfStatusReport(_) => "EKF_STATUS_REPORT",
            Frame::CameraFeedback(_) => "CAMERA_FEEDBACK",
            Frame::ParamValue(_) => "PARAM_VALUE",
            Frame::CommandAck(_) => "COMMAND_ACK",
            Frame::Statustext(_) => "STATUSTEXT",
            Frame::Other { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandLongData {
    pub target_system: u8,
    pub target_component: u8,
    pub command: u16,
    pub confirmation: u8,
    pub params: [f32; 7],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetModeData {
    pub target_system: u8,
    pub base_mode: u8,
    pub custom_mode: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetedData {
    pub target_system: u8,
    pub target_component: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionSetCurrentData {
    pub target_system: u8,
    pub target_component: u8,
    pub seq: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSetData {
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: String,
    pub param_value: f32,
    pub param_type: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcChannelsOverrideData {
    pub target_system: u8,
    pub target_component: u8,
    pub chan_raw: [u16; 8],
}

/// A frame for the host to encode and transmit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    CommandLong(CommandLongData),
    SetMode(SetModeData),
    MissionItem(Command),
    MissionCount(MissionCountData),
    MissionRequest(MissionRequestData),
    MissionRequestList(TargetedData),
    MissionClearAll(TargetedData),
    MissionAck(MissionAckData),
    MissionSetCurrent(MissionSetCurrentData),
    ParamSet(ParamSetData),
    ParamRequestList(TargetedData),
    RcChannelsOverride(RcChannelsOverrideData),
    Other {
        name: String,
        #[serde(default)]
        fields: Map<String, Value>,
    },
}

impl OutboundFrame {
    pub fn name(&self) -> &str {
        match self {
            OutboundFrame::CommandLong(_) => "COMMAND_LONG",
            OutboundFrame::SetMode(_) => "SET_MODE",
            OutboundFrame::MissionItem(_) => "MISSION_ITEM",
            OutboundFrame::MissionCount(_) => "MISSION_COUNT",
            OutboundFrame::MissionRequest(_) => "MISSION_REQUEST",
            OutboundFrame::MissionRequestList(_) => "MISSION_REQUEST_LIST",
            OutboundFrame::MissionClearAll(_) => "MISSION_CLEAR_ALL",
            OutboundFrame::MissionAck(_) => "MISSION_ACK",
            OutboundFrame::MissionSetCurrent(_) => "MISSION_SET_CURRENT",
            OutboundFrame::ParamSet(_) => "PARAM_SET",
            OutboundFrame::ParamRequestList(_) => "PARAM_REQUEST_LIST",
            OutboundFrame::RcChannelsOverride(_) => "RC_CHANNELS_OVERRIDE",
            OutboundFrame::Other { name, .. } => name,
        }
    }

    /// Point the frame at our vehicle. Only frames that carry target fields are touched.
    pub fn fix_targets(&mut self, t: Targets) {
        let d: &mut dyn Targeted = match self {
            OutboundFrame::CommandLong(d) => d,
            OutboundFrame::MissionItem(d) => d,
            OutboundFrame::MissionCount(d) => d,
            OutboundFrame::MissionRequest(d) => d,
            OutboundFrame::MissionAck(d) => d,
            OutboundFrame::MissionSetCurrent(d) => d,
            OutboundFrame::ParamSet(d) => d,
            OutboundFrame::RcChannelsOverride(d) => d,
            OutboundFrame::MissionRequestList(d)
            | OutboundFrame::MissionClearAll(d)
            | OutboundFrame::ParamRequestList(d) => d,
            OutboundFrame::SetMode(d) => {
                d.target_system = t.system;
                return;
            }
            OutboundFrame::Other { fields, .. } => {
                if let Some(v) = fields.get_mut("target_system") {
                    *v = Value::from(t.system);
                }
                if let Some(v) = fields.get_mut("target_component") {
                    *v = Value::from(t.component);
                }
                return;
            }
        };
        d.retarget(t);
    }
}

/// Payloads addressed to a system and component.
trait Targeted {
    fn retarget(&mut self, t: Targets);
}

macro_rules! targeted {
    ($($ty:ty),+ $(,)?) => {$(
        impl Targeted for $ty {
            fn retarget(&mut self, t: Targets) {
                self.target_system = t.system;
                self.target_component = t.component;
            }
        }
    )+};
}

targeted!(
    CommandLongData,
    Command,
    MissionCountData,
    MissionRequestData,
    MissionAckData,
    MissionSetCurrentData,
    ParamSetData,
    RcChannelsOverrideData,
    TargetedData,
);
