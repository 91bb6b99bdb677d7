use serde::{Deserialize, Serialize};
use std::fmt;

/// MAV_CMD ids used by the API.
pub mod cmd {
    pub const NAV_WAYPOINT: u16 = 16;
    pub const NAV_LOITER_UNLIM: u16 = 17;
    pub const NAV_RETURN_TO_LAUNCH: u16 = 20;
    pub const NAV_LAND: u16 = 21;
    pub const NAV_TAKEOFF: u16 = 22;
    pub const DO_CHANGE_SPEED: u16 = 178;
    pub const DO_SET_SERVO: u16 = 183;
    pub const COMPONENT_ARM_DISARM: u16 = 400;
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    /// Meters, relative to home when `is_relative` is set.
    pub alt: Option<f32>,
    pub is_relative: bool,
    pub abs_alt: Option<f32>,
}

impl Location {
    pub fn relative(lat: f64, lon: f64, alt: f32) -> Self {
        Self { lat, lon, alt: Some(alt), is_relative: true, abs_alt: None }
    }

    pub fn absolute(lat: f64, lon: f64, alt: f32) -> Self {
        Self { lat, lon, alt: Some(alt), is_relative: false, abs_alt: Some(alt) }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location:lat={},lon={},alt={:?},is_relative={}",
            self.lat, self.lon, self.alt, self.is_relative)
    }
}

/// Radians.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Attitude {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl fmt::Display for Attitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attitude:pitch={},yaw={},roll={}", self.pitch, self.yaw, self.roll)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct AttitudeRates {
    pub pitchspeed: f32,
    pub yawspeed: f32,
    pub rollspeed: f32,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct GpsInfo {
    pub eph: u16,
    pub epv: u16,
    pub fix_type: u8,
    pub satellites_visible: u8,
}

impl fmt::Display for GpsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPSInfo:fix={},num_sat={}", self.fix_type, self.satellites_visible)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub struct VehicleMode {
    pub name: String,
}

impl VehicleMode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl From<&str> for VehicleMode {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for VehicleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VehicleMode:{}", self.name)
    }
}

/// Gimbal orientation in degrees.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct MountStatus {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum CameraStatus {
    #[default]
    Disconnected,
    Incompatible,
    Connected,
    Error,
}

impl CameraStatus {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => CameraStatus::Incompatible,
            2 => CameraStatus::Connected,
            3 => CameraStatus::Error,
            _ => CameraStatus::Disconnected,
        }
    }
}

const CAMERA_FLAG_RECORDING: u8 = 1;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct CameraState {
    pub status: CameraStatus,
    pub capture_mode: u8,
    pub flags: u8,
}

impl CameraState {
    pub fn is_recording(&self) -> bool {
        self.status == CameraStatus::Connected && self.flags & CAMERA_FLAG_RECORDING != 0
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CameraGetResponse {
    pub cmd_id: u8,
    pub status: u8,
    pub value: [u8; 4],
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CameraSetResponse {
    pub cmd_id: u8,
    pub status: u8,
}

/// Coordinate frame of a command (MAV_FRAME).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub enum MavFrame {
    #[default]
    Global,
    LocalNed,
    Mission,
    GlobalRelativeAlt,
    LocalEnu,
    GlobalInt,
    GlobalRelativeAltInt,
    GlobalTerrainAlt,
}

impl MavFrame {
    pub fn id(self) -> u8 {
        match self {
            MavFrame::Global => 0,
            MavFrame::LocalNed => 1,
            MavFrame::Mission => 2,
            MavFrame::GlobalRelativeAlt => 3,
            MavFrame::LocalEnu => 4,
            MavFrame::GlobalInt => 5,
            MavFrame::GlobalRelativeAltInt => 6,
            MavFrame::GlobalTerrainAlt => 10,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => MavFrame::Global,
            1 => MavFrame::LocalNed,
            2 => MavFrame::Mission,
            3 => MavFrame::GlobalRelativeAlt,
            4 => MavFrame::LocalEnu,
            5 => MavFrame::GlobalInt,
            6 => MavFrame::GlobalRelativeAltInt,
            10 => MavFrame::GlobalTerrainAlt,
            _ => return None,
        })
    }
}

/// One entry of the vehicle's command sequence (a MISSION_ITEM).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Command {
    pub target_system: u8,
    pub target_component: u8,
    pub seq: u16,
    pub frame: MavFrame,
    pub command: u16,
    /// 0 = not current, 1 = current, 2 = guided-mode target
    pub current: u8,
    pub autocontinue: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: f64,
    pub y: f64,
    pub z: f32,
}

impl Command {
    pub fn new(frame: MavFrame, command: u16) -> Self {
        Self { frame, command, autocontinue: 1, ..Default::default() }
    }

    pub fn waypoint(loc: &Location) -> Self {
        let frame = if loc.is_relative { MavFrame::GlobalRelativeAlt } else { MavFrame::Global };
        Self {
            x: loc.lat,
            y: loc.lon,
            z: loc.alt.unwrap_or(0.0),
            ..Self::new(frame, cmd::NAV_WAYPOINT)
        }
    }

    pub fn takeoff(alt: f32) -> Self {
        Self { z: alt, ..Self::new(MavFrame::GlobalRelativeAlt, cmd::NAV_TAKEOFF) }
    }

    pub fn location(&self) -> Option<Location> {
        match self.frame {
            MavFrame::Global | MavFrame::GlobalInt => Some(Location::absolute(self.x, self.y, self.z)),
            MavFrame::GlobalRelativeAlt | MavFrame::GlobalRelativeAltInt => {
                Some(Location::relative(self.x, self.y, self.z))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waypoint_picks_frame_from_altitude_reference() {
        let rel = Command::waypoint(&Location::relative(-35.1, 149.2, 20.0));
        assert_eq!(rel.frame, MavFrame::GlobalRelativeAlt);
        assert_eq!(rel.command, cmd::NAV_WAYPOINT);
        assert_eq!(rel.z, 20.0);

        let abs = Command::waypoint(&Location::absolute(-35.1, 149.2, 600.0));
        assert_eq!(abs.frame, MavFrame::Global);
        assert_eq!(abs.location(), Some(Location::absolute(-35.1, 149.2, 600.0)));
    }

    #[test]
    fn frame_ids_match_mavlink() {
        for id in [0u8, 1, 2, 3, 4, 5, 6, 10] {
            assert_eq!(MavFrame::from_id(id).map(MavFrame::id), Some(id));
        }
        assert_eq!(MavFrame::from_id(7), None);
    }

    #[test]
    fn recording_needs_connected_camera() {
        let mut cam = CameraState { status: CameraStatus::from_raw(2), capture_mode: 0, flags: 1 };
        assert!(cam.is_recording());
        cam.status = CameraStatus::Disconnected;
        assert!(!cam.is_recording());
    }
}
