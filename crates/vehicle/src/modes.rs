//! ArduPilot flight-mode numbering per vehicle type.

use link_core::HeartbeatData;

pub const MAV_MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 1;
pub const MAV_MODE_FLAG_SAFETY_ARMED: u8 = 128;
pub const MAV_TYPE_GCS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleKind {
    Copter,
    Plane,
    Rover,
    Sub,
    Tracker,
    Unknown,
}

impl VehicleKind {
    pub fn from_mavtype(mavtype: u8) -> Self {
        match mavtype {
            2 | 3 | 4 | 13 | 14 | 15 | 29 => VehicleKind::Copter,
            1 | 19..=22 => VehicleKind::Plane,
            10 | 11 => VehicleKind::Rover,
            12 => VehicleKind::Sub,
            5 => VehicleKind::Tracker,
            _ => VehicleKind::Unknown,
        }
    }

    fn table(self) -> &'static [(u32, &'static str)] {
        match self {
            VehicleKind::Copter => COPTER,
            VehicleKind::Plane => PLANE,
            VehicleKind::Rover => ROVER,
            VehicleKind::Sub => SUB,
            VehicleKind::Tracker => TRACKER,
            VehicleKind::Unknown => &[],
        }
    }
}

const COPTER: &[(u32, &str)] = &[
    (0, "STABILIZE"), (1, "ACRO"), (2, "ALT_HOLD"), (3, "AUTO"), (4, "GUIDED"),
    (5, "LOITER"), (6, "RTL"), (7, "CIRCLE"), (8, "POSITION"), (9, "LAND"),
    (10, "OF_LOITER"), (11, "DRIFT"), (13, "SPORT"), (14, "FLIP"), (15, "AUTOTUNE"),
    (16, "POSHOLD"), (17, "BRAKE"), (18, "THROW"), (19, "AVOID_ADSB"),
    (20, "GUIDED_NOGPS"), (21, "SMART_RTL"),
];

const PLANE: &[(u32, &str)] = &[
    (0, "MANUAL"), (1, "CIRCLE"), (2, "STABILIZE"), (3, "TRAINING"), (4, "ACRO"),
    (5, "FBWA"), (6, "FBWB"), (7, "CRUISE"), (8, "AUTOTUNE"), (10, "AUTO"),
    (11, "RTL"), (12, "LOITER"), (13, "TAKEOFF"), (14, "AVOID_ADSB"), (15, "GUIDED"),
    (16, "INITIALISING"), (17, "QSTABILIZE"), (18, "QHOVER"), (19, "QLOITER"),
    (20, "QLAND"), (21, "QRTL"),
];

const ROVER: &[(u32, &str)] = &[
    (0, "MANUAL"), (1, "ACRO"), (2, "LEARNING"), (3, "STEERING"), (4, "HOLD"),
    (5, "LOITER"), (6, "FOLLOW"), (7, "SIMPLE"), (10, "AUTO"), (11, "RTL"),
    (12, "SMART_RTL"), (15, "GUIDED"), (16, "INITIALISING"),
];

const SUB: &[(u32, &str)] = &[
    (0, "STABILIZE"), (1, "ACRO"), (2, "ALT_HOLD"), (3, "AUTO"), (4, "GUIDED"),
    (7, "CIRCLE"), (9, "SURFACE"), (16, "POSHOLD"), (19, "MANUAL"),
];

const TRACKER: &[(u32, &str)] = &[
    (0, "MANUAL"), (1, "STOP"), (2, "SCAN"), (10, "AUTO"), (16, "INITIALISING"),
];

/// Mode name for a heartbeat. Unmapped numbers come back as `Mode(n)`.
pub fn mode_name(hb: &HeartbeatData) -> String {
    if hb.base_mode & MAV_MODE_FLAG_CUSTOM_MODE_ENABLED == 0 {
        return format!("Mode(0x{:08x})", hb.base_mode);
    }
    VehicleKind::from_mavtype(hb.mavtype)
        .table()
        .iter()
        .find(|(n, _)| *n == hb.custom_mode)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Mode({})", hb.custom_mode))
}

/// Custom mode number for `name` (case-insensitive).
pub fn mode_number(kind: VehicleKind, name: &str) -> Option<u32> {
    kind.table()
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(num, _)| *num)
}

pub fn mode_names(kind: VehicleKind) -> Vec<&'static str> {
    kind.table().iter().map(|(_, n)| *n).collect()
}
