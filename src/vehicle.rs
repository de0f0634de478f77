//! Vehicle detection and flight mode naming
//!
//! ArduPilot writes its firmware banner (e.g. "ArduCopter V4.5.1 (1d2f0d4f)")
//! into MSG records at boot. The banner decides which flight mode table maps
//! the numeric `Mode` column of MODE records to a name.

use crate::types::LogMessage;
use semver::Version;
use serde::Serialize;

/// Vehicle family, as announced by the firmware banner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum VehicleKind {
    Copter,
    Plane,
    Rover,
    Sub,
    #[default]
    Unknown,
}

/// Vehicle and firmware detected in a log
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleInfo {
    pub kind: VehicleKind,
    pub firmware: Option<String>,
    pub version: Option<String>,
}

impl VehicleInfo {
    /// Scan MSG records for the firmware banner
    pub fn detect(messages: &[LogMessage]) -> Self {
        for msg in messages.iter().filter(|m| m.msg_type() == "MSG") {
            let Some(text) = msg.get("Message").and_then(|v| v.as_str()) else {
                continue;
            };
            let kind = detect_vehicle_kind(text);
            if kind != VehicleKind::Unknown {
                return Self {
                    kind,
                    firmware: Some(text.to_string()),
                    version: extract_firmware_version(text).map(|v| v.to_string()),
                };
            }
        }
        Self::default()
    }

    pub fn mode_name(&self, mode_number: u64) -> String {
        mode_name(self.kind, mode_number)
    }
}

/// Vehicle family from a firmware banner
pub fn detect_vehicle_kind(banner: &str) -> VehicleKind {
    let lower = banner.to_ascii_lowercase();
    if lower.contains("arducopter") {
        VehicleKind::Copter
    } else if lower.contains("arduplane") {
        VehicleKind::Plane
    } else if lower.contains("rover") {
        VehicleKind::Rover
    } else if lower.contains("ardusub") {
        VehicleKind::Sub
    } else {
        VehicleKind::Unknown
    }
}

/// Extract version from banner strings like "ArduCopter V4.5.1 (1d2f0d4f)"
pub fn extract_firmware_version(banner: &str) -> Option<Version> {
    banner.split_whitespace().find_map(|word| {
        let candidate = word.trim_start_matches(['V', 'v']);
        Version::parse(candidate).ok().or_else(|| {
            // two-part versions such as "V4.5"
            let padded = format!("{}.0", candidate);
            candidate
                .chars()
                .next()
                .filter(char::is_ascii_digit)
                .and_then(|_| Version::parse(&padded).ok())
        })
    })
}

/// Flight mode name for a numeric mode of the given vehicle family.
///
/// Logs without a recognisable banner use the Plane table.
pub fn mode_name(kind: VehicleKind, mode_number: u64) -> String {
    let table: &[(u64, &str)] = match kind {
        VehicleKind::Copter => COPTER_MODES,
        VehicleKind::Rover => ROVER_MODES,
        VehicleKind::Sub => SUB_MODES,
        VehicleKind::Plane | VehicleKind::Unknown => PLANE_MODES,
    };
    table
        .iter()
        .find(|(num, _)| *num == mode_number)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Mode({})", mode_number))
}

const COPTER_MODES: &[(u64, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (5, "LOITER"),
    (6, "RTL"),
    (7, "CIRCLE"),
    (9, "LAND"),
    (11, "DRIFT"),
    (13, "SPORT"),
    (14, "FLIP"),
    (15, "AUTOTUNE"),
    (16, "POSHOLD"),
    (17, "BRAKE"),
    (18, "THROW"),
    (19, "AVOID_ADSB"),
    (20, "GUIDED_NOGPS"),
    (21, "SMART_RTL"),
    (22, "FLOWHOLD"),
    (23, "FOLLOW"),
    (24, "ZIGZAG"),
    (25, "SYSTEMID"),
    (26, "AUTOROTATE"),
    (27, "AUTO_RTL"),
    (28, "TURTLE"),
];

const PLANE_MODES: &[(u64, &str)] = &[
    (0, "MANUAL"),
    (1, "CIRCLE"),
    (2, "STABILIZE"),
    (3, "TRAINING"),
    (4, "ACRO"),
    (5, "FBWA"),
    (6, "FBWB"),
    (7, "CRUISE"),
    (8, "AUTOTUNE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "LOITER"),
    (13, "TAKEOFF"),
    (14, "AVOID_ADSB"),
    (15, "GUIDED"),
    (17, "QSTABILIZE"),
    (18, "QHOVER"),
    (19, "QLOITER"),
    (20, "QLAND"),
    (21, "QRTL"),
    (22, "QAUTOTUNE"),
    (23, "QACRO"),
    (24, "THERMAL"),
    (25, "LOITERALTQLAND"),
];

const ROVER_MODES: &[(u64, &str)] = &[
    (0, "MANUAL"),
    (1, "ACRO"),
    (3, "STEERING"),
    (4, "HOLD"),
    (5, "LOITER"),
    (6, "FOLLOW"),
    (7, "SIMPLE"),
    (8, "DOCK"),
    (9, "CIRCLE"),
    (10, "AUTO"),
    (11, "RTL"),
    (12, "SMART_RTL"),
    (15, "GUIDED"),
];

const SUB_MODES: &[(u64, &str)] = &[
    (0, "STABILIZE"),
    (1, "ACRO"),
    (2, "ALT_HOLD"),
    (3, "AUTO"),
    (4, "GUIDED"),
    (7, "CIRCLE"),
    (9, "SURFACE"),
    (16, "POSHOLD"),
    (19, "MANUAL"),
];
