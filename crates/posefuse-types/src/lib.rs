//! `posefuse-types` – shared data model for the pose estimator.
//!
//! Every crate in the workspace speaks in these types: raw sensor samples as
//! they arrive from the outside world, the estimated [`VehicleState`], the
//! frame-tree wire format, the [`Event`] envelope routed over the bus, and the
//! error / anomaly taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Timestamp attached to samples, states and transforms.
pub type Stamp = DateTime<Utc>;

/// Seconds elapsed from `earlier` to `later` (negative when `later` is
/// actually earlier). Saturates to ±infinity on overflow.
pub fn seconds_between(later: Stamp, earlier: Stamp) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 * 1e-6,
        None if delta > chrono::TimeDelta::zero() => f64::INFINITY,
        None => f64::NEG_INFINITY,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Vehicle state
// ────────────────────────────────────────────────────────────────────────────

/// Planar vehicle state in the local map frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Position along the local map X axis (East), metres.
    pub x: f64,
    /// Position along the local map Y axis (North), metres.
    pub y: f64,
    /// Heading in `(-π, π]`, 0 = East, counter-clockwise positive.
    pub psi: f64,
    /// Yaw rate, rad/s, counter-clockwise positive.
    pub psidot: f64,
    /// Longitudinal body-frame velocity, m/s.
    pub vx: f64,
    /// Lateral body-frame velocity, m/s (left positive).
    pub vy: f64,
    pub stamp: Stamp,
}

impl VehicleState {
    /// A vehicle at rest at the map origin.
    pub fn at_rest(stamp: Stamp) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            psi: 0.0,
            psidot: 0.0,
            vx: 0.0,
            vy: 0.0,
            stamp,
        }
    }
}

/// UTM origin of the local map frame, broadcast once by the mapping side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginReference {
    /// Easting of the map origin, metres.
    pub x0: f64,
    /// Northing of the map origin, metres.
    pub y0: f64,
    pub zone_number: u8,
    pub zone_letter: char,
}

// ────────────────────────────────────────────────────────────────────────────
// Raw inbound samples
// ────────────────────────────────────────────────────────────────────────────

/// A GNSS/INS position fix in the producer's native conventions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPositionSample {
    /// Latitude, degrees.
    pub lat: f64,
    /// Longitude, degrees.
    pub lon: f64,
    /// Compass heading, degrees, 0 = North, clockwise positive.
    pub heading_deg: f64,
    /// Heading rate, deg/s, clockwise positive.
    pub heading_rate_deg: f64,
    /// Forward speed reported by the position sensor, m/s.
    pub forward_velocity: f64,
    /// Lateral velocity, sensor convention (right positive), m/s.
    pub cross_velocity: f64,
    pub stamp: Stamp,
}

/// Yaw rate and speed read off the vehicle bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawMotionSample {
    /// Yaw rate, rad/s, counter-clockwise positive.
    pub yaw_rate: f64,
    /// Longitudinal speed, m/s.
    pub forward_velocity: f64,
    pub stamp: Stamp,
}

/// Simulator ground-truth pose, already in local map conventions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthSample {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub yaw_rate: f64,
    pub vx: f64,
    pub vy: f64,
    pub stamp: Stamp,
}

// ────────────────────────────────────────────────────────────────────────────
// Frame tree wire format
// ────────────────────────────────────────────────────────────────────────────

/// One edge of the rigid-body frame hierarchy as sent to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    pub parent_frame: String,
    pub child_frame: String,
    /// Translation of the child origin in the parent frame, metres.
    pub translation: [f64; 3],
    /// Rotation as a unit quaternion in `[x, y, z, w]` order.
    pub rotation: [f64; 4],
    pub stamp: Stamp,
}

// ────────────────────────────────────────────────────────────────────────────
// Anomalies
// ────────────────────────────────────────────────────────────────────────────

/// Inbound sample channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    Position,
    Motion,
    Origin,
    GroundTruth,
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorChannel::Position => write!(f, "position"),
            SensorChannel::Motion => write!(f, "motion"),
            SensorChannel::Origin => write!(f, "origin"),
            SensorChannel::GroundTruth => write!(f, "ground_truth"),
        }
    }
}

/// A reportable, non-fatal condition. Estimation always continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// A fix projected into a different UTM zone than the map origin.
    ZoneMismatch {
        fix_zone_number: u8,
        fix_zone_letter: char,
        origin_zone_number: u8,
        origin_zone_letter: char,
    },
    /// The newest sample on a channel is older than the staleness margin.
    StaleInput { channel: SensorChannel, age_s: f64 },
    /// A fix could not be projected at all; the previous position is held.
    InvalidFix { lat: f64, lon: f64, reason: String },
    /// A scheduler tick took longer than the configured period.
    DeadlineExceeded {
        period_s: f64,
        total_s: f64,
        publish_s: f64,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ZoneMismatch {
                fix_zone_number,
                fix_zone_letter,
                origin_zone_number,
                origin_zone_letter,
            } => write!(
                f,
                "UTM zone mismatch: fix in {fix_zone_number}{fix_zone_letter}, origin in {origin_zone_number}{origin_zone_letter}"
            ),
            Anomaly::StaleInput { channel, age_s } => {
                write!(f, "old {channel} measurement: age {age_s:.3} s")
            }
            Anomaly::InvalidFix { lat, lon, reason } => {
                write!(f, "unusable fix ({lat}, {lon}): {reason}")
            }
            Anomaly::DeadlineExceeded {
                period_s,
                total_s,
                publish_s,
            } => write!(
                f,
                "compute time exceeding dt ({period_s:.4} s): total {total_s:.4} s, frame tree {publish_s:.4} s"
            ),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: Stamp,
    /// e.g. `"posefuse-runtime::estimator"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a freshly stamped envelope.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    PositionFix(RawPositionSample),
    Motion(RawMotionSample),
    Origin(OriginReference),
    GroundTruth(GroundTruthSample),
    State(VehicleState),
    FrameTree(Vec<FrameTransform>),
    Diagnostic(Anomaly),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Errors that stop startup or reject an operation outright.
///
/// Steady-state estimation never returns these; it reports [`Anomaly`]
/// values instead.
#[derive(Error, Debug)]
pub enum PoseError {
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Vehicle geometry error: {0}")]
    Geometry(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn stamp() -> Stamp {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn seconds_between_handles_sub_second_deltas() {
        let t0 = stamp();
        let t1 = t0 + TimeDelta::milliseconds(150);
        assert!((seconds_between(t1, t0) - 0.15).abs() < 1e-9);
        assert!((seconds_between(t0, t1) + 0.15).abs() < 1e-9);
    }

    #[test]
    fn event_payload_serializes_with_snake_case_tag() {
        let payload = EventPayload::Motion(RawMotionSample {
            yaw_rate: 0.1,
            forward_velocity: 3.0,
            stamp: stamp(),
        });
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.starts_with("{\"motion\":"), "got {json}");
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, EventPayload::Motion(m) if m.forward_velocity == 3.0));
    }

    #[test]
    fn event_new_stamps_source() {
        let event = Event::new("posefuse-types::test", EventPayload::State(VehicleState::at_rest(stamp())));
        assert_eq!(event.source, "posefuse-types::test");
        assert!(matches!(event.payload, EventPayload::State(s) if s.x == 0.0));
    }

    #[test]
    fn anomaly_display_is_descriptive() {
        let zone = Anomaly::ZoneMismatch {
            fix_zone_number: 33,
            fix_zone_letter: 'V',
            origin_zone_number: 32,
            origin_zone_letter: 'V',
        };
        assert!(zone.to_string().contains("33V"));

        let stale = Anomaly::StaleInput {
            channel: SensorChannel::Position,
            age_s: 0.5,
        };
        assert!(stale.to_string().contains("position"));
    }

    #[test]
    fn anomaly_serializes_with_kind_tag() {
        let a = Anomaly::StaleInput {
            channel: SensorChannel::Motion,
            age_s: 0.3,
        };
        let json = serde_json::to_string(&a).unwrap();
        assert!(json.contains("\"kind\":\"stale_input\""));
        assert!(json.contains("\"channel\":\"motion\""));
    }

    #[test]
    fn pose_error_display() {
        let err = PoseError::Misconfiguration("system_setup = \"bogus\"".to_string());
        assert!(err.to_string().contains("Misconfiguration"));
        assert!(err.to_string().contains("bogus"));
    }

    fn kind(err: &PoseError) -> &'static str {
        match err {
            PoseError::Misconfiguration(_) => "Misconfiguration",
            PoseError::Geometry(_) => "Vehicle geometry",
            PoseError::Config(_) => "Config",
            PoseError::Projection(_) => "Projection",
            PoseError::Io { .. } => "I/O",
        }
    }

    #[test]
    fn every_pose_error_names_its_kind() {
        let errors = [
            PoseError::Misconfiguration("mode".into()),
            PoseError::Geometry("cog.chassis".into()),
            PoseError::Config("dt".into()),
            PoseError::Projection("latitude".into()),
            PoseError::Io {
                path: "distances.yaml".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            },
        ];
        for err in &errors {
            assert!(err.to_string().starts_with(kind(err)), "{err}");
        }
    }
}
