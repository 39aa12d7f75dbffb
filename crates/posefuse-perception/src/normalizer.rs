//! Sensor normalization.
//!
//! Translates raw position and motion samples into the estimator's
//! conventions (radians, heading 0 = East and counter-clockwise positive,
//! body-frame lateral velocity left positive) and keeps the bookkeeping the
//! fusion step needs: the newest sample per channel and the time the
//! position last actually moved.
//!
//! [`SensorNormalizer::snapshot`] hands out a [`NormalizedSnapshot`] by value,
//! so readers always see one consistent set of samples.

use std::f64::consts::PI;

use posefuse_types::{RawMotionSample, RawPositionSample, Stamp};

/// Above this forward speed (m/s) a repeated latitude means the position
/// sensor has not produced a new fix.
const MOVING_SPEED: f64 = 1.0;

/// Wrap an angle into `(-π, π]` by repeated ±2π steps.
///
/// Iterative on purpose: the boundary behaviour (`π` stays `π`, `-π` becomes
/// `π`) must match the upstream convention bit for bit.
pub fn wrap_angle(mut psi: f64) -> f64 {
    if !psi.is_finite() {
        return psi;
    }
    while psi > PI {
        psi -= 2.0 * PI;
    }
    while psi <= -PI {
        psi += 2.0 * PI;
    }
    psi
}

/// Compass heading (degrees, 0 = North, clockwise) → `psi` (radians,
/// 0 = East, counter-clockwise) in `(-π, π]`.
pub fn compass_to_psi(heading_deg: f64) -> f64 {
    wrap_angle((PI / 180.0) * (90.0 - heading_deg))
}

/// Inverse of [`compass_to_psi`]: `psi` → compass heading in `[0, 360)`.
pub fn psi_to_compass(psi: f64) -> f64 {
    let heading = (90.0 - psi.to_degrees()).rem_euclid(360.0);
    // Tiny negative residues land just below 360.
    if heading >= 360.0 - 1e-9 { 0.0 } else { heading }
}

/// A position sample in estimator conventions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPosition {
    pub lat: f64,
    pub lon: f64,
    /// Heading, radians in `(-π, π]`, 0 = East, CCW positive.
    pub psi: f64,
    /// Heading rate, rad/s, CCW positive.
    pub psidot: f64,
    /// Forward speed as reported by the position sensor, m/s.
    pub forward_velocity: f64,
    /// Lateral body velocity, left positive, m/s.
    pub cross_velocity: f64,
    /// Freshness stamp (processing time for non-live input).
    pub stamp: Stamp,
}

impl NormalizedPosition {
    /// Apply the unit and sign conventions to a raw sample.
    pub fn from_raw(raw: &RawPositionSample) -> Self {
        Self {
            lat: raw.lat,
            lon: raw.lon,
            psi: compass_to_psi(raw.heading_deg),
            psidot: -raw.heading_rate_deg.to_radians(),
            forward_velocity: raw.forward_velocity,
            cross_velocity: -raw.cross_velocity,
            stamp: raw.stamp,
        }
    }
}

/// A vehicle-bus sample in estimator conventions (already native).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedMotion {
    pub yaw_rate: f64,
    pub forward_velocity: f64,
    pub stamp: Stamp,
}

/// Everything the fusion step reads in one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedSnapshot {
    pub position: NormalizedPosition,
    pub motion: NormalizedMotion,
    /// Last time the position fix actually changed (or was trusted to).
    /// Position staleness is measured against this, not the arrival time.
    pub latest_position_update: Stamp,
}

/// Per-channel ingestion state.
#[derive(Debug, Clone)]
pub struct SensorNormalizer {
    /// Live input keeps producer stamps; replayed or simulated input is
    /// re-stamped with the processing clock.
    live: bool,
    position: Option<NormalizedPosition>,
    motion: Option<NormalizedMotion>,
    latest_position_update: Option<Stamp>,
}

impl SensorNormalizer {
    pub fn new(live: bool) -> Self {
        Self {
            live,
            position: None,
            motion: None,
            latest_position_update: None,
        }
    }

    /// Ingest a position fix received at processing time `now`.
    pub fn ingest_position(&mut self, raw: &RawPositionSample, now: Stamp) -> NormalizedPosition {
        if self.position_changed(raw) {
            self.latest_position_update = Some(now);
        }

        let mut normalized = NormalizedPosition::from_raw(raw);
        if !self.live {
            normalized.stamp = now;
        }
        self.position = Some(normalized);
        normalized
    }

    /// Ingest a vehicle-bus sample received at processing time `now`.
    pub fn ingest_motion(&mut self, raw: &RawMotionSample, now: Stamp) -> NormalizedMotion {
        let normalized = NormalizedMotion {
            yaw_rate: raw.yaw_rate,
            forward_velocity: raw.forward_velocity,
            stamp: if self.live { raw.stamp } else { now },
        };
        self.motion = Some(normalized);
        normalized
    }

    /// `true` once at least one position fix has been ingested.
    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    /// `true` once at least one motion sample has been ingested.
    pub fn has_motion(&self) -> bool {
        self.motion.is_some()
    }

    /// The newest consistent snapshot, or `None` until both channels have
    /// delivered.
    pub fn snapshot(&self) -> Option<NormalizedSnapshot> {
        Some(NormalizedSnapshot {
            position: self.position?,
            motion: self.motion?,
            latest_position_update: self.latest_position_update?,
        })
    }

    /// Edge detector for the position-update stamp.
    ///
    /// While the previous fix reported motion, only a new latitude counts.
    /// At low speed fix noise dominates, so every sample counts.
    fn position_changed(&self, raw: &RawPositionSample) -> bool {
        match &self.position {
            Some(prev) if prev.forward_velocity >= MOVING_SPEED => prev.lat != raw.lat,
            _ => true,
        }
    }
}
