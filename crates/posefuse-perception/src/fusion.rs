//! Pose fusion engine.
//!
//! Combines the newest position fix and vehicle-bus sample into one
//! [`VehicleState`] by choosing, every tick, between two deterministic
//! estimators:
//!
//! - **Dead reckoning** – the fix is recent and the vehicle is moving, so the
//!   projected fix is extrapolated by the body velocity rotated into the map
//!   frame over the fix age:
//!   ```text
//!   vX = vx·cos ψ − vy·sin ψ        X = E − x0 + vX·Δt_pos
//!   vY = vx·sin ψ + vy·cos ψ        Y = N − y0 + vY·Δt_pos
//!   ```
//! - **Raw fix** – otherwise the projected fix is used as-is.
//!
//! The switch is a hard threshold (`Δt_pos ≤ margin ∧ vx > min_speed`) with
//! no hysteresis; toggling right at the thresholds is expected.
//!
//! # Example
//!
//! ```rust
//! use posefuse_perception::fusion::{Branch, FusionConfig, select_branch};
//!
//! let cfg = FusionConfig::default();
//! assert_eq!(select_branch(0.1, 2.0, &cfg), Branch::DeadReckoning);
//! assert_eq!(select_branch(0.1, 1.0, &cfg), Branch::RawFix);
//! assert_eq!(select_branch(0.3, 2.0, &cfg), Branch::RawFix);
//! ```

use posefuse_types::{
    Anomaly, GroundTruthSample, OriginReference, SensorChannel, Stamp, VehicleState,
    seconds_between,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::normalizer::{NormalizedSnapshot, wrap_angle};
use crate::projection::{UtmCoordinate, project, to_origin_relative};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables of the selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Maximum sample age (s) before a channel is reported stale and dead
    /// reckoning is refused.
    pub staleness_margin: f64,
    /// Dead reckoning needs the vehicle strictly faster than this (m/s).
    pub dead_reckoning_min_speed: f64,
    /// Constant added to the sensor heading (rad), for antenna mounting
    /// calibration.
    pub heading_offset: f64,
    /// Also extrapolate the heading by `psidot·Δt_pos` while dead reckoning.
    pub extrapolate_heading: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            staleness_margin: 0.2,
            dead_reckoning_min_speed: 1.0,
            heading_offset: 0.0,
            extrapolate_heading: false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Policy primitives
// ────────────────────────────────────────────────────────────────────────────

/// Which estimator produced a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    DeadReckoning,
    RawFix,
    /// The fix could not be projected; the previous pose was kept.
    Hold,
}

/// The dead-reckoning / raw-fix decision. Pure in its two inputs.
pub fn select_branch(delta_t_pos: f64, vx: f64, config: &FusionConfig) -> Branch {
    if delta_t_pos <= config.staleness_margin && vx > config.dead_reckoning_min_speed {
        Branch::DeadReckoning
    } else {
        Branch::RawFix
    }
}

/// Rotate a body-frame velocity into the map frame by heading `psi`.
pub fn rotate_body_velocity(vx: f64, vy: f64, psi: f64) -> (f64, f64) {
    let (sin, cos) = psi.sin_cos();
    (vx * cos - vy * sin, vx * sin + vy * cos)
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

/// Result of one fusion step.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutcome {
    pub state: VehicleState,
    pub branch: Branch,
    /// Age of the last position update at `now`, seconds.
    pub delta_t_pos: f64,
    /// Age of the last motion sample at `now`, seconds.
    pub delta_t_motion: f64,
    /// Conditions to report; none of them changed the result.
    pub anomalies: Vec<Anomaly>,
}

/// Owns the estimated [`VehicleState`] and advances it.
#[derive(Debug, Clone)]
pub struct PoseFusionEngine {
    config: FusionConfig,
    state: VehicleState,
}

impl PoseFusionEngine {
    pub fn new(config: FusionConfig, stamp: Stamp) -> Self {
        Self {
            config,
            state: VehicleState::at_rest(stamp),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// The most recent estimate.
    pub fn state(&self) -> VehicleState {
        self.state
    }

    /// Run one fusion step: project the snapshot's fix and estimate.
    ///
    /// A fix that cannot be projected is reported as
    /// [`Anomaly::InvalidFix`]; velocities are still refreshed but the
    /// previous position and heading are kept.
    pub fn update(
        &mut self,
        snapshot: &NormalizedSnapshot,
        origin: &OriginReference,
        now: Stamp,
    ) -> FusionOutcome {
        match project(snapshot.position.lat, snapshot.position.lon) {
            Ok(fix) => self.estimate(&fix, snapshot, origin, now),
            Err(e) => {
                let (delta_t_pos, delta_t_motion, mut anomalies) = self.ages(snapshot, now);
                anomalies.push(Anomaly::InvalidFix {
                    lat: snapshot.position.lat,
                    lon: snapshot.position.lon,
                    reason: e.to_string(),
                });
                self.refresh_velocities(snapshot, now);
                FusionOutcome {
                    state: self.state,
                    branch: Branch::Hold,
                    delta_t_pos,
                    delta_t_motion,
                    anomalies,
                }
            }
        }
    }

    /// Estimate from an already projected fix.
    pub fn estimate(
        &mut self,
        fix: &UtmCoordinate,
        snapshot: &NormalizedSnapshot,
        origin: &OriginReference,
        now: Stamp,
    ) -> FusionOutcome {
        let (delta_t_pos, delta_t_motion, mut anomalies) = self.ages(snapshot, now);
        self.refresh_velocities(snapshot, now);

        let ((x_rel, y_rel), mismatch) = to_origin_relative(fix, origin);
        anomalies.extend(mismatch);

        let heading = snapshot.position.psi + self.config.heading_offset;
        let branch = select_branch(delta_t_pos, self.state.vx, &self.config);
        match branch {
            Branch::DeadReckoning => {
                let psi = if self.config.extrapolate_heading {
                    heading + self.state.psidot * delta_t_pos
                } else {
                    heading
                };
                let (v_x, v_y) = rotate_body_velocity(self.state.vx, self.state.vy, psi);
                self.state.psi = wrap_angle(psi);
                self.state.x = x_rel + v_x * delta_t_pos;
                self.state.y = y_rel + v_y * delta_t_pos;
            }
            Branch::RawFix | Branch::Hold => {
                self.state.psi = wrap_angle(heading);
                self.state.x = x_rel;
                self.state.y = y_rel;
            }
        }

        debug!(
            branch = ?branch,
            delta_t_pos,
            x = self.state.x,
            y = self.state.y,
            psi = self.state.psi,
            "fused state"
        );

        FusionOutcome {
            state: self.state,
            branch,
            delta_t_pos,
            delta_t_motion,
            anomalies,
        }
    }

    /// Replace the state with a simulator ground-truth sample, verbatim.
    pub fn apply_ground_truth(&mut self, sample: &GroundTruthSample, now: Stamp) -> VehicleState {
        self.state = VehicleState {
            x: sample.x,
            y: sample.y,
            psi: sample.yaw,
            psidot: sample.yaw_rate,
            vx: sample.vx,
            vy: sample.vy,
            stamp: now,
        };
        self.state
    }

    fn ages(&self, snapshot: &NormalizedSnapshot, now: Stamp) -> (f64, f64, Vec<Anomaly>) {
        let delta_t_pos = seconds_between(now, snapshot.latest_position_update);
        let delta_t_motion = seconds_between(now, snapshot.motion.stamp);

        let mut anomalies = Vec::new();
        if delta_t_pos > self.config.staleness_margin {
            anomalies.push(Anomaly::StaleInput {
                channel: SensorChannel::Position,
                age_s: delta_t_pos,
            });
        }
        if delta_t_motion > self.config.staleness_margin {
            anomalies.push(Anomaly::StaleInput {
                channel: SensorChannel::Motion,
                age_s: delta_t_motion,
            });
        }
        (delta_t_pos, delta_t_motion, anomalies)
    }

    fn refresh_velocities(&mut self, snapshot: &NormalizedSnapshot, now: Stamp) {
        self.state.psidot = snapshot.motion.yaw_rate;
        self.state.vx = snapshot.motion.forward_velocity;
        self.state.vy = snapshot.position.cross_velocity;
        self.state.stamp = now;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
