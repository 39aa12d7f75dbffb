//! Vehicle geometry and the frame-tree publisher.
//!
//! The vehicle is described by a fixed chain of frames:
//!
//! ```text
//! tamp_map ─► base_link ─► cog ─► chassis ─┬─► left_rear_wheel_joint
//!  (dynamic)   (static)   (static)         ├─► right_rear_wheel_joint
//!                                          ├─► left_steering_hinge
//!                                          └─► right_steering_hinge
//! ```
//!
//! `tamp_map → base_link` follows the estimated pose; every other edge is a
//! constant offset read from the vehicle's distance file. All edges are
//! re-stamped and re-emitted every tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use posefuse_types::{FrameTransform, PoseError, Stamp, VehicleState};
use serde::Deserialize;

use crate::transform::{Transform3D, Vec3};

/// Root of the local map.
pub const MAP_FRAME: &str = "tamp_map";
/// Vehicle body frame driven by the estimate.
pub const BODY_FRAME: &str = "base_link";

/// A static edge and the distance-file key holding its offset.
struct EdgeDef {
    parent: &'static str,
    child: &'static str,
    key: &'static str,
}

/// Static chain, root to leaf. The distance files key the left hinge by its
/// joint name.
const STATIC_LINKS: [EdgeDef; 6] = [
    EdgeDef {
        parent: "base_link",
        child: "cog",
        key: "cog",
    },
    EdgeDef {
        parent: "cog",
        child: "chassis",
        key: "chassis",
    },
    EdgeDef {
        parent: "chassis",
        child: "left_rear_wheel_joint",
        key: "left_rear_wheel_joint",
    },
    EdgeDef {
        parent: "chassis",
        child: "right_rear_wheel_joint",
        key: "right_rear_wheel_joint",
    },
    EdgeDef {
        parent: "chassis",
        child: "left_steering_hinge",
        key: "left_steering_hinge_joint",
    },
    EdgeDef {
        parent: "chassis",
        child: "right_steering_hinge",
        key: "right_steering_hinge",
    },
];

// ────────────────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D offset as written in the distance file.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Parent frame → child key → offset, as loaded from `distances.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct VehicleGeometry {
    entries: HashMap<String, HashMap<String, Offset>>,
}

impl VehicleGeometry {
    /// Distance file location for `robot_name` under `geometry_dir`.
    pub fn path_for(geometry_dir: &Path, robot_name: &str) -> PathBuf {
        geometry_dir
            .join(robot_name)
            .join("config")
            .join("distances.yaml")
    }

    /// Load the distance file for `robot_name`.
    pub fn load(geometry_dir: &Path, robot_name: &str) -> Result<Self, PoseError> {
        let path = Self::path_for(geometry_dir, robot_name);
        let raw = std::fs::read_to_string(&path).map_err(|source| PoseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
            .map_err(|e| PoseError::Geometry(format!("{}: {e}", path.display())))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PoseError> {
        serde_yaml::from_str(raw).map_err(|e| PoseError::Geometry(e.to_string()))
    }

    /// Offset of `key` below `parent`.
    pub fn offset(&self, parent: &str, key: &str) -> Option<Offset> {
        self.entries.get(parent)?.get(key).copied()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Publisher
// ────────────────────────────────────────────────────────────────────────────

/// A resolved static edge.
#[derive(Debug, Clone)]
struct StaticLink {
    parent: &'static str,
    child: &'static str,
    transform: Transform3D,
}

/// Derives the full frame tree from the current [`VehicleState`].
#[derive(Debug, Clone)]
pub struct FrameTreePublisher {
    links: Vec<StaticLink>,
}

impl FrameTreePublisher {
    /// Resolve every static edge from `geometry`.
    ///
    /// # Errors
    ///
    /// [`PoseError::Geometry`] naming every missing entry.
    pub fn new(geometry: &VehicleGeometry) -> Result<Self, PoseError> {
        let mut links = Vec::with_capacity(STATIC_LINKS.len());
        let mut missing = Vec::new();
        for edge in &STATIC_LINKS {
            match geometry.offset(edge.parent, edge.key) {
                Some(o) => links.push(StaticLink {
                    parent: edge.parent,
                    child: edge.child,
                    transform: Transform3D::offset(Vec3::new(o.x, o.y, o.z)),
                }),
                None => missing.push(format!("{}.{}", edge.parent, edge.key)),
            }
        }
        if !missing.is_empty() {
            return Err(PoseError::Geometry(format!(
                "missing entries: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { links })
    }

    /// The dynamic edge for `state`.
    pub fn body_transform(state: &VehicleState) -> Transform3D {
        Transform3D::planar(state.x, state.y, state.psi)
    }

    /// Every edge of the tree stamped with `stamp`: the dynamic edge first,
    /// then the static chain root to leaf.
    pub fn transforms(&self, state: &VehicleState, stamp: Stamp) -> Vec<FrameTransform> {
        let mut out = Vec::with_capacity(self.links.len() + 1);
        out.push(Self::body_transform(state).to_frame_transform(MAP_FRAME, BODY_FRAME, stamp));
        out.extend(
            self.links
                .iter()
                .map(|l| l.transform.to_frame_transform(l.parent, l.child, stamp)),
        );
        out
    }
}
