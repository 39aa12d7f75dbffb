//! Rigid-body transform primitives for the published frame tree.
//!
//! # Example
//!
//! ```rust
//! use posefuse_perception::transform::Transform3D;
//!
//! let ft = Transform3D::planar(1.0, 2.0, 0.0).to_frame_transform(
//!     "tamp_map",
//!     "base_link",
//!     chrono::Utc::now(),
//! );
//! assert_eq!(ft.translation, [1.0, 2.0, 0.0]);
//! assert_eq!(ft.rotation, [0.0, 0.0, 0.0, 1.0]);
//! ```

use posefuse_types::{FrameTransform, Stamp};

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub fn identity() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Rotation by `yaw` radians about +Z (roll = pitch = 0).
    pub fn from_yaw(yaw: f64) -> Self {
        let (s, c) = (yaw * 0.5).sin_cos();
        Self {
            w: c,
            x: 0.0,
            y: 0.0,
            z: s,
        }
    }

    /// Wire order used by [`FrameTransform`]: `[x, y, z, w]`.
    pub fn to_xyzw(self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

/// Pose of a child frame in its parent: a point expressed in the child is
/// rotated by `rotation`, then offset by `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// A pure translation.
    pub fn offset(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quaternion::identity(),
        }
    }

    /// A planar pose: `(x, y)` on the ground plane, heading `yaw`.
    pub fn planar(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            translation: Vec3::new(x, y, 0.0),
            rotation: Quaternion::from_yaw(yaw),
        }
    }

    /// Stamp this edge for the wire.
    pub fn to_frame_transform(self, parent: &str, child: &str, stamp: Stamp) -> FrameTransform {
        FrameTransform {
            parent_frame: parent.to_string(),
            child_frame: child.to_string(),
            translation: self.translation.to_array(),
            rotation: self.rotation.to_xyzw(),
            stamp,
        }
    }
}
