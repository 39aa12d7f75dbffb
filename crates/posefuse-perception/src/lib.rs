//! `posefuse-perception` – pose estimation core.
//!
//! Everything here is synchronous and free of I/O apart from loading the
//! vehicle geometry; the runtime crate drives it at a fixed rate.
//!
//! # Modules
//!
//! - [`projection`] – WGS-84 → UTM projection and origin-relative offsets.
//! - [`normalizer`] – [`SensorNormalizer`][normalizer::SensorNormalizer]:
//!   converts raw samples to SI units and the planar heading convention, and
//!   tracks when the fix last genuinely moved.
//! - [`fusion`] – [`PoseFusionEngine`][fusion::PoseFusionEngine]: picks
//!   between dead reckoning and the raw fix each tick.
//! - [`transform`] – rigid-body primitives for the published edges.
//! - [`frame_tree`] – [`FrameTreePublisher`][frame_tree::FrameTreePublisher]:
//!   derives the vehicle's frame chain from the current state.

pub mod frame_tree;
pub mod fusion;
pub mod normalizer;
pub mod projection;
pub mod transform;

pub use frame_tree::{FrameTreePublisher, VehicleGeometry};
pub use fusion::{Branch, FusionConfig, FusionOutcome, PoseFusionEngine};
pub use normalizer::{NormalizedSnapshot, SensorNormalizer};
pub use projection::{UtmCoordinate, project};
