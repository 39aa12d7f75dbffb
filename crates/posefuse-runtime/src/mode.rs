//! Input-source selection and startup gating.
//!
//! [`SourceMode`] is parsed once from configuration. [`wait_for_inputs`]
//! then holds the process until every channel the mode needs has delivered
//! at least once.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use posefuse_middleware::Topic;
use posefuse_types::{PoseError, SensorChannel};
use serde::Serialize;
use tracing::info;

/// Which feed drives the estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Real sensors: position fix, motion and origin, fused every tick.
    Polled,
    /// Simulator ground truth, republished verbatim on arrival.
    GroundTruth,
}

impl SourceMode {
    /// Inbound topics this mode listens on.
    pub fn inbound_topics(self) -> &'static [Topic] {
        match self {
            SourceMode::Polled => &[Topic::PositionFix, Topic::Motion, Topic::OriginPose],
            SourceMode::GroundTruth => &[Topic::GroundTruth],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceMode::Polled => "polled",
            SourceMode::GroundTruth => "ground_truth",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceMode {
    type Err = PoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "polled" => Ok(SourceMode::Polled),
            "ground_truth" => Ok(SourceMode::GroundTruth),
            other => Err(PoseError::Misconfiguration(format!(
                "unknown system_setup {other:?}; expected \"polled\" or \"ground_truth\""
            ))),
        }
    }
}

/// How a startup wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    ShutdownRequested,
}

/// Poll `missing` every `period` until it reports nothing outstanding.
///
/// While waiting, the outstanding channels are logged at most once per
/// second. Returns [`WaitOutcome::ShutdownRequested`] as soon as `shutdown`
/// is set.
pub async fn wait_for_inputs<F>(missing: F, period: Duration, shutdown: &AtomicBool) -> WaitOutcome
where
    F: Fn() -> Vec<SensorChannel>,
{
    let limiter: DefaultDirectRateLimiter = RateLimiter::direct(Quota::per_second(NonZeroU32::MIN));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return WaitOutcome::ShutdownRequested;
        }
        let outstanding = missing();
        if outstanding.is_empty() {
            return WaitOutcome::Ready;
        }
        if limiter.check().is_ok() {
            let names: Vec<String> = outstanding.iter().map(ToString::to_string).collect();
            info!(missing = %names.join(", "), "waiting for inputs");
        }
        tokio::time::sleep(period).await;
    }
}
