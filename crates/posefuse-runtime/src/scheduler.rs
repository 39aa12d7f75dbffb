//! [`FixedRateScheduler`] – cooperative periodic loop with overrun detection.
//!
//! Each iteration runs the task once, measures it, reports a
//! [`Anomaly::DeadlineExceeded`] when the tick took longer than the period,
//! and sleeps for whatever is left of the period. There is no drift
//! correction: an overrunning tick is followed immediately by the next one.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use posefuse_runtime::scheduler::{FixedRateScheduler, TickPhases};
//!
//! let scheduler = FixedRateScheduler::new(Duration::from_millis(20)).unwrap();
//! let fast = scheduler.check_deadline(Duration::from_millis(5), &TickPhases::default());
//! assert!(fast.is_none());
//! let slow = scheduler.check_deadline(Duration::from_millis(25), &TickPhases::default());
//! assert!(slow.is_some());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use posefuse_types::{Anomaly, PoseError};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timing breakdown of a single tick, reported by the task.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickPhases {
    /// Time spent handing results to the bus.
    pub publish: Duration,
}

/// Work driven by [`FixedRateScheduler`].
pub trait Periodic {
    /// Run one tick.
    fn run_once(&self) -> TickPhases;

    /// Called once for every tick that exceeded the period, after the
    /// warning has been logged.
    fn on_overrun(&self, _anomaly: &Anomaly) {}
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerReport {
    pub ticks: u64,
    pub overruns: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FixedRateScheduler {
    period: Duration,
}

impl FixedRateScheduler {
    /// # Errors
    ///
    /// [`PoseError::Misconfiguration`] for a zero period.
    pub fn new(period: Duration) -> Result<Self, PoseError> {
        if period.is_zero() {
            return Err(PoseError::Misconfiguration(
                "tick period must be positive".to_string(),
            ));
        }
        Ok(Self { period })
    }

    /// Build from a period in seconds (the `dt` config value).
    pub fn from_secs_f64(dt: f64) -> Result<Self, PoseError> {
        let period = Duration::try_from_secs_f64(dt)
            .map_err(|e| PoseError::Misconfiguration(format!("invalid dt {dt}: {e}")))?;
        Self::new(period)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// The overrun anomaly for a tick that took `total`, if any.
    pub fn check_deadline(&self, total: Duration, phases: &TickPhases) -> Option<Anomaly> {
        (total > self.period).then(|| Anomaly::DeadlineExceeded {
            period_s: self.period.as_secs_f64(),
            total_s: total.as_secs_f64(),
            publish_s: phases.publish.as_secs_f64(),
        })
    }

    /// Sleep left after a tick that took `elapsed`; zero after an overrun.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.period.saturating_sub(elapsed)
    }

    /// Drive `task` until `shutdown` is set.
    ///
    /// The flag is checked between ticks only, so an in-flight tick always
    /// completes.
    pub async fn run<T: Periodic + ?Sized>(&self, task: &T, shutdown: &AtomicBool) -> SchedulerReport {
        let mut report = SchedulerReport::default();
        while !shutdown.load(Ordering::SeqCst) {
            let started = Instant::now();
            let phases = task.run_once();
            let elapsed = started.elapsed();
            report.ticks += 1;

            if let Some(anomaly) = self.check_deadline(elapsed, &phases) {
                report.overruns += 1;
                warn!(
                    period_ms = self.period.as_secs_f64() * 1e3,
                    total_ms = elapsed.as_secs_f64() * 1e3,
                    publish_ms = phases.publish.as_secs_f64() * 1e3,
                    "tick exceeded its period"
                );
                task.on_overrun(&anomaly);
            }

            let pause = self.remaining(elapsed);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        debug!(ticks = report.ticks, overruns = report.overruns, "scheduler stopped");
        report
    }
}
