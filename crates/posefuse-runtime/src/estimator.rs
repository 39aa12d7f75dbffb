//! [`StateEstimator`] – the fixed-rate pose estimation pipeline.
//!
//! Owns the shared estimation state and wires it to the [`EventBus`]:
//!
//! 1. **Ingest** – one task per inbound topic feeds samples into the
//!    [`SensorNormalizer`], the origin slot, or (ground-truth mode) straight
//!    into the engine.
//! 2. **Fuse** – every tick copies the latest
//!    [`NormalizedSnapshot`][posefuse_perception::NormalizedSnapshot] and runs
//!    the [`PoseFusionEngine`] on it.
//! 3. **Publish** – the state goes to [`Topic::VehicleState`], the frame tree
//!    to [`Topic::FrameTree`], anomalies to [`Topic::Diagnostics`].
//!
//! Each shared value sits behind its own `parking_lot` lock and is replaced
//! whole under a single acquisition, so a tick never sees a half-written
//! sample. The ground-truth path publishes while holding the engine lock,
//! the same lock the tick path reads the state under.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use posefuse_middleware::{EventBus, Topic};
use posefuse_perception::{FrameTreePublisher, FusionConfig, PoseFusionEngine, SensorNormalizer};
use posefuse_types::{
    Anomaly, Event, EventPayload, GroundTruthSample, OriginReference, RawMotionSample,
    RawPositionSample, SensorChannel, Stamp, VehicleState,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mode::SourceMode;
use crate::scheduler::{Periodic, TickPhases};

const SOURCE: &str = "posefuse-runtime::estimator";

/// Configuration bundle for [`StateEstimator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatorConfig {
    /// Keep producer stamps (`true`) or re-stamp samples on arrival.
    pub live: bool,
    pub fusion: FusionConfig,
}

pub struct StateEstimator {
    mode: SourceMode,
    bus: EventBus,
    publisher: FrameTreePublisher,
    normalizer: Mutex<SensorNormalizer>,
    origin: RwLock<Option<OriginReference>>,
    engine: Mutex<PoseFusionEngine>,
    ground_truth_seen: AtomicBool,
}

impl StateEstimator {
    pub fn new(
        mode: SourceMode,
        bus: EventBus,
        publisher: FrameTreePublisher,
        config: EstimatorConfig,
    ) -> Self {
        Self {
            mode,
            bus,
            publisher,
            normalizer: Mutex::new(SensorNormalizer::new(config.live)),
            origin: RwLock::new(None),
            engine: Mutex::new(PoseFusionEngine::new(config.fusion, Utc::now())),
            ground_truth_seen: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// The most recent estimate.
    pub fn state(&self) -> VehicleState {
        self.engine.lock().state()
    }

    pub fn origin(&self) -> Option<OriginReference> {
        *self.origin.read()
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    pub fn handle_position(&self, raw: &RawPositionSample, now: Stamp) {
        let normalized = self.normalizer.lock().ingest_position(raw, now);
        debug!(lat = normalized.lat, lon = normalized.lon, psi = normalized.psi, "position fix");
    }

    pub fn handle_motion(&self, raw: &RawMotionSample, now: Stamp) {
        self.normalizer.lock().ingest_motion(raw, now);
    }

    /// Record the map origin. Only the first broadcast is used; returns
    /// `true` when this call set it.
    pub fn handle_origin(&self, origin: OriginReference) -> bool {
        let mut slot = self.origin.write();
        let current = *slot;
        match current {
            None => {
                info!(
                    x0 = origin.x0,
                    y0 = origin.y0,
                    zone = %format!("{}{}", origin.zone_number, origin.zone_letter),
                    "origin received"
                );
                *slot = Some(origin);
                true
            }
            Some(current) => {
                if current != origin {
                    warn!(?current, ignored = ?origin, "origin changed after startup; keeping the first");
                }
                false
            }
        }
    }

    /// Adopt a ground-truth sample and publish it immediately.
    pub fn handle_ground_truth(&self, sample: &GroundTruthSample, now: Stamp) -> VehicleState {
        let mut engine = self.engine.lock();
        let state = engine.apply_ground_truth(sample, now);
        self.ground_truth_seen.store(true, Ordering::SeqCst);
        self.bus.publish_payload(SOURCE, EventPayload::State(state));
        state
    }

    /// Route a bus event to the matching handler.
    pub fn dispatch(&self, event: &Event) {
        let now = Utc::now();
        match (&event.payload, self.mode) {
            (EventPayload::PositionFix(raw), SourceMode::Polled) => self.handle_position(raw, now),
            (EventPayload::Motion(raw), SourceMode::Polled) => self.handle_motion(raw, now),
            (EventPayload::Origin(origin), SourceMode::Polled) => {
                self.handle_origin(*origin);
            }
            (EventPayload::GroundTruth(sample), SourceMode::GroundTruth) => {
                self.handle_ground_truth(sample, now);
            }
            (payload, mode) => {
                debug!(source = %event.source, ?mode, ?payload, "ignoring event");
            }
        }
    }

    /// Subscribe to the mode's inbound topics and drain each on its own task.
    ///
    /// Subscriptions exist by the time this returns, so nothing published
    /// afterwards is missed.
    pub fn spawn_ingest(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.mode
            .inbound_topics()
            .iter()
            .map(|&topic| {
                let mut rx = self.bus.subscribe_to(topic);
                let estimator = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        estimator.dispatch(&event);
                    }
                    debug!(?topic, "ingest task finished");
                })
            })
            .collect()
    }

    /// Channels the mode still waits on before estimation may start.
    ///
    /// In polled mode the origin is only asked for once position and motion
    /// have both arrived.
    pub fn missing_inputs(&self) -> Vec<SensorChannel> {
        match self.mode {
            SourceMode::Polled => {
                let mut missing = Vec::new();
                {
                    let normalizer = self.normalizer.lock();
                    if !normalizer.has_position() {
                        missing.push(SensorChannel::Position);
                    }
                    if !normalizer.has_motion() {
                        missing.push(SensorChannel::Motion);
                    }
                }
                if missing.is_empty() && self.origin.read().is_none() {
                    missing.push(SensorChannel::Origin);
                }
                missing
            }
            SourceMode::GroundTruth => {
                if self.ground_truth_seen.load(Ordering::SeqCst) {
                    Vec::new()
                } else {
                    vec![SensorChannel::GroundTruth]
                }
            }
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// Run one estimation tick at processing time `now`.
    pub fn tick(&self, now: Stamp) -> TickPhases {
        match self.mode {
            SourceMode::Polled => self.tick_polled(now),
            SourceMode::GroundTruth => {
                let state = self.engine.lock().state();
                let started = Instant::now();
                self.publish_frames(&state, now);
                TickPhases {
                    publish: started.elapsed(),
                }
            }
        }
    }

    fn tick_polled(&self, now: Stamp) -> TickPhases {
        let snapshot = self.normalizer.lock().snapshot();
        let origin = *self.origin.read();
        let (Some(snapshot), Some(origin)) = (snapshot, origin) else {
            debug!("inputs incomplete; skipping tick");
            return TickPhases::default();
        };

        let outcome = self.engine.lock().update(&snapshot, &origin, now);

        let started = Instant::now();
        for anomaly in &outcome.anomalies {
            self.report(anomaly);
        }
        self.bus
            .publish_payload(SOURCE, EventPayload::State(outcome.state));
        self.publish_frames(&outcome.state, now);
        TickPhases {
            publish: started.elapsed(),
        }
    }

    fn publish_frames(&self, state: &VehicleState, now: Stamp) {
        let transforms = self.publisher.transforms(state, now);
        self.bus
            .publish_to(Topic::FrameTree, Event::new(SOURCE, EventPayload::FrameTree(transforms)));
    }

    /// Log `anomaly` and forward it to [`Topic::Diagnostics`].
    pub fn report(&self, anomaly: &Anomaly) {
        warn!(%anomaly, "estimator anomaly");
        self.bus
            .publish_payload(SOURCE, EventPayload::Diagnostic(anomaly.clone()));
    }
}

impl Periodic for StateEstimator {
    fn run_once(&self) -> TickPhases {
        self.tick(Utc::now())
    }

    fn on_overrun(&self, anomaly: &Anomaly) {
        self.bus
            .publish_payload(SOURCE, EventPayload::Diagnostic(anomaly.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{DateTime, TimeDelta};
    use posefuse_perception::{VehicleGeometry, project};

    const DISTANCES: &str = r#"
base_link: {cog: {x: 1.2, y: 0.0, z: 0.3}}
cog: {chassis: {x: 0.0, y: 0.0, z: 0.1}}
chassis:
  left_rear_wheel_joint: {x: -1.2, y: 0.6, z: -0.2}
  right_rear_wheel_joint: {x: -1.2, y: -0.6, z: -0.2}
  left_steering_hinge_joint: {x: 1.5, y: 0.6, z: -0.2}
  right_steering_hinge: {x: 1.5, y: -0.6, z: -0.2}
"#;

    const LAT: f64 = 48.26;
    const LON: f64 = 11.67;

    fn t(ms: i64) -> Stamp {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::milliseconds(ms)
    }

    fn estimator(mode: SourceMode) -> (StateEstimator, EventBus) {
        let bus = EventBus::default();
        let geometry = VehicleGeometry::from_yaml_str(DISTANCES).unwrap();
        let publisher = FrameTreePublisher::new(&geometry).unwrap();
        let est = StateEstimator::new(mode, bus.clone(), publisher, EstimatorConfig::default());
        (est, bus)
    }

    /// Origin placed so the test fix sits at (10, 5) in the map.
    fn origin_10_5() -> OriginReference {
        let utm = project(LAT, LON).unwrap();
        OriginReference {
            x0: utm.easting - 10.0,
            y0: utm.northing - 5.0,
            zone_number: utm.zone_number,
            zone_letter: utm.zone_letter,
        }
    }

    fn fix(forward_velocity: f64) -> RawPositionSample {
        RawPositionSample {
            lat: LAT,
            lon: LON,
            heading_deg: 90.0,
            heading_rate_deg: 0.0,
            forward_velocity,
            cross_velocity: 0.0,
            stamp: t(0),
        }
    }

    fn motion(forward_velocity: f64) -> RawMotionSample {
        RawMotionSample {
            yaw_rate: 0.0,
            forward_velocity,
            stamp: t(0),
        }
    }

    fn state_of(event: Event) -> VehicleState {
        match event.payload {
            EventPayload::State(s) => s,
            other => panic!("expected state, got {other:?}"),
        }
    }

    #[test]
    fn polled_waits_for_sensors_then_origin() {
        let (est, _bus) = estimator(SourceMode::Polled);
        assert_eq!(
            est.missing_inputs(),
            vec![SensorChannel::Position, SensorChannel::Motion]
        );

        est.handle_position(&fix(0.0), t(0));
        assert_eq!(est.missing_inputs(), vec![SensorChannel::Motion]);

        est.handle_motion(&motion(0.0), t(0));
        assert_eq!(est.missing_inputs(), vec![SensorChannel::Origin]);

        est.handle_origin(origin_10_5());
        assert!(est.missing_inputs().is_empty());
    }

    #[test]
    fn tick_before_inputs_publishes_nothing() {
        let (est, bus) = estimator(SourceMode::Polled);
        let mut states = bus.subscribe_to(Topic::VehicleState);
        let mut frames = bus.subscribe_to(Topic::FrameTree);

        assert_eq!(est.tick(t(0)), TickPhases::default());
        assert!(states.try_recv().is_none());
        assert!(frames.try_recv().is_none());
    }

    #[test]
    fn slow_vehicle_publishes_raw_fix() {
        let (est, bus) = estimator(SourceMode::Polled);
        let mut states = bus.subscribe_to(Topic::VehicleState);
        let mut frames = bus.subscribe_to(Topic::FrameTree);

        est.handle_position(&fix(0.5), t(0));
        est.handle_motion(&motion(0.5), t(0));
        est.handle_origin(origin_10_5());
        est.tick(t(100));

        let state = state_of(states.try_recv().expect("state published"));
        assert_abs_diff_eq!(state.x, 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(state.y, 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(state.psi, 0.0, epsilon = 1e-12);
        assert_eq!(state.stamp, t(100));

        match frames.try_recv().expect("frame tree published").payload {
            EventPayload::FrameTree(tfs) => {
                assert_eq!(tfs.len(), 7);
                assert_abs_diff_eq!(tfs[0].translation[0], 10.0, epsilon = 1e-6);
                assert!(tfs.iter().all(|tf| tf.stamp == t(100)));
            }
            other => panic!("expected frame tree, got {other:?}"),
        }
    }

    #[test]
    fn moving_vehicle_dead_reckons_along_heading() {
        let (est, bus) = estimator(SourceMode::Polled);
        let mut states = bus.subscribe_to(Topic::VehicleState);

        est.handle_position(&fix(2.0), t(0));
        est.handle_motion(&motion(2.0), t(0));
        est.handle_origin(origin_10_5());
        est.tick(t(100));

        // Heading east at 2 m/s, fix 0.1 s old.
        let state = state_of(states.try_recv().expect("state published"));
        assert_abs_diff_eq!(state.x, 10.2, epsilon = 1e-6);
        assert_abs_diff_eq!(state.y, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn stale_inputs_are_reported_on_diagnostics() {
        let (est, bus) = estimator(SourceMode::Polled);
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);

        est.handle_position(&fix(0.0), t(0));
        est.handle_motion(&motion(0.0), t(0));
        est.handle_origin(origin_10_5());
        est.tick(t(1_000));

        let mut channels = Vec::new();
        while let Some(event) = diagnostics.try_recv() {
            if let EventPayload::Diagnostic(Anomaly::StaleInput { channel, .. }) = event.payload {
                channels.push(channel);
            }
        }
        assert_eq!(channels, vec![SensorChannel::Position, SensorChannel::Motion]);
    }

    #[test]
    fn zone_mismatch_is_reported_and_estimation_continues() {
        let (est, bus) = estimator(SourceMode::Polled);
        let mut states = bus.subscribe_to(Topic::VehicleState);
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);

        let mut origin = origin_10_5();
        origin.zone_number += 1;
        est.handle_position(&fix(0.0), t(0));
        est.handle_motion(&motion(0.0), t(0));
        est.handle_origin(origin);
        est.tick(t(50));

        assert!(states.try_recv().is_some());
        let event = diagnostics.try_recv().expect("mismatch reported");
        assert!(matches!(
            event.payload,
            EventPayload::Diagnostic(Anomaly::ZoneMismatch { .. })
        ));
    }

    #[test]
    fn origin_is_set_once() {
        let (est, _bus) = estimator(SourceMode::Polled);
        let first = origin_10_5();
        let mut second = first;
        second.x0 += 100.0;

        assert!(est.handle_origin(first));
        assert!(!est.handle_origin(second));
        assert_eq!(est.origin(), Some(first));
    }

    #[test]
    fn ground_truth_is_published_on_arrival() {
        let (est, bus) = estimator(SourceMode::GroundTruth);
        let mut states = bus.subscribe_to(Topic::VehicleState);
        assert_eq!(est.missing_inputs(), vec![SensorChannel::GroundTruth]);

        let sample = GroundTruthSample {
            x: 3.0,
            y: -4.0,
            yaw: 0.5,
            yaw_rate: 0.1,
            vx: 7.0,
            vy: 0.2,
            stamp: t(0),
        };
        est.handle_ground_truth(&sample, t(10));

        let state = state_of(states.try_recv().expect("published without a tick"));
        assert_eq!((state.x, state.y, state.psi), (3.0, -4.0, 0.5));
        assert_eq!((state.vx, state.vy, state.psidot), (7.0, 0.2, 0.1));
        assert!(est.missing_inputs().is_empty());
    }

    #[test]
    fn ground_truth_tick_publishes_frames_only() {
        let (est, bus) = estimator(SourceMode::GroundTruth);
        let mut states = bus.subscribe_to(Topic::VehicleState);
        let mut frames = bus.subscribe_to(Topic::FrameTree);

        est.tick(t(0));

        assert!(states.try_recv().is_none());
        assert!(frames.try_recv().is_some());
    }

    #[test]
    fn dispatch_ignores_other_mode_payloads() {
        let (est, _bus) = estimator(SourceMode::GroundTruth);
        est.dispatch(&Event::new("test", EventPayload::PositionFix(fix(0.0))));
        assert_eq!(est.missing_inputs(), vec![SensorChannel::GroundTruth]);
    }

    #[tokio::test]
    async fn ingest_tasks_feed_the_normalizer() {
        let (est, bus) = estimator(SourceMode::Polled);
        let est = Arc::new(est);
        let handles = est.spawn_ingest();

        bus.publish_payload("test", EventPayload::PositionFix(fix(0.0)));
        bus.publish_payload("test", EventPayload::Motion(motion(0.0)));
        bus.publish_payload("test", EventPayload::Origin(origin_10_5()));

        for _ in 0..100 {
            if est.missing_inputs().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(est.missing_inputs().is_empty());

        for handle in handles {
            handle.abort();
        }
    }
}
