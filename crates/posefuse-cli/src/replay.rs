//! Recorded-input replay and the state echo sink.
//!
//! A recording is a JSON-lines file; each line carries an offset in seconds
//! from the start of playback and a bus payload:
//!
//! ```text
//! {"at": 0.00, "payload": {"motion": {"yaw_rate": 0.0, "forward_velocity": 2.0, "stamp": "2024-05-01T12:00:00Z"}}}
//! {"at": 0.05, "payload": {"origin": {"x0": 691000.0, "y0": 5335000.0, "zone_number": 32, "zone_letter": "U"}}}
//! ```

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use posefuse_middleware::{EventBus, TopicReceiver};
use posefuse_types::{Event, EventPayload, PoseError};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SOURCE: &str = "posefuse-cli::replay";

/// One recorded bus payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayRecord {
    /// Offset from the start of playback, seconds.
    pub at: f64,
    pub payload: EventPayload,
    #[serde(skip)]
    offset: Duration,
}

/// Read a recording from disk.
pub fn load(path: &Path) -> Result<Vec<ReplayRecord>, PoseError> {
    let file = std::fs::File::open(path).map_err(|source| PoseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(std::io::BufReader::new(file))
        .map_err(|e| PoseError::Config(format!("{}: {e}", path.display())))
}

/// Parse JSON lines, skipping blank lines. Records come back ordered by
/// offset; ties keep file order.
pub fn parse<R: BufRead>(reader: R) -> Result<Vec<ReplayRecord>, PoseError> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PoseError::Config(format!("line {}: {e}", idx + 1)))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut record: ReplayRecord = serde_json::from_str(&line)
            .map_err(|e| PoseError::Config(format!("line {}: {e}", idx + 1)))?;
        if !record.at.is_finite() || record.at < 0.0 {
            return Err(PoseError::Config(format!(
                "line {}: offset {} must be a non-negative number",
                idx + 1,
                record.at
            )));
        }
        record.offset = Duration::try_from_secs_f64(record.at).map_err(|e| {
            PoseError::Config(format!("line {}: offset {}: {e}", idx + 1, record.at))
        })?;
        records.push(record);
    }
    records.sort_by(|a, b| a.at.total_cmp(&b.at));
    Ok(records)
}

/// Publish `records` onto `bus` at their offsets. Stops early on shutdown.
/// Returns the number of records published.
pub async fn play(bus: EventBus, records: Vec<ReplayRecord>, shutdown: Arc<AtomicBool>) -> usize {
    let started = Instant::now();
    let total = records.len();
    let mut published = 0;
    for record in records {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Some(deadline) = started.checked_add(record.offset) else {
            warn!(at = record.at, "offset beyond the clock range; stopping replay");
            break;
        };
        tokio::time::sleep_until(deadline).await;
        bus.publish_payload(SOURCE, record.payload);
        published += 1;
    }
    info!(published, total, "replay finished");
    published
}

/// One JSON line for a state event; `None` for anything else.
pub fn echo_line(event: &Event) -> Option<String> {
    match &event.payload {
        EventPayload::State(state) => serde_json::to_string(state).ok(),
        _ => None,
    }
}

/// Write every state on `rx` to stdout as a JSON line.
pub async fn echo(mut rx: TopicReceiver) {
    while let Some(event) = rx.recv().await {
        let Some(line) = echo_line(&event) else {
            debug!(source = %event.source, "echo skipped non-state event");
            continue;
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            warn!(error = %e, "stdout closed; stopping echo");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use posefuse_middleware::Topic;
    use posefuse_types::VehicleState;

    const RECORDING: &str = r#"
{"at": 0.02, "payload": {"motion": {"yaw_rate": 0.1, "forward_velocity": 2.0, "stamp": "2024-05-01T12:00:00Z"}}}

{"at": 0.0, "payload": {"origin": {"x0": 691000.0, "y0": 5335000.0, "zone_number": 32, "zone_letter": "U"}}}
"#;

    #[test]
    fn parse_skips_blank_lines_and_orders_by_offset() {
        let records = parse(RECORDING.as_bytes()).expect("parse");
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0].payload, EventPayload::Origin(_)));
        assert!(matches!(records[1].payload, EventPayload::Motion(_)));
    }

    #[test]
    fn parse_reports_line_number() {
        let err = parse("{\"at\": 0.0, \"payload\": {}}\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
    }

    #[test]
    fn negative_offset_is_rejected() {
        let line = r#"{"at": -1.0, "payload": {"origin": {"x0": 0.0, "y0": 0.0, "zone_number": 1, "zone_letter": "N"}}}"#;
        assert!(matches!(parse(line.as_bytes()), Err(PoseError::Config(_))));
    }

    #[test]
    fn unrepresentable_offset_is_rejected() {
        let line = r#"{"at": 1e20, "payload": {"origin": {"x0": 0.0, "y0": 0.0, "zone_number": 1, "zone_letter": "N"}}}"#;
        let err = parse(line.as_bytes()).unwrap_err();
        assert!(matches!(err, PoseError::Config(_)));
        assert!(err.to_string().contains("line 1"), "{err}");
    }

    #[test]
    fn parse_keeps_fractional_offsets() {
        let records = parse(RECORDING.as_bytes()).expect("parse");
        assert_eq!(records[0].offset, Duration::ZERO);
        assert!((records[1].offset.as_secs_f64() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        assert!(matches!(
            load(&dir.path().join("missing.jsonl")),
            Err(PoseError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn play_publishes_on_payload_topics() {
        let bus = EventBus::default();
        let mut origin_rx = bus.subscribe_to(Topic::OriginPose);
        let mut motion_rx = bus.subscribe_to(Topic::Motion);

        let records = parse(RECORDING.as_bytes()).expect("parse");
        let published = play(bus.clone(), records, Arc::new(AtomicBool::new(false))).await;

        assert_eq!(published, 2);
        assert!(origin_rx.try_recv().is_some());
        assert!(motion_rx.try_recv().is_some());
    }

    #[tokio::test]
    async fn play_stops_on_shutdown() {
        let bus = EventBus::default();
        let records = parse(RECORDING.as_bytes()).expect("parse");
        let published = play(bus, records, Arc::new(AtomicBool::new(true))).await;
        assert_eq!(published, 0);
    }

    #[test]
    fn echo_line_serialises_states_only() {
        let state = VehicleState::at_rest(chrono::Utc::now());
        let line = echo_line(&Event::new("test", EventPayload::State(state))).expect("state line");
        let back: VehicleState = serde_json::from_str(&line).expect("valid json");
        assert_eq!(back, state);

        let other = Event::new("test", EventPayload::FrameTree(Vec::new()));
        assert!(echo_line(&other).is_none());
    }
}
