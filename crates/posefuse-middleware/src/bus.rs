//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::PositionFix`] | GNSS/INS fixes (lat/lon, compass heading) |
//! | [`Topic::Motion`] | Vehicle-bus yaw rate and speed |
//! | [`Topic::OriginPose`] | The one-off UTM origin broadcast |
//! | [`Topic::GroundTruth`] | Simulator ground-truth poses |
//! | [`Topic::VehicleState`] | Estimated planar state |
//! | [`Topic::FrameTree`] | Rigid-body transforms, once per tick |
//! | [`Topic::Diagnostics`] | Stale input, zone mismatch, overruns |

use posefuse_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PositionFix,
    Motion,
    OriginPose,
    GroundTruth,
    VehicleState,
    FrameTree,
    Diagnostics,
}

impl Topic {
    /// The topic a payload naturally belongs on.
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::PositionFix(_) => Topic::PositionFix,
            EventPayload::Motion(_) => Topic::Motion,
            EventPayload::Origin(_) => Topic::OriginPose,
            EventPayload::GroundTruth(_) => Topic::GroundTruth,
            EventPayload::State(_) => Topic::VehicleState,
            EventPayload::FrameTree(_) => Topic::FrameTree,
            EventPayload::Diagnostic(_) => Topic::Diagnostics,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    position_fix: broadcast::Sender<Event>,
    motion: broadcast::Sender<Event>,
    origin_pose: broadcast::Sender<Event>,
    ground_truth: broadcast::Sender<Event>,
    vehicle_state: broadcast::Sender<Event>,
    frame_tree: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus. `capacity` is applied to every topic channel
    /// independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            position_fix: broadcast::channel(capacity).0,
            motion: broadcast::channel(capacity).0,
            origin_pose: broadcast::channel(capacity).0,
            ground_truth: broadcast::channel(capacity).0,
            vehicle_state: broadcast::channel(capacity).0,
            frame_tree: broadcast::channel(capacity).0,
            diagnostics: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of receivers that were handed the event; `0` when
    /// nobody is listening, which is a normal condition for outbound topics.
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        self.topic_sender(topic).send(event).unwrap_or(0)
    }

    /// Wrap `payload` in an [`Event`] from `source` and publish it on the
    /// payload's natural topic.
    pub fn publish_payload(&self, source: &str, payload: EventPayload) -> usize {
        let topic = Topic::for_payload(&payload);
        self.publish_to(topic, Event::new(source, payload))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::PositionFix => &self.position_fix,
            Topic::Motion => &self.motion,
            Topic::OriginPose => &self.origin_pose,
            Topic::GroundTruth => &self.ground_truth,
            Topic::VehicleState => &self.vehicle_state,
            Topic::FrameTree => &self.frame_tree,
            Topic::Diagnostics => &self.diagnostics,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-bound receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`]. Lagging is logged and skipped:
/// for sensor topics only the newest sample matters.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns `None` once the bus has shut down.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv]. Returns `None` when no
    /// event is waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
