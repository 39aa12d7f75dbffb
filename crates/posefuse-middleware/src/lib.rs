//! `posefuse-middleware` – in-process transport.
//!
//! Routes samples, estimates and diagnostics between the estimator and its
//! collaborators without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
