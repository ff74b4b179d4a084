//! In-process navigation event bus.
//!
//! The shared channel carries state between processes; this bus carries
//! *notifications* inside one process (planner, executor, REPL, log sinks).
//! It is built on [`tokio::sync::broadcast`] so every subscriber sees every
//! event and a slow subscriber never blocks a loop.
//!
//! # Topics
//!
//! | Topic | Events |
//! |---|---|
//! | [`Topic::Lifecycle`] | trip started / waypoint reached / arrived / stopped, manual overrides |
//! | [`Topic::Safety`] | stalls and resumptions, fail-safe stops, governor overrides |
//! | [`Topic::Diagnostics`] | channel outages |
//!
//! Every event is also copied to a firehose channel reachable through
//! [`NavBus::subscribe_all`].

use tokio::sync::broadcast;
use tracing::trace;
use wayfinder_types::{Event, NavEvent};

/// Buffered events per channel before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Lifecycle,
    Safety,
    Diagnostics,
}

impl Topic {
    /// The lane a payload is routed to.
    pub fn of(payload: &NavEvent) -> Topic {
        match payload {
            NavEvent::TripStarted { .. }
            | NavEvent::WaypointReached { .. }
            | NavEvent::TripArrived { .. }
            | NavEvent::TripStopped { .. }
            | NavEvent::ManualOverride { .. } => Topic::Lifecycle,
            NavEvent::NavigationStalled { .. }
            | NavEvent::NavigationResumed
            | NavEvent::FailSafeStop { .. }
            | NavEvent::GovernorOverride { .. } => Topic::Safety,
            NavEvent::ChannelUnavailable { .. } => Topic::Diagnostics,
        }
    }
}

/// Cloneable handle to the bus; clones share the same channels.
#[derive(Clone, Debug)]
pub struct NavBus {
    all: broadcast::Sender<Event>,
    lifecycle: broadcast::Sender<Event>,
    safety: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
}

impl NavBus {
    /// Create a bus whose channels each buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (lifecycle, _) = broadcast::channel(capacity);
        let (safety, _) = broadcast::channel(capacity);
        let (diagnostics, _) = broadcast::channel(capacity);
        Self {
            all,
            lifecycle,
            safety,
            diagnostics,
        }
    }

    /// Wrap `payload` in an [`Event`] from `source` and route it.
    ///
    /// Returns how many topic subscribers received it.  Zero is normal when
    /// nobody is listening; publishing never fails.
    pub fn publish(&self, source: &str, payload: NavEvent) -> usize {
        self.publish_event(Event::new(source, payload))
    }

    /// Route an already built event.
    pub fn publish_event(&self, event: Event) -> usize {
        let topic = Topic::of(&event.payload);
        // Send errors only mean "no receivers".
        let _ = self.all.send(event.clone());
        let delivered = self.topic_sender(topic).send(event).unwrap_or(0);
        trace!(?topic, delivered, "nav event published");
        delivered
    }

    /// Receive only events routed to `topic`.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Receive every event regardless of topic.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Lifecycle => &self.lifecycle,
            Topic::Safety => &self.safety,
            Topic::Diagnostics => &self.diagnostics,
        }
    }
}

impl Default for NavBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic receiver
// ---------------------------------------------------------------------------

/// Receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Err(RecvError::Lagged(n))` means `n` events were dropped because this
    /// subscriber fell behind; `Err(RecvError::Closed)` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking poll.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_types::{Direction, OverrideKind};

    #[tokio::test]
    async fn events_reach_their_topic_and_the_firehose() -> Result<(), Box<dyn std::error::Error>> {
        let bus = NavBus::default();
        let mut safety = bus.subscribe_to(Topic::Safety);
        let mut all = bus.subscribe_all();

        let delivered = bus.publish(
            "wayfinder-executor",
            NavEvent::GovernorOverride {
                kind: OverrideKind::SlowDown,
                front_cm: 80.0,
            },
        );
        assert_eq!(delivered, 1);

        let on_topic = safety.recv().await?;
        let on_all = all.recv().await?;
        assert_eq!(on_topic.id, on_all.id);
        assert_eq!(on_topic.source, "wayfinder-executor");
        Ok(())
    }

    #[tokio::test]
    async fn other_topics_stay_quiet() {
        let bus = NavBus::default();
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);

        bus.publish(
            "wayfinder-planner",
            NavEvent::ManualOverride {
                direction: Direction::Left,
            },
        );

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), diagnostics.recv()).await;
        assert!(result.is_err(), "diagnostics must not see lifecycle events");
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = NavBus::default();
        assert_eq!(bus.publish("test", NavEvent::NavigationResumed), 0);
    }

    #[test]
    fn routing_table() {
        assert_eq!(
            Topic::of(&NavEvent::TripStopped { trip_id: None }),
            Topic::Lifecycle
        );
        assert_eq!(
            Topic::of(&NavEvent::NavigationStalled { silent_ms: 6_000 }),
            Topic::Safety
        );
        assert_eq!(
            Topic::of(&NavEvent::ChannelUnavailable {
                key: "planner/command".into(),
                details: "timeout".into()
            }),
            Topic::Diagnostics
        );
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = NavBus::new(8);
        let mut slow = bus.subscribe_to(Topic::Safety);
        for _ in 0..100 {
            bus.publish("flood", NavEvent::NavigationResumed);
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged, got {result:?}"
        );
    }
}
