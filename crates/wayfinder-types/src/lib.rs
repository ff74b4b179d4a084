//! `wayfinder-types` – shared vocabulary for the planner and the executor.
//!
//! Every record that crosses the shared state channel is defined here, along
//! with the navigation event payloads routed over the in-process bus and the
//! global [`NavError`] type.
//!
//! All timestamps are Unix epoch milliseconds ([`TimestampMs`]).

pub mod clock;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};

/// Unix epoch milliseconds.
pub type TimestampMs = i64;

/// Records that carry their own production timestamp.
///
/// Staleness is always judged from this value, never from the order in which
/// records were read.
pub trait Timestamped {
    fn timestamp(&self) -> TimestampMs;

    /// `true` when the record is no older than `max_age_ms` at `now`.
    ///
    /// Records stamped slightly in the future (clock skew between the two
    /// processes) count as fresh.
    fn is_fresh(&self, now: TimestampMs, max_age_ms: u64) -> bool {
        now.saturating_sub(self.timestamp()) <= max_age_ms as i64
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Geography
// ────────────────────────────────────────────────────────────────────────────

/// A bare latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lng)
    }
}

/// A location fix produced by the executor's location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: TimestampMs,
}

impl Position {
    pub fn new(lat: f64, lng: f64, timestamp: TimestampMs) -> Self {
        Self { lat, lng, timestamp }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

impl Timestamped for Position {
    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

/// Compass orientation of the agent, `degrees ∈ [0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub degrees: f64,
    pub timestamp: TimestampMs,
}

impl Heading {
    /// Build a heading, wrapping any finite angle into `[0, 360)`.
    pub fn new(degrees: f64, timestamp: TimestampMs) -> Self {
        let wrapped = degrees.rem_euclid(360.0);
        Self {
            degrees: if wrapped >= 360.0 { 0.0 } else { wrapped },
            timestamp,
        }
    }
}

impl Timestamped for Heading {
    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

/// One step of an externally supplied route.
///
/// `instruction` and `distance_m` are passed through from the routing
/// collaborator and are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl Waypoint {
    pub fn new(lat: f64, lng: f64, order: u32) -> Self {
        Self {
            lat,
            lng,
            order,
            instruction: None,
            distance_m: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Commands
// ────────────────────────────────────────────────────────────────────────────

/// The closed set of movement commands the planner may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Left,
    Right,
    Stop,
    Arrived,
}

impl Direction {
    /// `true` for directions that put the agent in motion.
    pub fn is_moving(self) -> bool {
        matches!(self, Direction::Forward | Direction::Left | Direction::Right)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
            Direction::Arrived => "arrived",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "stop" => Ok(Direction::Stop),
            "arrived" => Ok(Direction::Arrived),
            other => Err(NavError::InvalidDirection(other.to_string())),
        }
    }
}

/// The sole planner → executor artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub direction: Direction,
    pub timestamp: TimestampMs,
}

impl Command {
    pub fn new(direction: Direction, timestamp: TimestampMs) -> Self {
        Self { direction, timestamp }
    }
}

impl Timestamped for Command {
    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Executor telemetry
// ────────────────────────────────────────────────────────────────────────────

/// Distances reported by the executor's proximity sensors, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximityReading {
    pub front: f32,
    pub left: f32,
    pub right: f32,
    pub timestamp: TimestampMs,
}

impl Timestamped for ProximityReading {
    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

/// Local, transient override applied by the proximity governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// Brake, reverse briefly, stop.
    EmergencyBackup,
    /// Speed halved, direction kept.
    SlowDown,
    /// Steering biased left, away from an obstacle on the right.
    SteerLeft,
    /// Steering biased right, away from an obstacle on the left.
    SteerRight,
}

/// Executor state published on the telemetry cadence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStatus {
    /// Direction the actuators are actually following.
    pub effective: Direction,
    /// Direction of the most recently adopted command.
    pub adopted: Direction,
    #[serde(rename = "override")]
    pub override_kind: Option<OverrideKind>,
    pub fail_safe: bool,
    pub timestamp: TimestampMs,
}

impl Timestamped for ExecutorStatus {
    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trip lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of the planner's trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripState {
    #[default]
    Idle,
    /// Started, waiting for the first fresh position/heading pair.
    Routing,
    Navigating,
    Arrived,
    Stopped,
}

impl TripState {
    /// `true` while the planner is still ticking for this trip.
    pub fn is_active(self) -> bool {
        matches!(self, TripState::Routing | TripState::Navigating)
    }
}

impl fmt::Display for TripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TripState::Idle => "idle",
            TripState::Routing => "routing",
            TripState::Navigating => "navigating",
            TripState::Arrived => "arrived",
            TripState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// The trip-lifecycle record written by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip_id: Uuid,
    pub state: TripState,
    pub destination: GeoPoint,
    pub current_index: usize,
    /// Length of the traversal sequence, destination included.
    pub route_len: usize,
    pub started_at: TimestampMs,
    pub timestamp: TimestampMs,
}

impl Timestamped for TripRecord {
    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Navigation events routed over the in-process bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum NavEvent {
    TripStarted {
        trip_id: Uuid,
        destination: GeoPoint,
        route_len: usize,
    },
    WaypointReached {
        index: usize,
        instruction: Option<String>,
    },
    TripArrived {
        trip_id: Uuid,
    },
    TripStopped {
        trip_id: Option<Uuid>,
    },
    ManualOverride {
        direction: Direction,
    },
    /// No command written for longer than the command timeout.
    NavigationStalled {
        silent_ms: u64,
    },
    NavigationResumed,
    /// The executor forced a local stop after the command timeout.
    FailSafeStop {
        last_direction: Direction,
        silent_ms: u64,
    },
    GovernorOverride {
        kind: OverrideKind,
        front_cm: f32,
    },
    ChannelUnavailable {
        key: String,
        details: String,
    },
}

/// Envelope for a [`NavEvent`] on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"wayfinder-planner"`
    pub source: String,
    pub payload: NavEvent,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: NavEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for operator requests, drivers and configuration.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NavError {
    #[error("A trip is already active; stop it before starting another")]
    AlreadyNavigating,

    #[error("Cannot start a trip without waypoints")]
    EmptyRoute,

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Unknown direction: {0}")]
    InvalidDirection(String),

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Planner is not running")]
    PlannerUnavailable,
}
