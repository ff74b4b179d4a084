//! Hardware seams of the executor.
//!
//! The executor only talks to these traits, so a real motor controller, a
//! simulator or a test double can be swapped in without touching the loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use wayfinder_types::{Direction, Heading, NavError, Position, ProximityReading, TimestampMs};

/// Low-level motion primitive sent to a drive base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Motion {
    Forward,
    Left,
    Right,
    Reverse,
    Stop,
}

impl Motion {
    /// Navigation direction this motion amounts to.  Reversing is part of
    /// a stop manoeuvre and reports as `stop`.
    pub fn direction(self) -> Direction {
        match self {
            Motion::Forward => Direction::Forward,
            Motion::Left => Direction::Left,
            Motion::Right => Direction::Right,
            Motion::Reverse | Motion::Stop => Direction::Stop,
        }
    }
}

/// What the drive base is told to do: a motion at a normalised speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveAction {
    pub motion: Motion,
    /// `0.0 ..= 1.0` of the base's maximum speed.
    pub speed: f32,
}

impl DriveAction {
    pub fn new(motion: Motion, speed: f32) -> Self {
        let speed = if motion == Motion::Stop {
            0.0
        } else {
            speed.clamp(0.0, 1.0)
        };
        Self { motion, speed }
    }

    pub fn stop() -> Self {
        Self::new(Motion::Stop, 0.0)
    }
}

impl fmt::Display for DriveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{:.2}", self.motion, self.speed)
    }
}

/// Motor controller.
pub trait DriveBase: Send {
    /// Stable identifier, e.g. `"drive_base"`.
    fn id(&self) -> &str;

    /// Apply `action` until the next call.
    ///
    /// # Errors
    ///
    /// [`NavError::HardwareFault`] when the controller rejects the command.
    fn apply(&mut self, action: DriveAction) -> Result<(), NavError>;
}

/// Front/left/right distance sensors.
pub trait ProximitySensor: Send {
    fn id(&self) -> &str;

    /// Take one sample stamped with `now`.
    ///
    /// # Errors
    ///
    /// [`NavError::HardwareFault`] when no reading is available.
    fn sample(&mut self, now: TimestampMs) -> Result<ProximityReading, NavError>;
}

/// GNSS receiver and compass.
pub trait LocationSource: Send {
    fn id(&self) -> &str;

    /// # Errors
    ///
    /// [`NavError::HardwareFault`] when there is no fix.
    fn position(&mut self, now: TimestampMs) -> Result<Position, NavError>;

    /// # Errors
    ///
    /// [`NavError::HardwareFault`] when the compass cannot be read.
    fn heading(&mut self, now: TimestampMs) -> Result<Heading, NavError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_reports_as_stop() {
        assert_eq!(Motion::Reverse.direction(), Direction::Stop);
        assert_eq!(Motion::Left.direction(), Direction::Left);
    }

    #[test]
    fn stop_action_has_zero_speed() {
        assert_eq!(DriveAction::new(Motion::Stop, 0.8).speed, 0.0);
        assert_eq!(DriveAction::new(Motion::Forward, 3.0).speed, 1.0);
        assert_eq!(DriveAction::stop().to_string(), "Stop@0.00");
    }
}
