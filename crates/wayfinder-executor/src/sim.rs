//! Headless simulation drivers.
//!
//! [`SimRover`] is a tiny kinematic model: it turns in place on `left` /
//! `right`, drives along its heading on `forward` / `reverse`, and integrates
//! lazily up to the clock's current time whenever it is touched.  The
//! drivers below share one rover so the whole planner/executor pair can run
//! against a [`MemoryChannel`][wayfinder_channel::MemoryChannel] with no
//! hardware at all.
//!
//! | Driver | Trait |
//! |---|---|
//! | [`SimDriveBase`] | [`DriveBase`] – records every action, feeds the rover |
//! | [`SimProximity`] | [`ProximitySensor`] – scripted distances |
//! | [`SimLocation`] | [`LocationSource`] – reads the rover's pose |

use std::sync::{Arc, Mutex, MutexGuard};

use wayfinder_types::{
    Clock, GeoPoint, Heading, NavError, Position, ProximityReading, TimestampMs,
};

use crate::drivers::{DriveAction, DriveBase, LocationSource, Motion, ProximitySensor};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not take the simulation down with it.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn fault(component: &str, details: &str) -> NavError {
    NavError::HardwareFault {
        component: component.to_string(),
        details: details.to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rover kinematics
// ────────────────────────────────────────────────────────────────────────────

/// Physical limits of the simulated rover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoverSpec {
    /// Ground speed at `speed = 1.0`.
    pub max_speed_mps: f64,
    /// Turn rate at `speed = 1.0`.
    pub max_turn_dps: f64,
}

impl Default for RoverSpec {
    fn default() -> Self {
        Self {
            max_speed_mps: 1.0,
            max_turn_dps: 10.0,
        }
    }
}

struct RoverState {
    lat: f64,
    lng: f64,
    heading_deg: f64,
    action: DriveAction,
    updated_at: TimestampMs,
}

/// Shared kinematic state; clones observe the same rover.
#[derive(Clone)]
pub struct SimRover {
    state: Arc<Mutex<RoverState>>,
    spec: RoverSpec,
    clock: Arc<dyn Clock>,
}

impl SimRover {
    pub fn new(start: GeoPoint, heading_deg: f64, spec: RoverSpec, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            state: Arc::new(Mutex::new(RoverState {
                lat: start.lat,
                lng: start.lng,
                heading_deg: heading_deg.rem_euclid(360.0),
                action: DriveAction::stop(),
                updated_at: now,
            })),
            spec,
            clock,
        }
    }

    /// Pose as of now.
    pub fn pose(&self) -> (GeoPoint, f64) {
        let mut state = lock(&self.state);
        self.integrate(&mut state);
        (GeoPoint::new(state.lat, state.lng), state.heading_deg)
    }

    /// Action currently being executed.
    pub fn action(&self) -> DriveAction {
        lock(&self.state).action
    }

    fn set_action(&self, action: DriveAction) {
        let mut state = lock(&self.state);
        self.integrate(&mut state);
        state.action = action;
    }

    fn integrate(&self, state: &mut RoverState) {
        let now = self.clock.now_ms();
        let dt_s = (now - state.updated_at).max(0) as f64 / 1_000.0;
        state.updated_at = now;
        if dt_s == 0.0 {
            return;
        }
        let speed = f64::from(state.action.speed);
        match state.action.motion {
            Motion::Stop => {}
            Motion::Left => {
                state.heading_deg =
                    (state.heading_deg - self.spec.max_turn_dps * speed * dt_s).rem_euclid(360.0);
            }
            Motion::Right => {
                state.heading_deg =
                    (state.heading_deg + self.spec.max_turn_dps * speed * dt_s).rem_euclid(360.0);
            }
            Motion::Forward | Motion::Reverse => {
                let sign = if state.action.motion == Motion::Forward { 1.0 } else { -1.0 };
                let d = sign * self.spec.max_speed_mps * speed * dt_s;
                let h = state.heading_deg.to_radians();
                state.lat += (d * h.cos() / EARTH_RADIUS_M).to_degrees();
                state.lng +=
                    (d * h.sin() / (EARTH_RADIUS_M * state.lat.to_radians().cos())).to_degrees();
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Drive base
// ────────────────────────────────────────────────────────────────────────────

/// Drive base that records every action and optionally moves a rover.
#[derive(Clone, Default)]
pub struct SimDriveBase {
    actions: Arc<Mutex<Vec<DriveAction>>>,
    rover: Option<SimRover>,
    faulty: Arc<Mutex<bool>>,
}

impl SimDriveBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rover(mut self, rover: SimRover) -> Self {
        self.rover = Some(rover);
        self
    }

    /// Make every following `apply` fail.
    pub fn set_faulty(&self, faulty: bool) {
        *lock(&self.faulty) = faulty;
    }

    /// Every action applied so far, oldest first.
    pub fn actions(&self) -> Vec<DriveAction> {
        lock(&self.actions).clone()
    }

    pub fn last(&self) -> Option<DriveAction> {
        lock(&self.actions).last().copied()
    }
}

impl DriveBase for SimDriveBase {
    fn id(&self) -> &str {
        "sim_drive_base"
    }

    fn apply(&mut self, action: DriveAction) -> Result<(), NavError> {
        if *lock(&self.faulty) {
            return Err(fault(self.id(), "motor controller not responding"));
        }
        if let Some(rover) = &self.rover {
            rover.set_action(action);
        }
        lock(&self.actions).push(action);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Proximity sensor
// ────────────────────────────────────────────────────────────────────────────

/// Distances in centimetres; `None` simulates a sensor dropout.
#[derive(Clone)]
pub struct SimProximity {
    distances: Arc<Mutex<Option<(f32, f32, f32)>>>,
}

impl SimProximity {
    pub fn new(front: f32, left: f32, right: f32) -> Self {
        Self {
            distances: Arc::new(Mutex::new(Some((front, left, right)))),
        }
    }

    /// Nothing within range on any side.
    pub fn clear() -> Self {
        Self::new(400.0, 400.0, 400.0)
    }

    pub fn set(&self, front: f32, left: f32, right: f32) {
        *lock(&self.distances) = Some((front, left, right));
    }

    pub fn set_missing(&self) {
        *lock(&self.distances) = None;
    }
}

impl ProximitySensor for SimProximity {
    fn id(&self) -> &str {
        "sim_proximity"
    }

    fn sample(&mut self, now: TimestampMs) -> Result<ProximityReading, NavError> {
        let (front, left, right) =
            (*lock(&self.distances)).ok_or_else(|| fault(self.id(), "no echo"))?;
        Ok(ProximityReading {
            front,
            left,
            right,
            timestamp: now,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Location source
// ────────────────────────────────────────────────────────────────────────────

/// GNSS and compass reading the rover's pose.
#[derive(Clone)]
pub struct SimLocation {
    rover: SimRover,
}

impl SimLocation {
    pub fn new(rover: SimRover) -> Self {
        Self { rover }
    }
}

impl LocationSource for SimLocation {
    fn id(&self) -> &str {
        "sim_location"
    }

    fn position(&mut self, now: TimestampMs) -> Result<Position, NavError> {
        let (point, _) = self.rover.pose();
        Ok(Position::new(point.lat, point.lng, now))
    }

    fn heading(&mut self, now: TimestampMs) -> Result<Heading, NavError> {
        let (_, degrees) = self.rover.pose();
        Ok(Heading::new(degrees, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_types::ManualClock;

    fn rover() -> (SimRover, ManualClock) {
        let clock = ManualClock::new(0);
        let rover = SimRover::new(
            GeoPoint::new(0.0, 0.0),
            0.0,
            RoverSpec::default(),
            Arc::new(clock.clone()),
        );
        (rover, clock)
    }

    #[test]
    fn forward_moves_along_heading() {
        let (rover, clock) = rover();
        let mut drive = SimDriveBase::new().with_rover(rover.clone());
        drive.apply(DriveAction::new(Motion::Forward, 1.0)).unwrap();
        clock.advance(10_000);

        let (point, heading) = rover.pose();
        // ~10 m north
        assert!((point.lat * 111_195.0 - 10.0).abs() < 0.01, "{point:?}");
        assert!(point.lng.abs() < 1e-12);
        assert_eq!(heading, 0.0);
    }

    #[test]
    fn right_turns_clockwise_in_place() {
        let (rover, clock) = rover();
        let mut drive = SimDriveBase::new().with_rover(rover.clone());
        drive.apply(DriveAction::new(Motion::Right, 0.5)).unwrap();
        clock.advance(2_000);
        let (point, heading) = rover.pose();
        assert!((heading - 10.0).abs() < 1e-9);
        assert_eq!(point, GeoPoint::new(0.0, 0.0));

        drive.apply(DriveAction::new(Motion::Left, 1.0)).unwrap();
        clock.advance(2_000);
        let (_, heading) = rover.pose();
        assert!((heading - 350.0).abs() < 1e-9);
    }

    #[test]
    fn drive_base_records_and_faults() {
        let mut drive = SimDriveBase::new();
        drive.apply(DriveAction::stop()).unwrap();
        assert_eq!(drive.actions().len(), 1);

        drive.set_faulty(true);
        assert!(matches!(
            drive.apply(DriveAction::stop()),
            Err(NavError::HardwareFault { .. })
        ));
        assert_eq!(drive.actions().len(), 1);
    }

    #[test]
    fn proximity_dropout_is_a_fault() {
        let mut sensor = SimProximity::clear();
        let reading = sensor.sample(7).unwrap();
        assert_eq!(reading.front, 400.0);
        assert_eq!(reading.timestamp, 7);

        let handle = sensor.clone();
        handle.set_missing();
        assert!(sensor.sample(8).is_err());
    }

    #[test]
    fn location_stamps_with_caller_time() {
        let (rover, _) = rover();
        let mut loc = SimLocation::new(rover);
        assert_eq!(loc.position(99).unwrap().timestamp, 99);
        assert_eq!(loc.heading(99).unwrap().degrees, 0.0);
    }
}
