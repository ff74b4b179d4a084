//! [`Trip`] – the planner's exclusively owned trip state.
//!
//! A trip walks its *route* (the supplied waypoints, then the destination
//! unless the last waypoint already sits on it) one target at a time.
//! `current_index` only ever moves forward.
//!
//! ```text
//!   Idle ──start──▶ Routing ──fresh fix──▶ Navigating ──final arrived──▶ Arrived
//!                      │                       │
//!                      └────────stop───────────┴──────────────────────▶ Stopped
//! ```

use uuid::Uuid;
use wayfinder_types::{Direction, GeoPoint, NavError, TimestampMs, TripRecord, TripState, Waypoint};

use crate::resolver::{BearingResolver, Resolution};

/// What a navigation step decided.
#[derive(Debug, Clone, PartialEq)]
pub enum TripStep {
    /// Still travelling toward the current target.
    Steer(Resolution),
    /// An intermediate target was reached and the trip moved on.  `next` is
    /// the resolution against the new target.
    Advanced {
        reached: usize,
        instruction: Option<String>,
        next: Resolution,
    },
    /// The final target was reached; the trip is over.
    Arrived(Resolution),
}

impl TripStep {
    /// The command this step asks to be written, if any.
    ///
    /// An advance whose next target is also within reach writes nothing; the
    /// following tick handles it.
    pub fn command(&self) -> Option<Direction> {
        match self {
            TripStep::Steer(r) => Some(r.direction),
            TripStep::Advanced { next, .. } if next.direction != Direction::Arrived => {
                Some(next.direction)
            }
            TripStep::Advanced { .. } => None,
            TripStep::Arrived(_) => Some(Direction::Arrived),
        }
    }

    /// The resolution that describes where the agent now stands.
    pub fn resolution(&self) -> &Resolution {
        match self {
            TripStep::Steer(r) | TripStep::Arrived(r) => r,
            TripStep::Advanced { next, .. } => next,
        }
    }
}

/// One trip from start to arrival or stop.
#[derive(Debug, Clone)]
pub struct Trip {
    id: Uuid,
    destination: GeoPoint,
    route: Vec<Waypoint>,
    waypoint_count: usize,
    current_index: usize,
    state: TripState,
    started_at: TimestampMs,
}

impl Trip {
    /// Create a trip in [`TripState::Routing`].
    ///
    /// # Errors
    ///
    /// * [`NavError::EmptyRoute`] – `waypoints` is empty.
    /// * [`NavError::InvalidCoordinate`] – a point is not finite or out of
    ///   range.
    pub fn new(
        destination: GeoPoint,
        waypoints: Vec<Waypoint>,
        resolver: &BearingResolver,
        now: TimestampMs,
    ) -> Result<Self, NavError> {
        if waypoints.is_empty() {
            return Err(NavError::EmptyRoute);
        }
        validate(destination)?;
        for wp in &waypoints {
            validate(wp.point())?;
        }

        let waypoint_count = waypoints.len();
        let mut route = waypoints;
        let ends_on_destination = route
            .last()
            .is_some_and(|last| resolver.same_place(last.point(), destination));
        if !ends_on_destination {
            route.push(Waypoint::new(
                destination.lat,
                destination.lng,
                waypoint_count as u32,
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            destination,
            route,
            waypoint_count,
            current_index: 0,
            state: TripState::Routing,
            started_at: now,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TripState {
        self.state
    }

    pub fn destination(&self) -> GeoPoint {
        self.destination
    }

    /// The traversal sequence.
    pub fn route(&self) -> &[Waypoint] {
        &self.route
    }

    /// Number of waypoints originally supplied.
    pub fn waypoint_count(&self) -> usize {
        self.waypoint_count
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_target(&self) -> Option<&Waypoint> {
        self.route.get(self.current_index)
    }

    pub fn is_final_target(&self) -> bool {
        self.current_index + 1 >= self.route.len()
    }

    pub fn started_at(&self) -> TimestampMs {
        self.started_at
    }

    /// Leave `Routing` once the first fresh position/heading pair is in.
    pub fn begin_navigating(&mut self) {
        if self.state == TripState::Routing {
            self.state = TripState::Navigating;
        }
    }

    /// Terminate the trip.  Has no effect once arrived.
    pub fn stop(&mut self) {
        if self.state.is_active() {
            self.state = TripState::Stopped;
        }
    }

    /// Resolve against the current target and apply arrival.
    pub fn step(
        &mut self,
        resolver: &BearingResolver,
        position: GeoPoint,
        heading_deg: Option<f64>,
    ) -> TripStep {
        let target = self.target_point();
        let resolution = resolver.resolve(position, heading_deg, target);
        if resolution.direction != Direction::Arrived {
            return TripStep::Steer(resolution);
        }

        if self.is_final_target() {
            self.state = TripState::Arrived;
            return TripStep::Arrived(resolution);
        }

        let reached = self.current_index;
        let instruction = self.route[reached].instruction.clone();
        self.current_index += 1;
        let next = resolver.resolve(position, heading_deg, self.target_point());
        TripStep::Advanced {
            reached,
            instruction,
            next,
        }
    }

    /// Snapshot for the `planner/trip` key.
    pub fn record(&self, now: TimestampMs) -> TripRecord {
        TripRecord {
            trip_id: self.id,
            state: self.state,
            destination: self.destination,
            current_index: self.current_index,
            route_len: self.route.len(),
            started_at: self.started_at,
            timestamp: now,
        }
    }

    fn target_point(&self) -> GeoPoint {
        self.current_target()
            .map_or(self.destination, Waypoint::point)
    }
}

fn validate(p: GeoPoint) -> Result<(), NavError> {
    let ok = p.lat.is_finite()
        && p.lng.is_finite()
        && (-90.0..=90.0).contains(&p.lat)
        && (-180.0..=180.0).contains(&p.lng);
    if ok {
        Ok(())
    } else {
        Err(NavError::InvalidCoordinate(p.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Metres to degrees of latitude.
    fn m(metres: f64) -> f64 {
        metres / 111_195.0
    }

    fn trip(dest: GeoPoint, wps: Vec<Waypoint>) -> Trip {
        Trip::new(dest, wps, &BearingResolver::default(), 0).expect("valid trip")
    }

    #[test]
    fn empty_waypoints_rejected() {
        let err = Trip::new(
            GeoPoint::new(0.0, 0.0),
            vec![],
            &BearingResolver::default(),
            0,
        )
        .unwrap_err();
        assert_eq!(err, NavError::EmptyRoute);
    }

    #[test]
    fn out_of_range_coordinate_rejected() {
        let err = Trip::new(
            GeoPoint::new(91.0, 0.0),
            vec![Waypoint::new(0.0, 0.0, 0)],
            &BearingResolver::default(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, NavError::InvalidCoordinate(_)));
    }

    #[test]
    fn destination_appended_when_distinct() {
        let t = trip(
            GeoPoint::new(m(200.0), 0.0),
            vec![Waypoint::new(m(100.0), 0.0, 0)],
        );
        assert_eq!(t.route().len(), 2);
        assert_eq!(t.waypoint_count(), 1);
        assert_eq!(t.state(), TripState::Routing);
    }

    #[test]
    fn destination_not_duplicated() {
        let dest = GeoPoint::new(m(100.0), 0.0);
        let t = trip(dest, vec![Waypoint::new(m(101.0), 0.0, 0)]);
        assert_eq!(t.route().len(), 1);
    }

    #[test]
    fn intermediate_arrival_advances_by_one() {
        let mut t = trip(
            GeoPoint::new(m(200.0), 0.0),
            vec![Waypoint::new(m(2.0), 0.0, 0).with_instruction("Head north")],
        );
        t.begin_navigating();
        let step = t.step(&BearingResolver::default(), GeoPoint::new(0.0, 0.0), Some(0.0));
        match &step {
            TripStep::Advanced {
                reached,
                instruction,
                next,
            } => {
                assert_eq!(*reached, 0);
                assert_eq!(instruction.as_deref(), Some("Head north"));
                assert_eq!(next.direction, Direction::Forward);
            }
            other => panic!("expected advance, got {other:?}"),
        }
        assert_eq!(step.command(), Some(Direction::Forward));
        assert_eq!(t.current_index(), 1);
        assert_eq!(t.state(), TripState::Navigating);
    }

    #[test]
    fn advancing_onto_a_reached_target_writes_nothing() {
        let mut t = trip(
            GeoPoint::new(m(200.0), 0.0),
            vec![
                Waypoint::new(m(1.0), 0.0, 0),
                Waypoint::new(m(2.0), 0.0, 1),
            ],
        );
        t.begin_navigating();
        let resolver = BearingResolver::default();
        let step = t.step(&resolver, GeoPoint::new(0.0, 0.0), Some(0.0));
        assert_eq!(step.command(), None);
        assert_eq!(t.current_index(), 1);

        // The next step moves on again, still one index at a time.
        let step = t.step(&resolver, GeoPoint::new(0.0, 0.0), Some(0.0));
        assert!(matches!(step, TripStep::Advanced { reached: 1, .. }));
        assert_eq!(t.current_index(), 2);
    }

    #[test]
    fn final_arrival_finishes_trip() {
        let mut t = trip(GeoPoint::new(m(4.0), 0.0), vec![Waypoint::new(m(4.0), 0.0, 0)]);
        t.begin_navigating();
        let step = t.step(&BearingResolver::default(), GeoPoint::new(0.0, 0.0), None);
        assert!(matches!(step, TripStep::Arrived(_)));
        assert_eq!(step.command(), Some(Direction::Arrived));
        assert_eq!(t.state(), TripState::Arrived);
    }

    #[test]
    fn stop_is_terminal_and_does_not_undo_arrival() {
        let mut t = trip(GeoPoint::new(m(4.0), 0.0), vec![Waypoint::new(m(4.0), 0.0, 0)]);
        t.stop();
        assert_eq!(t.state(), TripState::Stopped);

        let mut arrived = trip(GeoPoint::new(m(4.0), 0.0), vec![Waypoint::new(m(4.0), 0.0, 0)]);
        arrived.step(&BearingResolver::default(), GeoPoint::new(0.0, 0.0), None);
        arrived.stop();
        assert_eq!(arrived.state(), TripState::Arrived);
    }

    #[test]
    fn record_reflects_progress() {
        let mut t = trip(
            GeoPoint::new(m(200.0), 0.0),
            vec![Waypoint::new(m(2.0), 0.0, 0)],
        );
        t.begin_navigating();
        t.step(&BearingResolver::default(), GeoPoint::new(0.0, 0.0), Some(0.0));
        let rec = t.record(1_234);
        assert_eq!(rec.trip_id, t.id());
        assert_eq!(rec.current_index, 1);
        assert_eq!(rec.route_len, 2);
        assert_eq!(rec.state, TripState::Navigating);
        assert_eq!(rec.timestamp, 1_234);
    }
}
