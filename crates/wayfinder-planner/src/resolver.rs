//! [`BearingResolver`] – turns geometry into one categorical command.
//!
//! | Condition | Direction |
//! |---|---|
//! | distance ≤ arrival threshold | `arrived` |
//! | \|difference\| ≤ heading tolerance | `forward` |
//! | difference > 0 | `right` |
//! | difference < 0 | `left` |
//!
//! where *difference* is `bearing − heading` wrapped into `(-180, 180]`.  The
//! resolver never fails: a missing heading is read as 0°.

use serde::{Deserialize, Serialize};
use wayfinder_types::{Direction, GeoPoint};

use crate::geo::{forward_azimuth_deg, haversine_m, signed_difference};

/// How the sign of the heading difference maps to a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnConvention {
    /// Target clockwise of heading → turn right.
    PositiveIsRight,
    PositiveIsLeft,
}

/// The convention used by every resolver in this crate.
pub const TURN_CONVENTION: TurnConvention = TurnConvention::PositiveIsRight;

impl TurnConvention {
    fn turn_for(self, difference_deg: f64) -> Direction {
        let clockwise = difference_deg > 0.0;
        match (self, clockwise) {
            (TurnConvention::PositiveIsRight, true) | (TurnConvention::PositiveIsLeft, false) => {
                Direction::Right
            }
            _ => Direction::Left,
        }
    }
}

/// Full output of one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub direction: Direction,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub difference_deg: f64,
}

/// Pure steering decision from position, heading and target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BearingResolver {
    arrival_threshold_m: f64,
    heading_tolerance_deg: f64,
}

impl BearingResolver {
    pub fn new(arrival_threshold_m: f64, heading_tolerance_deg: f64) -> Self {
        Self {
            arrival_threshold_m,
            heading_tolerance_deg: heading_tolerance_deg.abs(),
        }
    }

    pub fn arrival_threshold_m(&self) -> f64 {
        self.arrival_threshold_m
    }

    /// Resolve the command for `position` heading `heading_deg` toward `target`.
    pub fn resolve(
        &self,
        position: GeoPoint,
        heading_deg: Option<f64>,
        target: GeoPoint,
    ) -> Resolution {
        let distance_m = haversine_m(position, target);
        let bearing_deg = forward_azimuth_deg(position, target);
        let difference_deg = signed_difference(bearing_deg, heading_deg.unwrap_or(0.0));

        let direction = if distance_m <= self.arrival_threshold_m {
            Direction::Arrived
        } else {
            self.steer(difference_deg)
        };

        Resolution {
            direction,
            distance_m,
            bearing_deg,
            difference_deg,
        }
    }

    /// Steering for an already wrapped heading difference.
    pub fn steer(&self, difference_deg: f64) -> Direction {
        if difference_deg.abs() <= self.heading_tolerance_deg {
            Direction::Forward
        } else {
            TURN_CONVENTION.turn_for(difference_deg)
        }
    }

    /// `true` when `a` and `b` are close enough to count as the same stop.
    pub fn same_place(&self, a: GeoPoint, b: GeoPoint) -> bool {
        haversine_m(a, b) <= self.arrival_threshold_m
    }
}

impl Default for BearingResolver {
    fn default() -> Self {
        Self::new(5.0, 15.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> GeoPoint {
        GeoPoint::new(0.0, 0.0)
    }

    #[test]
    fn east_target_with_north_heading_turns_right() {
        let r = BearingResolver::default();
        let res = r.resolve(origin(), Some(0.0), GeoPoint::new(0.0, 0.001));
        assert!((res.bearing_deg - 90.0).abs() < 1e-6);
        assert_eq!(res.direction, Direction::Right);
        assert_eq!(TURN_CONVENTION, TurnConvention::PositiveIsRight);
    }

    #[test]
    fn missing_heading_reads_as_north() {
        let r = BearingResolver::default();
        let with_none = r.resolve(origin(), None, GeoPoint::new(0.0, -0.001));
        assert_eq!(with_none.direction, Direction::Left);
        assert!((with_none.difference_deg + 90.0).abs() < 1e-6);
    }

    #[test]
    fn aligned_heading_goes_forward() {
        let r = BearingResolver::default();
        let res = r.resolve(origin(), Some(85.0), GeoPoint::new(0.0, 0.001));
        assert_eq!(res.direction, Direction::Forward);
    }

    #[test]
    fn tolerance_band_is_inclusive() {
        let r = BearingResolver::default();
        assert_eq!(r.steer(15.0), Direction::Forward);
        assert_eq!(r.steer(-15.0), Direction::Forward);
        assert_eq!(r.steer(15.001), Direction::Right);
        assert_eq!(r.steer(-15.001), Direction::Left);
        assert_eq!(r.steer(180.0), Direction::Right);
    }

    #[test]
    fn within_threshold_is_arrived() {
        let r = BearingResolver::default();
        // ~4 m north of the origin
        let target = GeoPoint::new(4.0 / 111_195.0, 0.0);
        let res = r.resolve(origin(), Some(270.0), target);
        assert!(res.distance_m < 5.0);
        assert_eq!(res.direction, Direction::Arrived);
    }

    #[test]
    fn just_outside_threshold_steers() {
        let r = BearingResolver::default();
        let target = GeoPoint::new(6.0 / 111_195.0, 0.0);
        let res = r.resolve(origin(), Some(0.0), target);
        assert_eq!(res.direction, Direction::Forward);
    }

    #[test]
    fn same_place_uses_threshold() {
        let r = BearingResolver::default();
        assert!(r.same_place(origin(), GeoPoint::new(0.00001, 0.0)));
        assert!(!r.same_place(origin(), GeoPoint::new(0.001, 0.0)));
    }
}
