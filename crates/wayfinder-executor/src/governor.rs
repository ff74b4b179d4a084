//! [`ProximityGovernor`] – local, highest-priority safety override.
//!
//! Runs on every sensor sample and decides what the drive base actually does
//! given the adopted command.  Rules, first match wins:
//!
//! | # | Condition | Action | Override |
//! |---|---|---|---|
//! | 1 | front < `stop_distance_cm` | brake, reverse briefly, hold stop until clear | `emergency_backup` |
//! | 2 | front < `slow_down_distance_cm` | adopted direction at half speed | `slow_down` |
//! | 3 | one side < `side_threshold_cm`, other side clear, moving | steer away for `side_correction_ms` | `steer_left` / `steer_right` |
//! | 4 | otherwise | adopted direction unchanged | none |
//!
//! The emergency manoeuvre is timed: once started it runs to completion no
//! matter what the adopted command or the sensors say.  A missing reading
//! lets the adopted command through, except that in-progress manoeuvres
//! continue.

use serde::{Deserialize, Serialize};
use wayfinder_types::{Direction, OverrideKind, ProximityReading, TimestampMs};

use crate::drivers::{DriveAction, Motion};

/// Distances in centimetres, durations in milliseconds, speeds normalised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub stop_distance_cm: f32,
    pub slow_down_distance_cm: f32,
    pub side_threshold_cm: f32,
    pub brake_ms: u64,
    pub reverse_ms: u64,
    pub reverse_speed: f32,
    pub side_correction_ms: u64,
    pub correction_speed: f32,
    /// Speed for `forward`.
    pub cruise_speed: f32,
    /// Speed for `left` / `right`.
    pub turn_speed: f32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            stop_distance_cm: 40.0,
            slow_down_distance_cm: 100.0,
            side_threshold_cm: 25.0,
            brake_ms: 150,
            reverse_ms: 400,
            reverse_speed: 0.5,
            side_correction_ms: 600,
            correction_speed: 0.6,
            cruise_speed: 1.0,
            turn_speed: 0.6,
        }
    }
}

/// The governor's decision for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Governance {
    pub action: DriveAction,
    pub override_kind: Option<OverrideKind>,
}

impl Governance {
    fn pass(action: DriveAction) -> Self {
        Self {
            action,
            override_kind: None,
        }
    }

    fn overridden(action: DriveAction, kind: OverrideKind) -> Self {
        Self {
            action,
            override_kind: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Manoeuvre {
    None,
    Backup { started_at: TimestampMs },
    /// Backup finished; stay stopped until the front clears.
    Holding,
    SideCorrection { kind: OverrideKind, until: TimestampMs },
}

/// Stateful proximity governor.
#[derive(Debug, Clone)]
pub struct ProximityGovernor {
    config: GovernorConfig,
    manoeuvre: Manoeuvre,
}

impl ProximityGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            manoeuvre: Manoeuvre::None,
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// `true` while an emergency manoeuvre is running.
    pub fn in_emergency(&self) -> bool {
        matches!(self.manoeuvre, Manoeuvre::Backup { .. } | Manoeuvre::Holding)
    }

    /// Drive action for `adopted` when nothing interferes.
    pub fn nominal(&self, adopted: Direction) -> DriveAction {
        match adopted {
            Direction::Forward => DriveAction::new(Motion::Forward, self.config.cruise_speed),
            Direction::Left => DriveAction::new(Motion::Left, self.config.turn_speed),
            Direction::Right => DriveAction::new(Motion::Right, self.config.turn_speed),
            Direction::Stop | Direction::Arrived => DriveAction::stop(),
        }
    }

    /// Decide the drive action for this sample.
    pub fn evaluate(
        &mut self,
        adopted: Direction,
        reading: Option<&ProximityReading>,
        now: TimestampMs,
    ) -> Governance {
        if let Some(g) = self.continue_emergency(reading, now) {
            return g;
        }

        let nominal = self.nominal(adopted);

        if let Some(r) = reading {
            // Rule 1
            if r.front < self.config.stop_distance_cm {
                self.manoeuvre = Manoeuvre::Backup { started_at: now };
                return Governance::overridden(DriveAction::stop(), OverrideKind::EmergencyBackup);
            }
            // Rule 2
            if r.front < self.config.slow_down_distance_cm {
                self.manoeuvre = Manoeuvre::None;
                let slowed = DriveAction::new(nominal.motion, nominal.speed * 0.5);
                return Governance::overridden(slowed, OverrideKind::SlowDown);
            }
        }

        // Rule 3, continued from an earlier sample.
        if let Manoeuvre::SideCorrection { kind, until } = self.manoeuvre {
            if now < until && adopted.is_moving() {
                return Governance::overridden(self.correction(kind), kind);
            }
            self.manoeuvre = Manoeuvre::None;
        }

        let Some(r) = reading else {
            return Governance::pass(nominal);
        };

        // Rule 3, fresh trigger.
        if adopted.is_moving() {
            let side = self.config.side_threshold_cm;
            let kind = if r.left < side && r.right >= side {
                Some(OverrideKind::SteerRight)
            } else if r.right < side && r.left >= side {
                Some(OverrideKind::SteerLeft)
            } else {
                None
            };
            if let Some(kind) = kind {
                self.manoeuvre = Manoeuvre::SideCorrection {
                    kind,
                    until: now + self.config.side_correction_ms as i64,
                };
                return Governance::overridden(self.correction(kind), kind);
            }
        }

        // Rule 4
        Governance::pass(nominal)
    }

    fn continue_emergency(
        &mut self,
        reading: Option<&ProximityReading>,
        now: TimestampMs,
    ) -> Option<Governance> {
        if let Manoeuvre::Backup { started_at } = self.manoeuvre {
            let elapsed = (now - started_at).max(0) as u64;
            if elapsed < self.config.brake_ms {
                return Some(Governance::overridden(
                    DriveAction::stop(),
                    OverrideKind::EmergencyBackup,
                ));
            }
            if elapsed < self.config.brake_ms + self.config.reverse_ms {
                return Some(Governance::overridden(
                    DriveAction::new(Motion::Reverse, self.config.reverse_speed),
                    OverrideKind::EmergencyBackup,
                ));
            }
            self.manoeuvre = Manoeuvre::Holding;
        }

        if self.manoeuvre == Manoeuvre::Holding {
            let clear = reading.is_some_and(|r| r.front >= self.config.stop_distance_cm);
            if !clear {
                return Some(Governance::overridden(
                    DriveAction::stop(),
                    OverrideKind::EmergencyBackup,
                ));
            }
            self.manoeuvre = Manoeuvre::None;
        }
        None
    }

    fn correction(&self, kind: OverrideKind) -> DriveAction {
        let motion = match kind {
            OverrideKind::SteerLeft => Motion::Left,
            _ => Motion::Right,
        };
        DriveAction::new(motion, self.config.correction_speed)
    }
}

impl Default for ProximityGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(front: f32, left: f32, right: f32) -> ProximityReading {
        ProximityReading {
            front,
            left,
            right,
            timestamp: 0,
        }
    }

    fn clear() -> ProximityReading {
        reading(400.0, 400.0, 400.0)
    }

    #[test]
    fn clear_path_passes_adopted_command() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Forward, Some(&clear()), 0);
        assert_eq!(g.action, DriveAction::new(Motion::Forward, 1.0));
        assert_eq!(g.override_kind, None);

        let g = gov.evaluate(Direction::Arrived, Some(&clear()), 0);
        assert_eq!(g.action, DriveAction::stop());
    }

    #[test]
    fn obstacle_ahead_brakes_reverses_then_holds() {
        let mut gov = ProximityGovernor::default();
        let close = reading(30.0, 400.0, 400.0);

        let g = gov.evaluate(Direction::Forward, Some(&close), 1_000);
        assert_eq!(g.action.motion, Motion::Stop);
        assert_eq!(g.override_kind, Some(OverrideKind::EmergencyBackup));

        // Braking phase ignores the sensors.
        let g = gov.evaluate(Direction::Forward, Some(&clear()), 1_100);
        assert_eq!(g.action.motion, Motion::Stop);

        let g = gov.evaluate(Direction::Forward, Some(&close), 1_200);
        assert_eq!(g.action, DriveAction::new(Motion::Reverse, 0.5));

        // Reverse window over, still blocked: hold.
        let g = gov.evaluate(Direction::Forward, Some(&close), 1_600);
        assert_eq!(g.action.motion, Motion::Stop);
        assert!(gov.in_emergency());

        // Missing reading keeps holding.
        let g = gov.evaluate(Direction::Forward, None, 1_700);
        assert_eq!(g.override_kind, Some(OverrideKind::EmergencyBackup));

        // Cleared: back to the adopted command.
        let g = gov.evaluate(Direction::Forward, Some(&clear()), 1_800);
        assert_eq!(g.action.motion, Motion::Forward);
        assert_eq!(g.override_kind, None);
        assert!(!gov.in_emergency());
    }

    #[test]
    fn stop_distance_boundary_is_not_an_emergency() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Forward, Some(&reading(40.0, 400.0, 400.0)), 0);
        assert_eq!(g.override_kind, Some(OverrideKind::SlowDown));
    }

    #[test]
    fn obstacle_in_slow_band_halves_speed() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Forward, Some(&reading(80.0, 400.0, 400.0)), 0);
        assert_eq!(g.action, DriveAction::new(Motion::Forward, 0.5));
        assert_eq!(g.override_kind, Some(OverrideKind::SlowDown));

        let g = gov.evaluate(Direction::Left, Some(&reading(80.0, 400.0, 400.0)), 0);
        assert_eq!(g.action, DriveAction::new(Motion::Left, 0.3));
    }

    #[test]
    fn close_left_side_steers_right_for_window() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Forward, Some(&reading(400.0, 20.0, 100.0)), 0);
        assert_eq!(g.action, DriveAction::new(Motion::Right, 0.6));
        assert_eq!(g.override_kind, Some(OverrideKind::SteerRight));

        // Still inside the window even though the side cleared.
        let g = gov.evaluate(Direction::Forward, Some(&clear()), 500);
        assert_eq!(g.override_kind, Some(OverrideKind::SteerRight));

        let g = gov.evaluate(Direction::Forward, Some(&clear()), 600);
        assert_eq!(g.action.motion, Motion::Forward);
        assert_eq!(g.override_kind, None);
    }

    #[test]
    fn both_sides_close_is_not_corrected() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Forward, Some(&reading(400.0, 20.0, 20.0)), 0);
        assert_eq!(g.override_kind, None);
    }

    #[test]
    fn side_rule_ignored_when_stopped() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Stop, Some(&reading(400.0, 400.0, 10.0)), 0);
        assert_eq!(g.action, DriveAction::stop());
        assert_eq!(g.override_kind, None);
    }

    #[test]
    fn missing_reading_passes_through() {
        let mut gov = ProximityGovernor::default();
        let g = gov.evaluate(Direction::Right, None, 0);
        assert_eq!(g.action, DriveAction::new(Motion::Right, 0.6));
        assert_eq!(g.override_kind, None);
    }
}
