//! Point-in-time navigation snapshot for operators.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wayfinder_types::{
    Command, ExecutorStatus, GeoPoint, Heading, Position, TripState, Waypoint,
};

/// Everything the planner currently knows, as reported by `/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NavigationStatus {
    pub state: TripState,
    pub trip_id: Option<Uuid>,
    pub destination: Option<GeoPoint>,
    pub current_index: usize,
    pub route_len: usize,
    pub current_target: Option<Waypoint>,
    pub last_position: Option<Position>,
    pub last_heading: Option<Heading>,
    pub distance_m: Option<f64>,
    pub bearing_deg: Option<f64>,
    /// Eight-point compass name of `bearing_deg`.
    pub compass: Option<String>,
    pub last_command: Option<Command>,
    pub stalled: bool,
    pub manual_hold: bool,
    /// Last status record published by the executor.
    pub executor: Option<ExecutorStatus>,
}

impl NavigationStatus {
    pub fn is_navigating(&self) -> bool {
        self.state.is_active()
    }
}

impl fmt::Display for NavigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "state        {}", self.state)?;
        if let Some(dest) = self.destination {
            writeln!(f, "destination  {dest}")?;
            writeln!(
                f,
                "progress     {}/{}",
                (self.current_index + 1).min(self.route_len),
                self.route_len
            )?;
        }
        if let Some(target) = &self.current_target {
            match &target.instruction {
                Some(text) => writeln!(f, "target       {}  ({text})", target.point())?,
                None => writeln!(f, "target       {}", target.point())?,
            }
        }
        if let (Some(d), Some(b)) = (self.distance_m, self.bearing_deg) {
            let compass = self.compass.as_deref().unwrap_or("?");
            writeln!(f, "to target    {d:.1} m at {b:.0}° {compass}")?;
        }
        match self.last_position {
            Some(p) => writeln!(f, "position     {}", p.point())?,
            None => writeln!(f, "position     (none)")?,
        }
        match self.last_heading {
            Some(h) => writeln!(f, "heading      {:.0}°", h.degrees)?,
            None => writeln!(f, "heading      (none)")?,
        }
        if let Some(cmd) = self.last_command {
            writeln!(f, "command      {}", cmd.direction)?;
        }
        if let Some(exec) = self.executor {
            let ov = exec
                .override_kind
                .map(|k| format!("{k:?}"))
                .unwrap_or_else(|| "none".to_string());
            writeln!(
                f,
                "executor     {} (override: {ov}, fail-safe: {})",
                exec.effective, exec.fail_safe
            )?;
        }
        if self.stalled {
            writeln!(f, "navigation stalled")?;
        }
        if self.manual_hold {
            writeln!(f, "manual override hold active")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_types::Direction;

    #[test]
    fn idle_status_renders() {
        let text = NavigationStatus::default().to_string();
        assert!(text.contains("idle"));
        assert!(text.contains("position     (none)"));
        assert!(!text.contains("stalled"));
    }

    #[test]
    fn navigating_status_mentions_target_and_compass() {
        let status = NavigationStatus {
            state: TripState::Navigating,
            destination: Some(GeoPoint::new(0.0, 0.002)),
            current_index: 0,
            route_len: 2,
            current_target: Some(Waypoint::new(0.0, 0.001, 0).with_instruction("Turn right")),
            distance_m: Some(111.2),
            bearing_deg: Some(90.0),
            compass: Some("East".into()),
            last_command: Some(Command::new(Direction::Right, 5)),
            stalled: true,
            ..NavigationStatus::default()
        };
        assert!(status.is_navigating());
        let text = status.to_string();
        assert!(text.contains("progress     1/2"));
        assert!(text.contains("Turn right"));
        assert!(text.contains("East"));
        assert!(text.contains("command      right"));
        assert!(text.contains("navigation stalled"));
    }
}
