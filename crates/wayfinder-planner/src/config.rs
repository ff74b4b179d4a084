//! Planner tuning.  All durations are milliseconds.

use serde::{Deserialize, Serialize};
use wayfinder_channel::ChannelSettings;

use crate::resolver::BearingResolver;

/// Configuration bundle for [`Planner`][crate::Planner].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Period of the decision loop.
    pub tick_ms: u64,
    /// Maximum age of a position or heading before it is ignored.
    pub telemetry_staleness_ms: u64,
    /// Silence after which an active trip is reported as stalled.
    pub command_timeout_ms: u64,
    /// How long autonomous writes pause after a manual command.
    pub manual_override_hold_ms: u64,
    /// Distance at which a target counts as reached.
    pub arrival_threshold_m: f64,
    /// Half-width of the "straight ahead" band.
    pub heading_tolerance_deg: f64,
    pub channel: ChannelSettings,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 2_000,
            telemetry_staleness_ms: 5_000,
            command_timeout_ms: 5_000,
            manual_override_hold_ms: 10_000,
            arrival_threshold_m: 5.0,
            heading_tolerance_deg: 15.0,
            channel: ChannelSettings::default(),
        }
    }
}

impl PlannerConfig {
    pub fn resolver(&self) -> BearingResolver {
        BearingResolver::new(self.arrival_threshold_m, self.heading_tolerance_deg)
    }
}
