//! `wayfinder-executor` – the agent-side loop.
//!
//! Fetches movement commands from the shared channel, adopts them under a
//! strict freshness rule, and drives the motors through a proximity
//! governor that always has the last word.  Telemetry flows the other way:
//! proximity, executor status and (optionally) position and heading are
//! written back on a fixed cadence.
//!
//! # Modules
//!
//! - [`drivers`] – [`DriveBase`], [`ProximitySensor`] and [`LocationSource`],
//!   the hardware seams.
//! - [`governor`] – [`ProximityGovernor`]: emergency backup, slow-down band
//!   and side correction.
//! - [`watchdog`] – [`CommandWatchdog`], the fail-safe timer.
//! - [`executor`] – [`CommandExecutor`], the loop that ties them together.
//! - [`sim`] – headless drivers backed by a kinematic [`SimRover`].

pub mod drivers;
pub mod executor;
pub mod governor;
pub mod sim;
pub mod watchdog;

pub use drivers::{DriveAction, DriveBase, LocationSource, Motion, ProximitySensor};
pub use executor::{CommandExecutor, ExecutorConfig, FetchOutcome, IgnoreReason};
pub use governor::{Governance, GovernorConfig, ProximityGovernor};
pub use sim::{RoverSpec, SimDriveBase, SimLocation, SimProximity, SimRover};
pub use watchdog::{CommandHealth, CommandWatchdog};
