//! `wayfinder-planner` – the navigation decision loop.
//!
//! Reads position and heading off the shared channel, decides a movement
//! command every tick and writes it back.  It never talks to the executor
//! directly.
//!
//! # Modules
//!
//! - [`geo`] – haversine distance, forward azimuth, heading difference and
//!   compass naming.
//! - [`resolver`] – [`BearingResolver`]: position + heading + target →
//!   [`Direction`][wayfinder_types::Direction].  The turn sign convention is
//!   pinned by [`TURN_CONVENTION`].
//! - [`trip`] – [`Trip`]: route, current index and lifecycle state.
//! - [`planner`] – [`Planner`]: the tick, stall detection, manual override
//!   and the task loop behind a [`PlannerHandle`].
//! - [`status`] – [`NavigationStatus`], the operator snapshot.
//! - [`config`] – [`PlannerConfig`].
//! - [`telemetry`] – [`init_tracing`], the process-wide tracing setup shared
//!   with the CLI.

pub mod config;
pub mod geo;
pub mod planner;
pub mod resolver;
pub mod status;
pub mod telemetry;
pub mod trip;

pub use config::PlannerConfig;
pub use planner::{Planner, PlannerHandle, PlannerRequest, SkipReason, TickOutcome};
pub use resolver::{BearingResolver, Resolution, TURN_CONVENTION, TurnConvention};
pub use status::NavigationStatus;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use trip::{Trip, TripStep};
