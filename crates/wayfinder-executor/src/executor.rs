//! [`CommandExecutor`] – the agent-side loop.
//!
//! Three cadences share one task.  The loop wakes at the sensor period and
//! runs every sub-task whose deadline has passed:
//!
//! | Cadence | Default | Work |
//! |---|---|---|
//! | sensor | 100 ms | sample proximity, run the governor, actuate on change |
//! | fetch | 500 ms | read `planner/command`, adopt if newer and not expired, fail-safe check |
//! | publish | 1 s | write proximity, status and (if attached) position/heading |
//!
//! # Adoption
//!
//! A command is adopted only when its timestamp is strictly newer than the
//! last adopted one **and** it is no older than `command_timeout_ms`.
//! Re-delivery of the same command therefore changes nothing.  Until the
//! first adoption the executor behaves as if told `stop`.
//!
//! # Fail-safe
//!
//! The fail-safe clock runs from the adopted command's own timestamp, not
//! from the moment it was fetched.  Once that command is older than
//! `command_timeout_ms` while moving, the executor stops locally and publishes
//! [`NavEvent::FailSafeStop`].  The planner only learns of it through the
//! `fail_safe` flag of the next status record.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use wayfinder_channel::{ChannelClient, ChannelSettings, Fetch, Key, NavBus, Role, SharedChannel};
use wayfinder_types::{
    Clock, Command, Direction, ExecutorStatus, NavEvent, ProximityReading, TimestampMs,
    Timestamped,
};

use crate::drivers::{DriveAction, DriveBase, LocationSource, ProximitySensor};
use crate::governor::{Governance, GovernorConfig, ProximityGovernor};
use crate::watchdog::{CommandHealth, CommandWatchdog};

const SOURCE: &str = "wayfinder-executor";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Executor timing and safety settings.  Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub sensor_ms: u64,
    pub fetch_ms: u64,
    pub publish_ms: u64,
    /// Maximum command age for adoption, and the fail-safe silence limit.
    pub command_timeout_ms: u64,
    pub governor: GovernorConfig,
    pub channel: ChannelSettings,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            sensor_ms: 100,
            fetch_ms: 500,
            publish_ms: 1_000,
            command_timeout_ms: 5_000,
            governor: GovernorConfig::default(),
            channel: ChannelSettings::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetch outcome
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Timestamp not newer than the last adopted command.
    NotNewer,
    /// Older than the command timeout.
    Expired,
}

/// What one fetch cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing readable on the channel.
    NoCommand,
    Adopted(Direction),
    Ignored(IgnoreReason),
    /// The command stream went silent; the executor stopped itself.
    FailSafe { silent_ms: u64 },
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandExecutor
// ─────────────────────────────────────────────────────────────────────────────

pub struct CommandExecutor {
    client: ChannelClient,
    clock: Arc<dyn Clock>,
    config: ExecutorConfig,
    bus: NavBus,
    drive: Box<dyn DriveBase>,
    proximity: Box<dyn ProximitySensor>,
    location: Option<Box<dyn LocationSource>>,
    governor: ProximityGovernor,
    watchdog: CommandWatchdog,
    // ── command state ────────────────────────────────────────────────────────
    adopted: Direction,
    last_applied_ts: Option<TimestampMs>,
    fail_safe: bool,
    // ── actuation state ──────────────────────────────────────────────────────
    reading: Option<ProximityReading>,
    governance: Option<Governance>,
    /// Action the drive base last accepted.
    applied_action: Option<DriveAction>,
    // ── schedule ─────────────────────────────────────────────────────────────
    next_fetch_at: Option<TimestampMs>,
    next_publish_at: Option<TimestampMs>,
}

impl CommandExecutor {
    pub fn new(
        store: Arc<dyn SharedChannel>,
        clock: Arc<dyn Clock>,
        config: ExecutorConfig,
        bus: NavBus,
        drive: Box<dyn DriveBase>,
        proximity: Box<dyn ProximitySensor>,
    ) -> Self {
        let client = ChannelClient::new(store, Role::Executor, Arc::clone(&clock), config.channel)
            .with_bus(bus.clone());
        Self {
            client,
            clock,
            governor: ProximityGovernor::new(config.governor),
            watchdog: CommandWatchdog::new(config.command_timeout_ms),
            config,
            bus,
            drive,
            proximity,
            location: None,
            adopted: Direction::Stop,
            last_applied_ts: None,
            fail_safe: false,
            reading: None,
            governance: None,
            applied_action: None,
            next_fetch_at: None,
            next_publish_at: None,
        }
    }

    /// Publish position and heading from `source` on the telemetry cadence.
    pub fn with_location(mut self, source: Box<dyn LocationSource>) -> Self {
        self.location = Some(source);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Direction of the most recently adopted command (`stop` after a
    /// fail-safe).
    pub fn adopted(&self) -> Direction {
        self.adopted
    }

    /// Direction the actuators are following right now.
    pub fn effective_direction(&self) -> Direction {
        self.governance
            .map_or(Direction::Stop, |g| g.action.motion.direction())
    }

    pub fn is_fail_safe(&self) -> bool {
        self.fail_safe
    }

    pub fn status(&self, now: TimestampMs) -> ExecutorStatus {
        ExecutorStatus {
            effective: self.effective_direction(),
            adopted: self.adopted,
            override_kind: self.governance.and_then(|g| g.override_kind),
            fail_safe: self.fail_safe,
            timestamp: now,
        }
    }

    // -------------------------------------------------------------------------
    // Cadences
    // -------------------------------------------------------------------------

    /// Run every cadence that is due.
    pub async fn step(&mut self) {
        let now = self.clock.now_ms();
        self.sense(now);
        if self.next_fetch_at.is_none_or(|at| now >= at) {
            let outcome = self.fetch(now).await;
            debug!(?outcome, "command fetch");
            self.next_fetch_at = Some(now + self.config.fetch_ms as i64);
        }
        if self.next_publish_at.is_none_or(|at| now >= at) {
            self.publish(now).await;
            self.next_publish_at = Some(now + self.config.publish_ms as i64);
        }
    }

    /// Sensor cadence: sample, govern, actuate.
    pub fn sense(&mut self, now: TimestampMs) -> Governance {
        self.reading = match self.proximity.sample(now) {
            Ok(reading) => Some(reading),
            Err(e) => {
                debug!(sensor = self.proximity.id(), error = %e, "no proximity reading");
                None
            }
        };
        self.actuate(now)
    }

    /// Fetch cadence: adopt a newer command, then check the fail-safe.
    pub async fn fetch(&mut self, now: TimestampMs) -> FetchOutcome {
        let outcome = match self.client.fetch::<Command>(Key::Command).await {
            Fetch::Value(command) => self.consider(command, now),
            _ => FetchOutcome::NoCommand,
        };

        if let CommandHealth::Expired { silent_ms } = self.watchdog.health(now) {
            if self.adopted.is_moving() {
                self.trip_fail_safe(silent_ms, now);
                return FetchOutcome::FailSafe { silent_ms };
            }
        }
        outcome
    }

    /// Publish cadence.  Write failures are absorbed by the channel client.
    pub async fn publish(&mut self, now: TimestampMs) {
        if let Some(reading) = self.reading {
            let _ = self.client.write(Key::Proximity, &reading).await;
        }
        let status = self.status(now);
        let _ = self.client.write(Key::ExecutorStatus, &status).await;

        let fix = self
            .location
            .as_mut()
            .map(|loc| (loc.id().to_string(), loc.position(now), loc.heading(now)));
        if let Some((id, position, heading)) = fix {
            match position {
                Ok(p) => {
                    let _ = self.client.write(Key::Position, &p).await;
                }
                Err(e) => warn!(source = %id, error = %e, "no position fix"),
            }
            match heading {
                Ok(h) => {
                    let _ = self.client.write(Key::Heading, &h).await;
                }
                Err(e) => warn!(source = %id, error = %e, "no heading"),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Step at the sensor period until `shutdown` turns `true`, then stop
    /// the drive base.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.sensor_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            drive = self.drive.id(),
            sensor = self.proximity.id(),
            "executor loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.step().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.drive.apply(DriveAction::stop()) {
            error!(error = %e, "could not stop drive base on shutdown");
        }
        info!("executor loop stopped");
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn consider(&mut self, command: Command, now: TimestampMs) -> FetchOutcome {
        if self
            .last_applied_ts
            .is_some_and(|last| command.timestamp <= last)
        {
            return FetchOutcome::Ignored(IgnoreReason::NotNewer);
        }
        if !command.is_fresh(now, self.config.command_timeout_ms) {
            debug!(
                age_ms = now - command.timestamp,
                direction = %command.direction,
                "ignoring expired command"
            );
            return FetchOutcome::Ignored(IgnoreReason::Expired);
        }

        self.last_applied_ts = Some(command.timestamp);
        self.watchdog.feed(command.timestamp.min(now));
        if self.adopted != command.direction || self.fail_safe {
            let age_ms = now - command.timestamp;
            info!(direction = %command.direction, age_ms, "command adopted");
        }
        self.adopted = command.direction;
        self.fail_safe = false;
        self.actuate(now);
        FetchOutcome::Adopted(command.direction)
    }

    fn trip_fail_safe(&mut self, silent_ms: u64, now: TimestampMs) {
        let last_direction = self.adopted;
        self.adopted = Direction::Stop;
        self.fail_safe = true;
        warn!(
            %last_direction,
            silent_ms,
            timeout_ms = self.watchdog.timeout_ms(),
            "fail-safe stop: no fresh command"
        );
        self.bus.publish(
            SOURCE,
            NavEvent::FailSafeStop {
                last_direction,
                silent_ms,
            },
        );
        self.actuate(now);
    }

    fn actuate(&mut self, now: TimestampMs) -> Governance {
        let governance = self
            .governor
            .evaluate(self.adopted, self.reading.as_ref(), now);

        let previous = self.governance.and_then(|g| g.override_kind);
        if governance.override_kind != previous {
            if let Some(kind) = governance.override_kind {
                let front_cm = self.reading.map_or(f32::NAN, |r| r.front);
                warn!(?kind, front_cm, action = %governance.action, "proximity override");
                self.bus.publish(SOURCE, NavEvent::GovernorOverride { kind, front_cm });
            } else {
                debug!("proximity override cleared");
            }
        }
        self.governance = Some(governance);

        if self.applied_action != Some(governance.action) {
            match self.drive.apply(governance.action) {
                Ok(()) => {
                    debug!(action = %governance.action, "drive action applied");
                    self.applied_action = Some(governance.action);
                }
                Err(e) => {
                    error!(drive = self.drive.id(), error = %e, "drive action rejected");
                    self.applied_action = None;
                }
            }
        }
        governance
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
