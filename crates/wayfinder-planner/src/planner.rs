//! [`Planner`] – the trip state machine and its decision loop.
//!
//! Each tick:
//!
//! 1. **Read** the latest position and heading from the shared channel.
//! 2. **Gate** on freshness: a stale or missing position skips the tick
//!    without writing anything.
//! 3. **Resolve** the current target with the [`BearingResolver`] and apply
//!    arrival (advance the index or finish the trip).
//! 4. **Write** the resulting command with a strictly increasing timestamp.
//!
//! # Stall signal
//!
//! When an active trip has written no command for longer than
//! `command_timeout_ms`, the planner raises [`NavEvent::NavigationStalled`]
//! once and keeps ticking.  The next successful write raises
//! [`NavEvent::NavigationResumed`].
//!
//! # Terminal commands
//!
//! `arrived` and an operator `stop` are written once per event.  If that
//! write fails the command stays pending and every later tick retries it,
//! ahead of anything else, until it lands or a newer command supersedes it.
//!
//! # Manual override
//!
//! [`Planner::manual`] writes one operator command and suspends autonomous
//! writes for `manual_override_hold_ms`.  Ticks inside the hold still read
//! telemetry so `/status` stays current.
//!
//! # Running
//!
//! [`Planner::spawn`] moves the planner into a tokio task and returns a
//! [`PlannerHandle`] through which operator requests are serialised with the
//! tick schedule, so a request never interleaves with a tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wayfinder_channel::{ChannelClient, Key, NavBus, Role, SharedChannel};
use wayfinder_types::{
    Clock, Command, Direction, ExecutorStatus, GeoPoint, Heading, NavError, NavEvent, Position,
    TimestampMs, Timestamped, TripState, Waypoint,
};

use crate::config::PlannerConfig;
use crate::geo::compass_point;
use crate::resolver::{BearingResolver, Resolution};
use crate::status::NavigationStatus;
use crate::trip::{Trip, TripStep};

const SOURCE: &str = "wayfinder-planner";

// ─────────────────────────────────────────────────────────────────────────────
// Tick outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Why a tick wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Position missing or older than the staleness window.
    StalePosition,
    /// Still routing and no fresh heading yet.
    AwaitingHeading,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No active trip.
    Idle,
    /// Inside a manual-override hold.
    ManualHold,
    Skipped(SkipReason),
    /// Still travelling; `direction` was issued.
    Steered(Direction),
    /// An intermediate target was reached.  `next` is the command issued
    /// toward the following target, if any was.
    WaypointReached {
        index: usize,
        next: Option<Direction>,
    },
    /// The final target was reached and `arrived` was issued.
    Arrived,
}

// ─────────────────────────────────────────────────────────────────────────────
// Planner
// ─────────────────────────────────────────────────────────────────────────────

/// Planner-side owner of the trip and the `planner/*` keys.
pub struct Planner {
    client: ChannelClient,
    clock: Arc<dyn Clock>,
    config: PlannerConfig,
    resolver: BearingResolver,
    bus: NavBus,
    trip: Option<Trip>,
    // ── command bookkeeping ──────────────────────────────────────────────────
    /// Timestamp of the last command this planner attempted to write.
    last_command_ts: Option<TimestampMs>,
    last_command: Option<Command>,
    /// Clock time of the last successful command write.
    last_write_at: Option<TimestampMs>,
    /// Terminal command whose write has not landed yet.
    pending_terminal: Option<Direction>,
    stalled: bool,
    manual_hold_until: Option<TimestampMs>,
    // ── observations ─────────────────────────────────────────────────────────
    last_position: Option<Position>,
    last_heading: Option<Heading>,
    last_resolution: Option<Resolution>,
    executor_status: Option<ExecutorStatus>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn SharedChannel>,
        clock: Arc<dyn Clock>,
        config: PlannerConfig,
        bus: NavBus,
    ) -> Self {
        let client = ChannelClient::new(store, Role::Planner, Arc::clone(&clock), config.channel)
            .with_bus(bus.clone());
        Self {
            client,
            clock,
            resolver: config.resolver(),
            config,
            bus,
            trip: None,
            last_command_ts: None,
            last_command: None,
            last_write_at: None,
            pending_terminal: None,
            stalled: false,
            manual_hold_until: None,
            last_position: None,
            last_heading: None,
            last_resolution: None,
            executor_status: None,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn bus(&self) -> NavBus {
        self.bus.clone()
    }

    pub fn trip(&self) -> Option<&Trip> {
        self.trip.as_ref()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Terminal command still waiting to be written, if any.
    pub fn pending_terminal(&self) -> Option<Direction> {
        self.pending_terminal
    }

    // -------------------------------------------------------------------------
    // Operator controls
    // -------------------------------------------------------------------------

    /// Start a trip to `destination` through `waypoints`.
    ///
    /// Writes the waypoint list and the trip record; the first command goes
    /// out on the first tick that sees fresh telemetry.
    ///
    /// # Errors
    ///
    /// * [`NavError::AlreadyNavigating`] – a trip is routing or navigating.
    /// * [`NavError::EmptyRoute`] – `waypoints` is empty.
    /// * [`NavError::InvalidCoordinate`] – a point is out of range.
    pub async fn start_trip(
        &mut self,
        destination: GeoPoint,
        waypoints: Vec<Waypoint>,
    ) -> Result<Uuid, NavError> {
        if self.trip.as_ref().is_some_and(|t| t.state().is_active()) {
            return Err(NavError::AlreadyNavigating);
        }
        let now = self.clock.now_ms();
        let trip = Trip::new(destination, waypoints, &self.resolver, now)?;
        let id = trip.id();
        let route_len = trip.route().len();

        if let Err(e) = self.client.write(Key::Waypoints, &trip.route()).await {
            warn!(trip_id = %id, error = %e, "could not publish waypoint list");
        }
        self.trip = Some(trip);
        self.pending_terminal = None;
        self.stalled = false;
        self.last_resolution = None;
        self.publish_trip_record().await;

        info!(trip_id = %id, %destination, route_len, "trip started");
        self.bus.publish(
            SOURCE,
            NavEvent::TripStarted {
                trip_id: id,
                destination,
                route_len,
            },
        );
        Ok(id)
    }

    /// Stop the current trip, if any, and write a `stop` command.
    ///
    /// Always writes, so a second stop is harmless.  Returns the id of the
    /// trip that was stopped.
    ///
    /// # Errors
    ///
    /// [`NavError::Channel`] when the `stop` command could not be written.
    /// The trip is stopped locally regardless and the write is retried on
    /// later ticks.
    pub async fn stop_trip(&mut self) -> Result<Option<Uuid>, NavError> {
        let stopped = match self.trip.as_mut() {
            Some(trip) if trip.state().is_active() => {
                trip.stop();
                Some(trip.id())
            }
            _ => None,
        };
        if let Some(id) = stopped {
            info!(trip_id = %id, "trip stopped by operator");
            self.publish_trip_record().await;
        }
        self.stalled = false;
        self.manual_hold_until = None;
        self.bus.publish(SOURCE, NavEvent::TripStopped { trip_id: stopped });

        self.write_terminal(Direction::Stop).await?;
        Ok(stopped)
    }

    /// Issue an operator command and hold autonomous writes.
    ///
    /// # Errors
    ///
    /// * [`NavError::InvalidDirection`] – `arrived` is not an operator command.
    /// * [`NavError::Channel`] – the command could not be written.
    pub async fn manual(&mut self, direction: Direction) -> Result<(), NavError> {
        if direction == Direction::Arrived {
            return Err(NavError::InvalidDirection(direction.to_string()));
        }
        let now = self.clock.now_ms();
        self.manual_hold_until = Some(now + self.config.manual_override_hold_ms as i64);
        info!(%direction, hold_ms = self.config.manual_override_hold_ms, "manual override");
        self.bus.publish(SOURCE, NavEvent::ManualOverride { direction });
        self.write_command(direction).await
    }

    /// Current snapshot for operators.
    pub fn status(&self) -> NavigationStatus {
        let now = self.clock.now_ms();
        let mut status = NavigationStatus {
            last_position: self.last_position,
            last_heading: self.last_heading,
            last_command: self.last_command,
            stalled: self.stalled,
            manual_hold: self.hold_active(now),
            executor: self.executor_status,
            ..NavigationStatus::default()
        };
        if let Some(trip) = &self.trip {
            status.state = trip.state();
            status.trip_id = Some(trip.id());
            status.destination = Some(trip.destination());
            status.current_index = trip.current_index();
            status.route_len = trip.route().len();
            status.current_target = trip.current_target().cloned();
        }
        if let Some(r) = self.last_resolution {
            status.distance_m = Some(r.distance_m);
            status.bearing_deg = Some(r.bearing_deg);
            status.compass = Some(compass_point(r.bearing_deg).to_string());
        }
        status
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one decision cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if let Some(direction) = self.pending_terminal {
            match self.write_command(direction).await {
                Ok(()) => info!(%direction, "pending terminal command written"),
                Err(e) => debug!(%direction, error = %e, "terminal command still pending"),
            }
        }

        let state = match &self.trip {
            Some(trip) if trip.state().is_active() => trip.state(),
            _ => return TickOutcome::Idle,
        };

        // ── Read ──────────────────────────────────────────────────────────────
        let position: Option<Position> = self.client.read(Key::Position).await;
        let heading: Option<Heading> = self.client.read(Key::Heading).await;
        if let Some(status) = self.client.read::<ExecutorStatus>(Key::ExecutorStatus).await {
            self.executor_status = Some(status);
        }
        if position.is_some() {
            self.last_position = position;
        }
        if heading.is_some() {
            self.last_heading = heading;
        }

        let now = self.clock.now_ms();
        let staleness = self.config.telemetry_staleness_ms;
        let fresh_position = position.filter(|p| p.is_fresh(now, staleness));
        let fresh_heading = heading.filter(|h| h.is_fresh(now, staleness));

        // ── Manual hold ───────────────────────────────────────────────────────
        if self.hold_active(now) {
            return TickOutcome::ManualHold;
        }
        self.manual_hold_until = None;

        self.check_stall(now);

        // ── Gate ──────────────────────────────────────────────────────────────
        let Some(position) = fresh_position else {
            debug!(?position, "position missing or stale; tick skipped");
            return TickOutcome::Skipped(SkipReason::StalePosition);
        };
        if state == TripState::Routing {
            if fresh_heading.is_none() {
                debug!("routing: waiting for a fresh heading");
                return TickOutcome::Skipped(SkipReason::AwaitingHeading);
            }
            if let Some(trip) = self.trip.as_mut() {
                trip.begin_navigating();
            }
            info!("first fix received; navigating");
            self.publish_trip_record().await;
        } else if fresh_heading.is_none() {
            debug!("heading missing or stale; steering as if facing north");
        }

        // ── Resolve ───────────────────────────────────────────────────────────
        let step = match self.trip.as_mut() {
            Some(trip) => trip.step(
                &self.resolver,
                position.point(),
                fresh_heading.map(|h| h.degrees),
            ),
            None => return TickOutcome::Idle,
        };
        let resolution = *step.resolution();
        self.last_resolution = Some(resolution);
        debug!(
            direction = %resolution.direction,
            distance_m = resolution.distance_m,
            bearing_deg = resolution.bearing_deg,
            difference_deg = resolution.difference_deg,
            compass = compass_point(resolution.bearing_deg),
            "resolved"
        );

        // ── Write ─────────────────────────────────────────────────────────────
        let command = step.command();
        match step {
            TripStep::Steer(_) => {
                self.write_or_warn(resolution.direction).await;
                TickOutcome::Steered(resolution.direction)
            }
            TripStep::Advanced {
                reached,
                instruction,
                ..
            } => {
                let text = instruction.as_deref().unwrap_or("");
                info!(index = reached, instruction = text, "waypoint reached");
                self.bus.publish(
                    SOURCE,
                    NavEvent::WaypointReached {
                        index: reached,
                        instruction,
                    },
                );
                self.publish_trip_record().await;
                if let Some(direction) = command {
                    self.write_or_warn(direction).await;
                }
                TickOutcome::WaypointReached {
                    index: reached,
                    next: command,
                }
            }
            TripStep::Arrived(_) => {
                let trip_id = self.trip.as_ref().map(Trip::id).unwrap_or_default();
                info!(%trip_id, distance_m = resolution.distance_m, "destination reached");
                self.publish_trip_record().await;
                if let Err(e) = self.write_terminal(Direction::Arrived).await {
                    warn!(%trip_id, error = %e, "arrived not written; retrying next tick");
                }
                self.stalled = false;
                self.bus.publish(SOURCE, NavEvent::TripArrived { trip_id });
                TickOutcome::Arrived
            }
        }
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Move the planner into a task.
    ///
    /// The task stops when `shutdown` turns `true` or every handle is gone.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> (PlannerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx, shutdown));
        (PlannerHandle { tx }, task)
    }

    /// Tick on the configured period while serving operator requests.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<PlannerRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick_ms, "planner loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    debug!(?outcome, "planner tick");
                }
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("planner loop stopped");
    }

    async fn handle(&mut self, request: PlannerRequest) {
        // A dropped reply channel only means the caller went away.
        match request {
            PlannerRequest::Start {
                destination,
                waypoints,
                reply,
            } => {
                let _ = reply.send(self.start_trip(destination, waypoints).await);
            }
            PlannerRequest::Stop { reply } => {
                let _ = reply.send(self.stop_trip().await);
            }
            PlannerRequest::Manual { direction, reply } => {
                let _ = reply.send(self.manual(direction).await);
            }
            PlannerRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn hold_active(&self, now: TimestampMs) -> bool {
        self.manual_hold_until.is_some_and(|until| now < until)
    }

    /// Raise the stall signal once per silence.
    fn check_stall(&mut self, now: TimestampMs) {
        if self.stalled {
            return;
        }
        let Some(trip) = self.trip.as_ref().filter(|t| t.state().is_active()) else {
            return;
        };
        let since = self
            .last_write_at
            .map_or(trip.started_at(), |at| at.max(trip.started_at()));
        let silent_ms = now.saturating_sub(since).max(0) as u64;
        if silent_ms > self.config.command_timeout_ms {
            self.stalled = true;
            warn!(silent_ms, trip_id = %trip.id(), "navigation stalled: no command written");
            self.bus.publish(SOURCE, NavEvent::NavigationStalled { silent_ms });
        }
    }

    /// Next command timestamp: now, but always past the previous one.
    fn next_command_ts(&mut self, now: TimestampMs) -> TimestampMs {
        let ts = match self.last_command_ts {
            Some(last) => now.max(last + 1),
            None => now,
        };
        self.last_command_ts = Some(ts);
        ts
    }

    async fn write_command(&mut self, direction: Direction) -> Result<(), NavError> {
        let now = self.clock.now_ms();
        let command = Command::new(direction, self.next_command_ts(now));
        self.client.write(Key::Command, &command).await?;

        debug!(%direction, timestamp = command.timestamp, "command written");
        self.last_command = Some(command);
        self.last_write_at = Some(now);
        self.pending_terminal = None;
        if self.stalled {
            self.stalled = false;
            info!("navigation resumed");
            self.bus.publish(SOURCE, NavEvent::NavigationResumed);
        }
        Ok(())
    }

    /// Write `direction`, keeping it pending when the write fails.
    async fn write_terminal(&mut self, direction: Direction) -> Result<(), NavError> {
        let result = self.write_command(direction).await;
        if result.is_err() {
            self.pending_terminal = Some(direction);
        }
        result
    }

    async fn write_or_warn(&mut self, direction: Direction) {
        if let Err(e) = self.write_command(direction).await {
            warn!(%direction, error = %e, "command write failed");
        }
    }

    async fn publish_trip_record(&mut self) {
        let now = self.clock.now_ms();
        let Some(record) = self.trip.as_ref().map(|t| t.record(now)) else {
            return;
        };
        if let Err(e) = self.client.write(Key::Trip, &record).await {
            warn!(trip_id = %record.trip_id, error = %e, "could not publish trip record");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Operator request delivered to a running planner.
#[derive(Debug)]
pub enum PlannerRequest {
    Start {
        destination: GeoPoint,
        waypoints: Vec<Waypoint>,
        reply: oneshot::Sender<Result<Uuid, NavError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<Option<Uuid>, NavError>>,
    },
    Manual {
        direction: Direction,
        reply: oneshot::Sender<Result<(), NavError>>,
    },
    Status {
        reply: oneshot::Sender<NavigationStatus>,
    },
}

/// Cloneable front door to a running [`Planner`].
#[derive(Clone, Debug)]
pub struct PlannerHandle {
    tx: mpsc::Sender<PlannerRequest>,
}

impl PlannerHandle {
    /// # Errors
    ///
    /// Whatever [`Planner::start_trip`] returns, or
    /// [`NavError::PlannerUnavailable`] when the loop has exited.
    pub async fn start_trip(
        &self,
        destination: GeoPoint,
        waypoints: Vec<Waypoint>,
    ) -> Result<Uuid, NavError> {
        self.call(|reply| PlannerRequest::Start {
            destination,
            waypoints,
            reply,
        })
        .await?
    }

    /// # Errors
    ///
    /// See [`Planner::stop_trip`]; [`NavError::PlannerUnavailable`] when the
    /// loop has exited.
    pub async fn stop_trip(&self) -> Result<Option<Uuid>, NavError> {
        self.call(|reply| PlannerRequest::Stop { reply }).await?
    }

    /// # Errors
    ///
    /// See [`Planner::manual`]; [`NavError::PlannerUnavailable`] when the
    /// loop has exited.
    pub async fn manual(&self, direction: Direction) -> Result<(), NavError> {
        self.call(|reply| PlannerRequest::Manual { direction, reply })
            .await?
    }

    /// # Errors
    ///
    /// [`NavError::PlannerUnavailable`] when the loop has exited.
    pub async fn status(&self) -> Result<NavigationStatus, NavError> {
        self.call(|reply| PlannerRequest::Status { reply }).await
    }

    /// Blocking variant of [`stop_trip`][Self::stop_trip] for signal
    /// handlers running outside the runtime.
    ///
    /// # Errors
    ///
    /// As for [`stop_trip`][Self::stop_trip].
    pub fn blocking_stop_trip(&self) -> Result<Option<Uuid>, NavError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .blocking_send(PlannerRequest::Stop { reply })
            .map_err(|_| NavError::PlannerUnavailable)?;
        rx.blocking_recv()
            .map_err(|_| NavError::PlannerUnavailable)?
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PlannerRequest,
    ) -> Result<T, NavError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| NavError::PlannerUnavailable)?;
        rx.await.map_err(|_| NavError::PlannerUnavailable)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
