//! [`ChannelClient`] – the only way the loops touch the shared channel.
//!
//! Wraps an `Arc<dyn SharedChannel>` with the policies both loops rely on:
//!
//! 1. **Bounded latency** – every call runs under `tokio::time::timeout`; a
//!    timeout counts as "no data".
//! 2. **Backoff** – after a failure the client stops polling the store until
//!    an exponentially growing delay has passed, instead of busy-retrying.
//!    Reads and writes back off independently, so a failing telemetry read
//!    never holds back a command write.
//! 3. **Single writer** – writes to keys not owned by the client's [`Role`]
//!    are refused.
//! 4. **Typed decoding** – malformed records are discarded and read as absent.
//!
//! Outage warnings are rate limited so a dead link does not flood the log.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wayfinder_types::{Clock, NavEvent, TimestampMs};

use crate::bus::NavBus;
use crate::keys::{Key, Role};
use crate::store::{ChannelError, SharedChannel};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout and backoff settings for a [`ChannelClient`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Upper bound on any single read or write.
    pub timeout_ms: u64,
    /// First backoff delay after a failure.
    pub backoff_base_ms: u64,
    /// Cap on the backoff delay.
    pub backoff_max_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            backoff_base_ms: 250,
            backoff_max_ms: 8_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff schedule measured on the caller's clock.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    failures: u32,
    retry_at: Option<TimestampMs>,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms: base_ms.max(1),
            max_ms: max_ms.max(base_ms),
            failures: 0,
            retry_at: None,
        }
    }

    /// `true` when the store may be contacted at `now`.
    pub fn ready(&self, now: TimestampMs) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Milliseconds left before the store may be contacted again.
    pub fn remaining(&self, now: TimestampMs) -> i64 {
        self.retry_at.map_or(0, |at| (at - now).max(0))
    }

    /// Record a failure at `now` and return the delay that was scheduled.
    pub fn record_failure(&mut self, now: TimestampMs) -> u64 {
        self.failures = self.failures.saturating_add(1);
        let shift = (self.failures - 1).min(20);
        let delay = self.base_ms.saturating_mul(1 << shift).min(self.max_ms);
        self.retry_at = Some(now + delay as i64);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetch outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a typed read.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch<T> {
    Value(T),
    /// Key never written.
    Missing,
    /// Record present but not decodable as `T`; discarded.
    Malformed(String),
    /// Store unreachable, timed out or backing off.
    Failed(ChannelError),
}

impl<T> Fetch<T> {
    /// Collapse every non-value outcome to `None`.
    pub fn value(self) -> Option<T> {
        match self {
            Fetch::Value(v) => Some(v),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChannelClient
// ─────────────────────────────────────────────────────────────────────────────

/// Role-bound, timeout-guarded client of a [`SharedChannel`].
pub struct ChannelClient {
    store: Arc<dyn SharedChannel>,
    role: Role,
    clock: Arc<dyn Clock>,
    op_timeout: Duration,
    read_backoff: Backoff,
    write_backoff: Backoff,
    warn_limiter: DefaultDirectRateLimiter,
    bus: Option<NavBus>,
}

impl ChannelClient {
    pub fn new(
        store: Arc<dyn SharedChannel>,
        role: Role,
        clock: Arc<dyn Clock>,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            store,
            role,
            clock,
            op_timeout: Duration::from_millis(settings.timeout_ms),
            read_backoff: Backoff::new(settings.backoff_base_ms, settings.backoff_max_ms),
            write_backoff: Backoff::new(settings.backoff_base_ms, settings.backoff_max_ms),
            warn_limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            bus: None,
        }
    }

    /// Report outages as [`NavEvent::ChannelUnavailable`] on `bus`.
    pub fn with_bus(mut self, bus: NavBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn read_backoff(&self) -> &Backoff {
        &self.read_backoff
    }

    pub fn write_backoff(&self) -> &Backoff {
        &self.write_backoff
    }

    /// Read and decode `key`.
    pub async fn fetch<T: DeserializeOwned>(&mut self, key: Key) -> Fetch<T> {
        let now = self.clock.now_ms();
        if !self.read_backoff.ready(now) {
            let retry_in_ms = self.read_backoff.remaining(now);
            debug!(%key, retry_in_ms, "channel read skipped while backing off");
            return Fetch::Failed(ChannelError::BackingOff { retry_in_ms });
        }

        let result = match tokio::time::timeout(self.op_timeout, self.store.get(key.path())).await
        {
            Ok(inner) => inner,
            Err(_) => Err(self.timeout_error(key)),
        };

        match result {
            Ok(Some(record)) => {
                self.read_backoff.reset();
                match serde_json::from_value::<T>(record.value) {
                    Ok(value) => Fetch::Value(value),
                    Err(e) => {
                        warn!(%key, error = %e, "discarding malformed record");
                        Fetch::Malformed(e.to_string())
                    }
                }
            }
            Ok(None) => {
                self.read_backoff.reset();
                Fetch::Missing
            }
            Err(err) => {
                let delay_ms = self.read_backoff.record_failure(self.clock.now_ms());
                self.note_failure(key, &err, delay_ms, self.read_backoff.failures());
                Fetch::Failed(err)
            }
        }
    }

    /// Read `key`, treating every failure as absence.
    pub async fn read<T: DeserializeOwned>(&mut self, key: Key) -> Option<T> {
        self.fetch(key).await.value()
    }

    /// Serialise `value` and write it to `key`.
    ///
    /// # Errors
    ///
    /// * [`ChannelError::NotOwner`] – `key` belongs to the other role.
    /// * [`ChannelError::BackingOff`] – a recent failure has not cooled down.
    /// * [`ChannelError::Timeout`] / [`ChannelError::Unavailable`] – the store
    ///   did not accept the write in time.
    pub async fn write<T: Serialize>(&mut self, key: Key, value: &T) -> Result<(), ChannelError> {
        if key.owner() != self.role {
            return Err(ChannelError::NotOwner {
                key: key.path().to_string(),
                role: self.role,
            });
        }
        let now = self.clock.now_ms();
        if !self.write_backoff.ready(now) {
            return Err(ChannelError::BackingOff {
                retry_in_ms: self.write_backoff.remaining(now),
            });
        }
        let json =
            serde_json::to_value(value).map_err(|e| ChannelError::Serialization(e.to_string()))?;

        let result =
            match tokio::time::timeout(self.op_timeout, self.store.put(key.path(), json)).await {
                Ok(inner) => inner,
                Err(_) => Err(self.timeout_error(key)),
            };

        match result {
            Ok(()) => {
                self.write_backoff.reset();
                Ok(())
            }
            Err(err) => {
                let delay_ms = self.write_backoff.record_failure(self.clock.now_ms());
                self.note_failure(key, &err, delay_ms, self.write_backoff.failures());
                Err(err)
            }
        }
    }

    fn timeout_error(&self, key: Key) -> ChannelError {
        ChannelError::Timeout {
            key: key.path().to_string(),
            after_ms: self.op_timeout.as_millis() as u64,
        }
    }

    fn note_failure(&self, key: Key, err: &ChannelError, delay_ms: u64, failures: u32) {
        if self.warn_limiter.check().is_ok() {
            warn!(
                role = %self.role,
                %key,
                error = %err,
                failures,
                delay_ms,
                "shared channel unavailable; backing off"
            );
        }
        if let Some(bus) = &self.bus {
            bus.publish(
                &format!("wayfinder-channel::{}", self.role),
                NavEvent::ChannelUnavailable {
                    key: key.path().to_string(),
                    details: err.to_string(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChannel;
    use serde_json::json;
    use wayfinder_types::{Command, Direction, Heading, ManualClock, Position};

    fn setup(role: Role) -> (ChannelClient, MemoryChannel, ManualClock) {
        let clock = ManualClock::new(10_000);
        let store = MemoryChannel::new(Arc::new(clock.clone()));
        let client = ChannelClient::new(
            Arc::new(store.clone()),
            role,
            Arc::new(clock.clone()),
            ChannelSettings::default(),
        );
        (client, store, clock)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(250, 1_000);
        assert!(b.ready(0));
        assert_eq!(b.record_failure(0), 250);
        assert!(!b.ready(249));
        assert!(b.ready(250));
        assert_eq!(b.record_failure(250), 500);
        assert_eq!(b.record_failure(750), 1_000);
        assert_eq!(b.record_failure(1_750), 1_000);
        assert_eq!(b.remaining(2_000), 750);
        b.reset();
        assert!(b.ready(0));
        assert_eq!(b.failures(), 0);
    }

    #[tokio::test]
    async fn write_then_read_typed() -> Result<(), ChannelError> {
        let (mut planner, store, _) = setup(Role::Planner);
        let cmd = Command::new(Direction::Left, 10_000);
        planner.write(Key::Command, &cmd).await?;

        let clock = ManualClock::new(10_000);
        let mut executor = ChannelClient::new(
            Arc::new(store),
            Role::Executor,
            Arc::new(clock),
            ChannelSettings::default(),
        );
        let read: Option<Command> = executor.read(Key::Command).await;
        assert_eq!(read, Some(cmd));
        Ok(())
    }

    #[tokio::test]
    async fn write_to_foreign_key_is_refused() {
        let (mut planner, store, _) = setup(Role::Planner);
        let fix = Position::new(1.0, 2.0, 0);
        let result = planner.write(Key::Position, &fix).await;
        assert!(matches!(result, Err(ChannelError::NotOwner { .. })));
        assert_eq!(store.write_count(Key::Position.path()).await, 0);
    }

    #[tokio::test]
    async fn malformed_record_reads_as_absent() -> Result<(), ChannelError> {
        let (mut planner, store, _) = setup(Role::Planner);
        store
            .put(Key::Position.path(), json!({"lat": "not a number"}))
            .await?;
        let fetched: Fetch<Position> = planner.fetch(Key::Position).await;
        assert!(matches!(fetched, Fetch::Malformed(_)));
        // A malformed record is not an outage.
        assert_eq!(planner.read_backoff().failures(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_reads_as_missing() {
        let (mut planner, _, _) = setup(Role::Planner);
        let fetched: Fetch<Position> = planner.fetch(Key::Position).await;
        assert_eq!(fetched, Fetch::Missing);
    }

    #[tokio::test]
    async fn outage_triggers_backoff_without_retrying() {
        let (mut planner, store, clock) = setup(Role::Planner);
        store.set_available(false);

        let first: Fetch<Position> = planner.fetch(Key::Position).await;
        assert!(matches!(first, Fetch::Failed(ChannelError::Unavailable(_))));

        // Store is back but the client is still cooling down.
        store.set_available(true);
        clock.advance(100);
        let second: Fetch<Position> = planner.fetch(Key::Position).await;
        assert!(matches!(
            second,
            Fetch::Failed(ChannelError::BackingOff { .. })
        ));

        clock.advance(150);
        let third: Fetch<Position> = planner.fetch(Key::Position).await;
        assert_eq!(third, Fetch::Missing);
        assert_eq!(planner.read_backoff().failures(), 0);
    }

    #[tokio::test]
    async fn failed_read_does_not_hold_back_writes() -> Result<(), ChannelError> {
        let (mut planner, store, _) = setup(Role::Planner);
        store.fail_reads_of(Key::Heading.path());

        let heading: Fetch<Heading> = planner.fetch(Key::Heading).await;
        assert!(matches!(heading, Fetch::Failed(ChannelError::Unavailable(_))));
        assert_eq!(planner.read_backoff().failures(), 1);

        planner
            .write(Key::Command, &Command::new(Direction::Arrived, 10_000))
            .await?;
        assert_eq!(store.write_count(Key::Command.path()).await, 1);
        assert_eq!(planner.write_backoff().failures(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_write_backs_off_writes_only() {
        let (mut planner, store, clock) = setup(Role::Planner);
        store.fail_writes_to(Key::Command.path());

        let first = planner
            .write(Key::Command, &Command::new(Direction::Stop, 1))
            .await;
        assert!(matches!(first, Err(ChannelError::Unavailable(_))));
        let second = planner
            .write(Key::Command, &Command::new(Direction::Stop, 2))
            .await;
        assert!(matches!(second, Err(ChannelError::BackingOff { .. })));
        let read: Fetch<Position> = planner.fetch(Key::Position).await;
        assert_eq!(read, Fetch::Missing);

        store.clear_faults();
        clock.advance(250);
        assert!(planner
            .write(Key::Command, &Command::new(Direction::Stop, 3))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let (mut planner, store, _) = setup(Role::Planner);
        store.set_latency(Duration::from_secs(5));
        let fetched: Fetch<Position> = planner.fetch(Key::Position).await;
        assert!(matches!(
            fetched,
            Fetch::Failed(ChannelError::Timeout { after_ms: 1_000, .. })
        ));
    }

    #[tokio::test]
    async fn outage_is_reported_on_bus() {
        let bus = NavBus::default();
        let mut rx = bus.subscribe_to(crate::bus::Topic::Diagnostics);
        let (planner, store, _) = setup(Role::Planner);
        let mut planner = planner.with_bus(bus);
        store.set_available(false);

        let _: Fetch<Position> = planner.fetch(Key::Position).await;
        let event = rx.recv().await.expect("event");
        assert!(matches!(
            event.payload,
            NavEvent::ChannelUnavailable { ref key, .. } if key == "executor/position"
        ));
    }
}
