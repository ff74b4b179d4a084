//! In-process [`SharedChannel`] for tests and headless simulation.
//!
//! Clone it cheaply – all clones share the same map.  Faults can be injected
//! to exercise the loops' degraded paths:
//!
//! * [`MemoryChannel::set_available`] – simulate a full outage.
//! * [`MemoryChannel::set_latency`] – delay every operation.
//! * [`MemoryChannel::fail_reads_of`] / [`MemoryChannel::fail_writes_to`] –
//!   fail one key in one direction while the rest of the store works.
//!
//! Every successful `put` is also appended to a per-key history so tests can
//! count and inspect writes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use wayfinder_types::Clock;

use crate::store::{ChannelError, Record, SharedChannel};

/// Maximum number of writes remembered per key.
const HISTORY_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    latest: HashMap<String, Record>,
    history: HashMap<String, Vec<Record>>,
}

struct Inner {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    faults: Mutex<KeyFaults>,
}

#[derive(Default)]
struct KeyFaults {
    reads: HashSet<String>,
    writes: HashSet<String>,
}

/// Shared in-memory key-value store.
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

impl MemoryChannel {
    /// Create an empty store that stamps writes with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                clock,
                available: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                faults: Mutex::new(KeyFaults::default()),
            }),
        }
    }

    /// Toggle a simulated outage.  While unavailable every call fails with
    /// [`ChannelError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Delay every subsequent operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail every `get` of `key` until [`clear_faults`][Self::clear_faults].
    pub fn fail_reads_of(&self, key: &str) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.reads.insert(key.to_string());
        }
    }

    /// Fail every `put` to `key` until [`clear_faults`][Self::clear_faults].
    pub fn fail_writes_to(&self, key: &str) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.writes.insert(key.to_string());
        }
    }

    /// Drop all per-key faults.
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            *faults = KeyFaults::default();
        }
    }

    /// All writes to `key`, oldest first.
    pub async fn history(&self, key: &str) -> Vec<Record> {
        self.inner
            .tables
            .read()
            .await
            .history
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of writes recorded for `key`.
    pub async fn write_count(&self, key: &str) -> usize {
        self.inner
            .tables
            .read()
            .await
            .history
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Remove `key`, as if it had never been written.
    pub async fn remove(&self, key: &str) {
        self.inner.tables.write().await.latest.remove(key);
    }

    async fn simulate_conditions(&self) -> Result<(), ChannelError> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable(
                "memory channel offline".to_string(),
            ));
        }
        Ok(())
    }

    fn key_fault(&self, key: &str, write: bool) -> Result<(), ChannelError> {
        let failing = self.inner.faults.lock().is_ok_and(|faults| {
            if write {
                faults.writes.contains(key)
            } else {
                faults.reads.contains(key)
            }
        });
        if failing {
            return Err(ChannelError::Unavailable(format!(
                "memory channel: {} of {key} failed",
                if write { "write" } else { "read" }
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedChannel for MemoryChannel {
    async fn get(&self, key: &str) -> Result<Option<Record>, ChannelError> {
        self.simulate_conditions().await?;
        self.key_fault(key, false)?;
        Ok(self.inner.tables.read().await.latest.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), ChannelError> {
        self.simulate_conditions().await?;
        self.key_fault(key, true)?;
        let record = Record {
            value,
            timestamp: self.inner.clock.now_ms(),
        };
        let mut tables = self.inner.tables.write().await;
        let history = tables.history.entry(key.to_string()).or_default();
        if history.len() >= HISTORY_CAPACITY {
            history.remove(0);
        }
        history.push(record.clone());
        tables.latest.insert(key.to_string(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wayfinder_types::ManualClock;

    fn channel() -> (MemoryChannel, ManualClock) {
        let clock = ManualClock::new(1_000);
        (MemoryChannel::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let (ch, _) = channel();
        assert_eq!(ch.get("executor/position").await, Ok(None));
    }

    #[tokio::test]
    async fn last_write_wins() -> Result<(), ChannelError> {
        let (ch, clock) = channel();
        ch.put("planner/command", json!({"direction": "left"})).await?;
        clock.advance(10);
        ch.put("planner/command", json!({"direction": "right"})).await?;

        let record = ch.get("planner/command").await?.expect("written");
        assert_eq!(record.value["direction"], "right");
        assert_eq!(record.timestamp, 1_010);
        assert_eq!(ch.write_count("planner/command").await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let (ch, _) = channel();
        ch.set_available(false);
        assert!(matches!(
            ch.put("k", json!(1)).await,
            Err(ChannelError::Unavailable(_))
        ));
        assert!(matches!(ch.get("k").await, Err(ChannelError::Unavailable(_))));

        ch.set_available(true);
        assert!(ch.put("k", json!(1)).await.is_ok());
        assert_eq!(ch.write_count("k").await, 1);
    }

    #[tokio::test]
    async fn key_faults_fail_one_direction_of_one_key() -> Result<(), ChannelError> {
        let (ch, _) = channel();
        ch.put("executor/heading", json!(90.0)).await?;
        ch.fail_reads_of("executor/heading");
        ch.fail_writes_to("planner/command");

        assert!(matches!(
            ch.get("executor/heading").await,
            Err(ChannelError::Unavailable(_))
        ));
        assert!(ch.put("executor/heading", json!(91.0)).await.is_ok());
        assert!(matches!(
            ch.put("planner/command", json!({"direction": "stop"})).await,
            Err(ChannelError::Unavailable(_))
        ));
        assert_eq!(ch.get("planner/command").await?, None);
        assert_eq!(ch.write_count("planner/command").await, 0);

        ch.clear_faults();
        assert_eq!(
            ch.get("executor/heading").await?.map(|r| r.value),
            Some(json!(91.0))
        );
        Ok(())
    }

    #[tokio::test]
    async fn clones_share_state() -> Result<(), ChannelError> {
        let (ch, _) = channel();
        let other = ch.clone();
        ch.put("k", json!("v")).await?;
        assert_eq!(other.get("k").await?.map(|r| r.value), Some(json!("v")));
        other.remove("k").await;
        assert_eq!(ch.get("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_operations() {
        let (ch, _) = channel();
        ch.set_latency(Duration::from_millis(300));
        let started = tokio::time::Instant::now();
        let _ = ch.get("k").await;
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
