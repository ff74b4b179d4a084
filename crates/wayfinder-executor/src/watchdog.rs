//! [`CommandWatchdog`] – detects when the planner has gone quiet.
//!
//! The executor feeds the watchdog with the issue time of every command it
//! adopts.  Once the time since the last feed exceeds the timeout it reports
//! [`CommandHealth::Expired`] and the executor falls back to a local stop.
//! Time comes from the caller's clock so the check is deterministic.

use wayfinder_types::TimestampMs;

/// Health of the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandHealth {
    /// Nothing adopted yet.
    Unarmed,
    Fresh,
    Expired { silent_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct CommandWatchdog {
    timeout_ms: u64,
    last_fed: Option<TimestampMs>,
}

impl CommandWatchdog {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_fed: None,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Record a command issued at `issued_at`.
    pub fn feed(&mut self, issued_at: TimestampMs) {
        self.last_fed = Some(issued_at);
    }

    pub fn health(&self, now: TimestampMs) -> CommandHealth {
        match self.last_fed {
            None => CommandHealth::Unarmed,
            Some(at) => {
                let silent_ms = (now - at).max(0) as u64;
                if silent_ms > self.timeout_ms {
                    CommandHealth::Expired { silent_ms }
                } else {
                    CommandHealth::Fresh
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_until_first_feed() {
        let wd = CommandWatchdog::new(5_000);
        assert_eq!(wd.health(1_000_000), CommandHealth::Unarmed);
    }

    #[test]
    fn expires_strictly_after_timeout() {
        let mut wd = CommandWatchdog::new(5_000);
        wd.feed(10_000);
        assert_eq!(wd.health(15_000), CommandHealth::Fresh);
        assert_eq!(
            wd.health(15_001),
            CommandHealth::Expired { silent_ms: 5_001 }
        );
    }

    #[test]
    fn feeding_resets_deadline() {
        let mut wd = CommandWatchdog::new(5_000);
        wd.feed(0);
        wd.feed(4_000);
        assert_eq!(wd.health(8_000), CommandHealth::Fresh);
    }
}
