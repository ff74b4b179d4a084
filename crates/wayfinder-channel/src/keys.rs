//! Key namespace of the shared state channel.
//!
//! Every key has exactly one writer [`Role`]; readers may be either side.
//! [`ChannelClient`][crate::client::ChannelClient] refuses writes to keys its
//! role does not own, so two processes never race on the same key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the system a channel client acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Planner,
    Executor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Planner => f.write_str("planner"),
            Role::Executor => f.write_str("executor"),
        }
    }
}

/// All first-class keys on the shared channel.
///
/// | Key | Path | Writer |
/// |---|---|---|
/// | [`Key::Position`] | `executor/position` | executor |
/// | [`Key::Heading`] | `executor/heading` | executor |
/// | [`Key::Proximity`] | `executor/proximity` | executor |
/// | [`Key::ExecutorStatus`] | `executor/status` | executor |
/// | [`Key::Command`] | `planner/command` | planner |
/// | [`Key::Trip`] | `planner/trip` | planner |
/// | [`Key::Waypoints`] | `planner/waypoints` | planner |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Position,
    Heading,
    Proximity,
    ExecutorStatus,
    Command,
    Trip,
    Waypoints,
}

impl Key {
    pub const ALL: [Key; 7] = [
        Key::Position,
        Key::Heading,
        Key::Proximity,
        Key::ExecutorStatus,
        Key::Command,
        Key::Trip,
        Key::Waypoints,
    ];

    /// Store path of this key.
    pub fn path(self) -> &'static str {
        match self {
            Key::Position => "executor/position",
            Key::Heading => "executor/heading",
            Key::Proximity => "executor/proximity",
            Key::ExecutorStatus => "executor/status",
            Key::Command => "planner/command",
            Key::Trip => "planner/trip",
            Key::Waypoints => "planner/waypoints",
        }
    }

    /// The only role allowed to write this key.
    pub fn owner(self) -> Role {
        match self {
            Key::Position | Key::Heading | Key::Proximity | Key::ExecutorStatus => Role::Executor,
            Key::Command | Key::Trip | Key::Waypoints => Role::Planner,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
