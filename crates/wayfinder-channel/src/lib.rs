//! `wayfinder-channel` – the link between planner and executor.
//!
//! The two loops never call each other.  They share nothing but a remote
//! key-value store with last-write-wins semantics, and every value carries
//! its own production timestamp.
//!
//! # Modules
//!
//! - [`store`] – the [`SharedChannel`] trait and [`ChannelError`].
//! - [`keys`] – the key namespace and the single-writer [`Role`] of each key.
//! - [`client`] – [`ChannelClient`]: timeouts, exponential backoff, owner
//!   checks and typed decoding on top of a raw store.
//! - [`memory`] – [`MemoryChannel`], an in-process store with fault
//!   injection for tests and simulation.
//! - [`rest`] – [`RestChannel`], an HTTP JSON store client.
//! - [`bus`] – [`NavBus`], the in-process broadcast bus for navigation
//!   events.

pub mod bus;
pub mod client;
pub mod keys;
pub mod memory;
pub mod rest;
pub mod store;

pub use bus::{NavBus, Topic, TopicReceiver};
pub use client::{Backoff, ChannelClient, ChannelSettings, Fetch};
pub use keys::{Key, Role};
pub use memory::MemoryChannel;
pub use rest::RestChannel;
pub use store::{ChannelError, Record, SharedChannel};
