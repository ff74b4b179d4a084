//! The storage seam.
//!
//! Neither loop talks to a concrete database.  Both hold an
//! `Arc<dyn SharedChannel>` and reach it through
//! [`ChannelClient`][crate::client::ChannelClient], which adds timeouts,
//! backoff and typed decoding on top of this raw interface.
//!
//! - [`MemoryChannel`][crate::memory::MemoryChannel] – in-process store for
//!   tests and headless simulation.
//! - [`RestChannel`][crate::rest::RestChannel] – realtime-database style
//!   HTTP JSON store.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use wayfinder_types::{NavError, TimestampMs};

use crate::keys::Role;

/// A raw value as held by the store, with its last-write timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub value: Value,
    pub timestamp: TimestampMs,
}

/// Errors produced by channel implementations and the client wrapper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("channel operation on `{key}` timed out after {after_ms} ms")]
    Timeout { key: String, after_ms: u64 },

    #[error("backing off after channel failure, retry in {retry_in_ms} ms")]
    BackingOff { retry_in_ms: i64 },

    #[error("role {role} may not write key `{key}`")]
    NotOwner { key: String, role: Role },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<ChannelError> for NavError {
    fn from(err: ChannelError) -> Self {
        NavError::Channel(err.to_string())
    }
}

/// Asynchronous key-value store with per-key last-write-wins semantics.
///
/// # Contract
///
/// * `get` returns `Ok(None)` for keys that were never written.
/// * `put` replaces the whole value of `key`.
/// * No ordering or atomicity is promised across keys.
#[async_trait]
pub trait SharedChannel: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Record>, ChannelError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), ChannelError>;
}
