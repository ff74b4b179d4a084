//! Realtime-database style HTTP backend for the shared channel.
//!
//! Each key maps to one JSON document:
//!
//! | Operation | Request |
//! |---|---|
//! | `get(key)` | `GET {base}/{key}.json[?auth=…]` |
//! | `put(key, v)` | `PUT {base}/{key}.json[?auth=…]` with `v` as body |
//!
//! A `null` body means the key was never written.  The store does not return
//! write times, so [`Record::timestamp`] is taken from the document's own
//! `timestamp` field when present and from the local clock otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use wayfinder_types::Clock;

use crate::store::{ChannelError, Record, SharedChannel};

/// HTTP JSON key-value store client.
pub struct RestChannel {
    client: reqwest::Client,
    base_url: String,
    auth: Option<String>,
    clock: Arc<dyn Clock>,
}

impl RestChannel {
    /// Create a client for the store rooted at `base_url`
    /// (e.g. `"https://example-rtdb.firebasedatabase.app/devices/rover1"`).
    ///
    /// Every request, connection setup included, is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Unavailable`] when the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        auth: Option<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(unavailable)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            clock,
        })
    }

    /// The root URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Document URL for `key`.  The auth token, if any, travels as a query
    /// parameter and is added by the request builder.
    pub fn url(&self, key: &str) -> String {
        format!("{}/{}.json", self.base_url, key.trim_matches('/'))
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url(key));
        match &self.auth {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }
}

/// Pick the record timestamp for a fetched document.
fn record_from_document(value: Value, fallback_ms: i64) -> Option<Record> {
    if value.is_null() {
        return None;
    }
    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_i64)
        .unwrap_or(fallback_ms);
    Some(Record { value, timestamp })
}

fn unavailable(err: reqwest::Error) -> ChannelError {
    ChannelError::Unavailable(err.to_string())
}

#[async_trait]
impl SharedChannel for RestChannel {
    async fn get(&self, key: &str) -> Result<Option<Record>, ChannelError> {
        let response = self
            .request(reqwest::Method::GET, key)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;
        debug!(key, "rest channel get");
        Ok(record_from_document(value, self.clock.now_ms()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), ChannelError> {
        self.request(reqwest::Method::PUT, key)
            .json(&value)
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;
        debug!(key, "rest channel put");
        Ok(())
    }
}
