//! Everything needed to talk to the event store. [EventSink] is the seam the watcher writes
//! through, [aw::AwClient] is the aw-server implementation and [queue] makes any sink
//! non-blocking.

pub mod aw;
pub mod queue;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// An event as stored by ActivityWatch: something described by `data` happened at `timestamp` and
/// lasted `duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_ser")]
    pub duration: TimeDelta,
    pub data: Map<String, Value>,
}

/// Permanent failure: the server understood the request and refused it, sending it again can't
/// succeed. Sinks return it inside their [anyhow::Error] so delivery can tell it apart from an
/// unreachable server.
#[derive(Debug, Error, PartialEq)]
pub enum SinkError {
    #[error("{what} was rejected with {status}: {body}")]
    Rejected {
        what: &'static str,
        status: u16,
        body: String,
    },
}

/// Append-only event store keyed by bucket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Idempotent, creating an existing bucket is not an error.
    async fn create_bucket(&self, bucket_id: &str, event_type: &str) -> Result<()>;

    /// Stores `event`, or extends the previous event of the bucket when it carries the same data
    /// and the gap between them is at most `pulsetime`.
    async fn heartbeat(&self, bucket_id: &str, event: &Event, pulsetime: Duration) -> Result<()>;
}

/// ActivityWatch expresses durations as floating point seconds.
mod duration_ser {
    use chrono::TimeDelta;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const MICROS_IN_SECOND: f64 = 1_000_000.;

    pub fn serialize<S>(duration: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let seconds = match duration.num_microseconds() {
            Some(micros) => micros as f64 / MICROS_IN_SECOND,
            None => duration.num_seconds() as f64,
        };
        serializer.serialize_f64(seconds)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TimeDelta, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() {
            return Err(serde::de::Error::custom(format!("invalid duration {seconds}")));
        }
        Ok(TimeDelta::microseconds(
            (seconds * MICROS_IN_SECOND).round() as i64,
        ))
    }
}
