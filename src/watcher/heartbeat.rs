use std::time::Duration;

use anyhow::Result;
use serde_json::Map;

use super::state::PingRequest;
use crate::client::{Event, EventSink};

/// Event type of the bucket, shared with the other AFK watchers so consumers treat the data alike.
pub const AFK_EVENT_TYPE: &str = "afkstatus";

const AFK: &str = "afk";
const NOT_AFK: &str = "not-afk";

/// Turns [PingRequest]s into heartbeats of a single bucket.
pub struct HeartbeatEmitter<S> {
    sink: S,
    bucket_id: String,
    pulsetime: Duration,
}

impl<S: EventSink> HeartbeatEmitter<S> {
    pub fn new(sink: S, bucket_id: String, pulsetime: Duration) -> Self {
        Self {
            sink,
            bucket_id,
            pulsetime,
        }
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub async fn create_bucket(&self) -> Result<()> {
        self.sink
            .create_bucket(&self.bucket_id, AFK_EVENT_TYPE)
            .await
    }

    pub async fn emit(&self, ping: &PingRequest) -> Result<()> {
        self.sink
            .heartbeat(&self.bucket_id, &to_event(ping), self.pulsetime)
            .await
    }
}

/// Heartbeats are merged only when their data is identical, so the payload is nothing but the
/// status.
pub fn to_event(ping: &PingRequest) -> Event {
    let mut data = Map::new();
    let status = if ping.afk { AFK } else { NOT_AFK };
    data.insert("status".into(), status.into());
    Event {
        timestamp: ping.timestamp,
        duration: ping.duration,
        data,
    }
}
