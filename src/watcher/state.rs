//! The AFK state machine. It is fed one [Sample] per poll and answers with the heartbeats that
//! describe what happened, it knows nothing about clocks or servers.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Offset of the second ping of a transition. The server resolves "state at time T" to the latest
/// event starting at T, so the state after the transition must start strictly later than the
/// transition marker.
pub const TRANSITION_OFFSET: TimeDelta = TimeDelta::milliseconds(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub locked: bool,
}

/// A heartbeat the watcher wants to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRequest {
    pub afk: bool,
    pub timestamp: DateTime<Utc>,
    pub duration: TimeDelta,
}

impl PingRequest {
    pub fn new(afk: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            afk,
            timestamp,
            duration: TimeDelta::zero(),
        }
    }

    pub fn with_duration(self, duration: TimeDelta) -> Self {
        Self { duration, ..self }
    }
}

/// Result of a single poll. Transitions carry two pings, steady states one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    BecameActive([PingRequest; 2]),
    BecameAfk([PingRequest; 2]),
    StillAfk(PingRequest),
    StillActive(PingRequest),
}

impl Tick {
    pub fn pings(&self) -> &[PingRequest] {
        match self {
            Tick::BecameActive(pings) | Tick::BecameAfk(pings) => pings,
            Tick::StillAfk(ping) | Tick::StillActive(ping) => std::slice::from_ref(ping),
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, Tick::BecameActive(_) | Tick::BecameAfk(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfkState {
    afk: bool,
    last_unlocked: DateTime<Utc>,
    last_locked: DateTime<Utc>,
}

impl AfkState {
    /// The user starts out present, both timestamps point at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            afk: false,
            last_unlocked: start,
            last_locked: start,
        }
    }

    pub fn is_afk(&self) -> bool {
        self.afk
    }

    pub fn last_unlocked(&self) -> DateTime<Utc> {
        self.last_unlocked
    }

    pub fn last_locked(&self) -> DateTime<Utc> {
        self.last_locked
    }

    /// Applies one sample. The user is AFK iff the screen has been locked for at least `timeout`,
    /// counted from the last sample that saw it unlocked.
    pub fn observe(&mut self, sample: Sample, timeout: Duration) -> Tick {
        if sample.locked {
            self.last_locked = sample.timestamp;
        } else {
            self.last_unlocked = sample.timestamp;
        }

        // A wall clock stepping backwards must not produce negative durations.
        let since_input = (sample.timestamp - self.last_unlocked).max(TimeDelta::zero());
        let timed_out = since_input.to_std().unwrap_or(Duration::ZERO) >= timeout;
        let marker = self.last_unlocked;

        match (self.afk, timed_out) {
            (true, false) => {
                self.afk = false;
                Tick::BecameActive([
                    PingRequest::new(false, marker),
                    PingRequest::new(false, marker + TRANSITION_OFFSET),
                ])
            }
            (false, true) => {
                self.afk = true;
                Tick::BecameAfk([
                    PingRequest::new(true, marker),
                    PingRequest::new(true, marker + TRANSITION_OFFSET).with_duration(since_input),
                ])
            }
            (true, true) => Tick::StillAfk(PingRequest::new(true, marker).with_duration(since_input)),
            (false, false) => Tick::StillActive(PingRequest::new(false, marker)),
        }
    }
}
