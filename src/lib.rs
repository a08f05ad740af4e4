//! ActivityWatch watcher that reports the user as AFK while the screen is locked.
//!
//! The lock state is sampled on a fixed interval, the [watcher::state] machine decides when the
//! user went away or came back, and heartbeats are delivered to aw-server through a queue so a
//! slow server never delays sampling.

pub mod args;
pub mod client;
pub mod config;
pub mod probe;
pub mod shutdown;
pub mod utils;
pub mod watcher;
