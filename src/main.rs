// Runs without a console window on Windows, use --log-console and a debug build to see output.
#![cfg_attr(all(feature = "win", not(debug_assertions)), windows_subsystem = "windows")]

use anyhow::Result;
use aw_watcher_lock::{
    args::WatcherArgs,
    utils::{
        dir::{ensure_dir, log_dir},
        logging::{enable_logging, log_prefix},
        runtime::single_thread_runtime,
    },
    watcher::start_watcher,
};
use clap::Parser;
use tracing::error;

fn main() -> Result<()> {
    let args = WatcherArgs::parse();

    let log_dir = ensure_dir(args.log_dir.clone().map_or_else(log_dir, Ok)?)?;
    enable_logging(
        &log_prefix(args.testing),
        &log_dir,
        args.verbose,
        args.log_console,
    )?;

    single_thread_runtime()?
        .block_on(start_watcher(args))
        .inspect_err(|e| error!("Error running watcher {e:?}"))
}
