use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "aw-watcher-lock", version, long_about = None)]
#[command(about = "Reports AFK status to ActivityWatch based on whether the screen is locked")]
pub struct WatcherArgs {
    #[arg(long, help = "Address of the ActivityWatch server")]
    pub host: Option<String>,
    #[arg(long, help = "Port of the ActivityWatch server. Defaults to 5600, or 5666 when testing")]
    pub port: Option<u16>,
    #[arg(long, help = "Use the testing server, config section and log files")]
    pub testing: bool,
    #[arg(short, long, help = "Log debug messages")]
    pub verbose: bool,
    #[arg(long, help = "Seconds spent locked before the user is considered AFK")]
    pub timeout: Option<f64>,
    #[arg(long = "poll-time", help = "Seconds between lock state samples")]
    pub poll_time: Option<f64>,
    #[arg(long, help = "Config file. By default $XDG_CONFIG_HOME/activitywatch/aw-watcher-lock/aw-watcher-lock.toml")]
    pub config: Option<PathBuf>,
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,
    /// Mirror log output to stderr.
    #[arg(long = "log-console")]
    pub log_console: bool,
}
