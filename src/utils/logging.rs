use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::{format::FmtSpan, writer::MakeWriterExt};

use super::dir::APPLICATION_NAME;

/// Log file prefix. Testing instances write to their own files so they never interleave with a
/// production watcher running on the same machine.
pub fn log_prefix(testing: bool) -> String {
    if testing {
        format!("{APPLICATION_NAME}-testing")
    } else {
        APPLICATION_NAME.to_string()
    }
}

/// Filter directives for the subscriber. `verbose` forces debug output for this crate. Otherwise
/// `rust_log` is used when present: a bare level applies to this crate, anything with targets
/// (`aw_watcher_lock=trace,reqwest=debug`) is taken as is.
pub fn log_filter(verbose: bool, rust_log: Option<String>) -> String {
    let target = env!("CARGO_PKG_NAME").replace("-", "_");
    match rust_log {
        _ if verbose => format!("{target}={}", LevelFilter::DEBUG),
        Some(directives) if directives.contains('=') => directives,
        Some(level) => format!("{target}={level}"),
        None => format!("{target}={}", LevelFilter::INFO),
    }
}

pub fn enable_logging(
    prefix: &str,
    log_dir: &Path,
    verbose: bool,
    show_std: bool,
) -> Result<()> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix(prefix)
        .build(log_dir)?;

    let stderr = std::io::stderr.with_filter(move |_| show_std);

    let filter = log_filter(verbose, std::env::var("RUST_LOG").ok());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(stderr.and(appender))
        .with_ansi(false)
        .init();
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .try_init();
});
