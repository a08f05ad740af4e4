use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `cancelation` once the process is asked to stop. Also returns when something else
/// cancels the token, so it never outlives the watcher.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM {e:?}");
                std::future::pending::<()>().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Stopped by keyboard interrupt");
            cancelation.cancel();
        },
        _ = terminate => {
            info!("Stopped by termination request");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
