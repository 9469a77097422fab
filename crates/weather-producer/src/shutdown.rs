//! Termination signal plumbing.

use tokio::sync::watch;

/// Set up a shutdown channel triggered by SIGINT/SIGTERM.
///
/// Returns the sender (kept alive by the caller) and a receiver for the polling loop.
pub fn setup_shutdown() -> Result<(watch::Sender<()>, watch::Receiver<()>), ctrlc::Error> {
    let (tx, rx) = watch::channel(());
    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    })?;
    Ok((tx, rx))
}

/// True once a shutdown was requested or every sender is gone.
pub fn is_requested(rx: &watch::Receiver<()>) -> bool {
    rx.has_changed().unwrap_or(true)
}

/// Resolve when a shutdown is requested. A closed channel counts as a request.
pub async fn requested(rx: &mut watch::Receiver<()>) {
    let _ = rx.changed().await;
}
