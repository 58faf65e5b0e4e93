use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{error, info};

/// Forward OS signals to the main loop.
///
/// - SIGTERM / SIGINT -> `shutdown_tx`
/// - SIGHUP -> `reload_tx` (reflex rules are reloaded from the fact store)
pub async fn signal_listener(shutdown_tx: watch::Sender<bool>, reload_tx: watch::Sender<()>) {
    let handlers = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    );
    let (mut sigterm, mut sigint, mut sighup) = match handlers {
        (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
        (term, int, hup) => {
            let err = [term.err(), int.err(), hup.err()].into_iter().flatten().next();
            error!(error = ?err, "failed to register signal handlers");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
                return;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
                return;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading reflex rules");
                let _ = reload_tx.send(());
            }
        }
    }
}
