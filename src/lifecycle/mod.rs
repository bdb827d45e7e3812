//! The `lifecycle` module wires the relay together and owns its shutdown.
//!
//! One [`CancellationToken`](tokio_util::sync::CancellationToken) is created
//! per run and handed to the subscriber; the HTTP listener is stopped
//! through its own token and a bounded drain.

mod coordinator;

pub use coordinator::Coordinator;

use tokio::signal;
use tracing::error;

/// Resolves on ctrl-c, or on SIGTERM on unix.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
