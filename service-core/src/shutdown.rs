//! Process-wide shutdown signalling.

use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

/// Cancels `token` once a termination signal arrives.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}

/// Drives `server` until it finishes, giving it at most `grace` to drain after `token` fires.
///
/// Returns `Ok(false)` when the drain window elapsed before the server stopped.
pub async fn drain_with_timeout<F, E>(
    name: &str,
    server: F,
    token: CancellationToken,
    grace: Duration,
) -> Result<bool, E>
where
    F: Future<Output = Result<(), E>>,
{
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.map(|_| true),
        _ = token.cancelled() => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            tracing::info!(server = %name, "Server drained");
            result.map(|_| true)
        }
        Err(_) => {
            tracing::warn!(server = %name, grace_secs = grace.as_secs(), "Drain timed out");
            Ok(false)
        }
    }
}
