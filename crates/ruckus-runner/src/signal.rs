//! OS signals as an abort source

/// Completes on SIGINT or SIGTERM (Ctrl+C elsewhere)
///
/// If no handler can be installed the future never completes, so the session
/// simply runs to the end.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::warn!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::warn!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::warn!("Received Ctrl+C"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler; abort is disabled");
            std::future::pending::<()>().await;
        }
    }
}
