use std::fmt;

use anyhow::Result;
use tokio::signal;

/// Signal that ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    CtrlC,
    #[cfg(unix)]
    Sigterm,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CtrlC => f.write_str("SIGINT"),
            #[cfg(unix)]
            Self::Sigterm => f.write_str("SIGTERM"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// # Errors
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    let received = tokio::select! {
        result = wait_ctrl_c() => result?,
        result = wait_sigterm() => result?,
    };

    tracing::info!(signal = %received, "Shutdown signal received");
    Ok(received)
}

async fn wait_ctrl_c() -> Result<ShutdownSignal> {
    signal::ctrl_c().await.inspect_err(|e| {
        tracing::error!(error = %e, "Error handling Ctrl+C signal");
    })?;
    Ok(ShutdownSignal::CtrlC)
}

#[cfg(unix)]
async fn wait_sigterm() -> Result<ShutdownSignal> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())
        .inspect_err(|e| tracing::error!(error = %e, "Failed to install SIGTERM handler"))?;
    handler.recv().await;
    Ok(ShutdownSignal::Sigterm)
}

#[cfg(not(unix))]
async fn wait_sigterm() -> Result<ShutdownSignal> {
    std::future::pending::<Result<ShutdownSignal>>().await
}
