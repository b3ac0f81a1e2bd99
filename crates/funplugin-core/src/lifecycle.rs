//! Shutdown signalling for a serving plugin.
//!
//! The process waits on an explicit signal instead of sleeping in a loop:
//! either an OS interrupt (Ctrl-C, or SIGTERM on unix) or a `ShutdownToken`
//! cancelled from inside the process.

use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// A shutdown token shared between the serving loop and whoever stops it.
///
/// Clones share state: cancelling any clone is observed by all of them.
///
/// ```
/// use funplugin::ShutdownToken;
///
/// let token = ShutdownToken::new();
/// let stopper = token.clone();
///
/// stopper.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    state: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Request shutdown.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Resolve when the process receives an interrupt or termination signal.
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Interrupt received");
            }
            _ = terminate.recv() => {
                info!("Termination signal received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
    }

    Ok(())
}

/// Wait for an OS signal or for `token` to be cancelled, whichever is first.
pub async fn wait_for_shutdown(token: &ShutdownToken) -> Result<()> {
    tokio::select! {
        result = shutdown_signal() => result,
        _ = token.cancelled() => {
            info!("Shutdown requested");
            Ok(())
        }
    }
}
