//! Gateway teardown.
//!
//! A [`Teardown`] is shared by the serve loop and the signal listener:
//! - [`Teardown::request`] records why the gateway is stopping and
//!   releases everything parked in [`Teardown::requested`]
//! - [`Teardown::finish`] closes every registered connection through
//!   [`GatewayState::shutdown`], at most once

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

use tradewire_gateway::GatewayState;

/// Why the gateway is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// SIGINT or Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Signal handlers could not be installed
    SignalsUnavailable,
    /// Requested from inside the process
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
            Self::SignalsUnavailable => "signals_unavailable",
            Self::Requested => "requested",
        };
        f.write_str(name)
    }
}

/// Stop request plus the connection teardown it leads to.
#[derive(Clone)]
pub struct Teardown {
    state: Arc<GatewayState>,
    stop: Arc<watch::Sender<Option<StopReason>>>,
    finished: Arc<AtomicBool>,
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Teardown")
            .field("reason", &self.reason())
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Teardown {
    /// Creates a teardown for `state`.
    #[must_use]
    pub fn new(state: Arc<GatewayState>) -> Self {
        let (stop, _) = watch::channel(None);
        Self {
            state,
            stop: Arc::new(stop),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Gateway state torn down by [`Teardown::finish`].
    #[must_use]
    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Records a stop request. Returns `false` if one was already recorded.
    pub fn request(&self, reason: StopReason) -> bool {
        let first = self.stop.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(%reason, "Gateway stop requested");
        }
        first
    }

    /// The recorded stop reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        *self.stop.borrow()
    }

    /// Completes once a stop has been requested, including before this call.
    pub async fn requested(&self) -> StopReason {
        let mut rx = self.stop.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.unwrap_or(StopReason::Requested),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => StopReason::Requested,
        }
    }

    /// Closes every registered connection. Later calls return 0.
    pub fn finish(&self) -> usize {
        if self.finished.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let closed = self.state.shutdown();
        info!(closed, reason = ?self.reason(), "Gateway teardown complete");
        closed
    }

    /// Waits for SIGINT or SIGTERM and records the matching stop reason.
    pub async fn listen_for_signals(self) {
        match wait_for_signal().await {
            Ok(reason) => {
                self.request(reason);
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handlers");
                self.request(StopReason::SignalsUnavailable);
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<StopReason> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok(StopReason::Interrupt),
        _ = sigterm.recv() => Ok(StopReason::Terminate),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<StopReason> {
    tokio::signal::ctrl_c().await?;
    Ok(StopReason::Interrupt)
}
