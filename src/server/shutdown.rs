//! Shutdown coordination: OS signals and fatal pipeline errors both end up
//! cancelling the same token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Why the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// SIGINT/SIGTERM.
    Signal,
    /// The terminal error handler failed.
    Fatal,
}

impl ExitReason {
    pub fn exit_code(self) -> i32 {
        match self {
            ExitReason::Signal => 0,
            ExitReason::Fatal => 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    fatal: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin a graceful shutdown.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Begin shutdown and make the process exit non-zero.
    pub fn trigger_fatal(&self) {
        self.fatal.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> ExitReason {
        if self.fatal.load(Ordering::SeqCst) {
            ExitReason::Fatal
        } else {
            ExitReason::Signal
        }
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Wait for SIGINT or SIGTERM, then trigger `shutdown`. Returns early if
/// something else triggered it first.
pub async fn watch_signals(shutdown: Shutdown) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        },
        _ = terminate => {
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        },
        _ = shutdown.cancelled() => {},
    }
}
