//! Interrupt/signal handling for graceful shutdown
//!
//! Each started tunnel arms a [`CancellationBridge`] that stops it through the
//! registry when the process is asked to terminate. The global interrupted
//! flag lets the CLI tell a signal-driven stop from a normal one.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::k8s::registry::{AddressKey, Registry};
use crate::k8s::session::StopSignal;

/// Global flag for SIGINT/SIGTERM handling
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if the application was interrupted
#[inline]
pub fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Set the interrupted flag (called when a termination signal arrives)
#[inline]
pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Reset the interrupted flag
#[inline]
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Resolves on the first SIGINT or SIGTERM (Ctrl+C elsewhere) and returns its name
pub async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            return std::future::pending().await;
        }
        "Ctrl+C"
    }
}

/// Maps a termination request to a stop of exactly one registered tunnel
pub struct CancellationBridge;

impl CancellationBridge {
    /// Stop `key` when the process receives SIGINT or SIGTERM
    pub fn arm(registry: Arc<Registry>, key: AddressKey, own: StopSignal) -> JoinHandle<()> {
        Self::arm_with(registry, key, own, async {
            let name = shutdown_signal().await;
            set_interrupted();
            debug!(signal = name, "Termination signal received");
        })
    }

    /// Stop `key` once `trigger` completes.
    ///
    /// The bridge disarms itself when the tunnel's own stop signal fires first,
    /// so a superseded tunnel never stops its successor.
    pub fn arm_with<F>(
        registry: Arc<Registry>,
        key: AddressKey,
        own: StopSignal,
        trigger: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::select! {
                _ = own.stopped() => {
                    debug!(key = %key, "Tunnel ended, cancellation bridge disarmed");
                }
                _ = trigger => {
                    info!(key = %key, "Stopping port-forward on termination request");
                    registry.stop(&key.namespace, &key.name, key.port);
                }
            }
        })
    }
}
