//! Tunnel sessions
//!
//! A session owns one background forwarding task: a local listener whose
//! connections are relayed to the pod through the dialer. The task is
//! supervised through a [`TunnelState`] watch channel and stopped through a
//! [`StopSignal`].

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cluster::ForwardTransport;
use super::dialer::Dialer;
use crate::errors::{Result, TunnelError};

/// How long `start` waits for an early failure of the background task
pub const STARTUP_GRACE: Duration = Duration::from_millis(100);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One-shot stop primitive; stopping twice is harmless
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Lifecycle of a forwarding task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    /// Listener bound, pod not yet confirmed reachable
    Starting,
    /// Accepting connections
    Ready,
    /// Ended through its stop signal
    Stopped,
    /// Ended on its own with an error
    Failed(String),
}

impl TunnelState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TunnelState::Stopped | TunnelState::Failed(_))
    }
}

/// Handle to one running forwarding task
#[derive(Debug, Clone)]
pub struct TunnelSession {
    id: u64,
    local_addr: SocketAddr,
    stop: StopSignal,
    state: watch::Receiver<TunnelState>,
}

impl TunnelSession {
    /// Bind the local listener and launch the forwarding task.
    ///
    /// With `probe` set, the task first dials the pod port once and drops
    /// the stream, so the application sees one connection no local client
    /// asked for; an unreachable pod then fails the start. Without it the
    /// tunnel is `Ready` as soon as the listener is bound.
    ///
    /// Returns once `grace` has passed without the task failing. Failures
    /// after that point only reach the log and the session state.
    pub async fn start<T: ForwardTransport>(
        dialer: Dialer<T>,
        bind_address: IpAddr,
        local_port: u16,
        remote_port: u16,
        grace: Duration,
        probe: bool,
    ) -> Result<TunnelSession> {
        let listener = TcpListener::bind((bind_address, local_port))
            .await
            .map_err(|source| TunnelError::LocalResource {
                address: bind_address.to_string(),
                port: local_port,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let stop = StopSignal::new();
        let (state_tx, state_rx) = watch::channel(TunnelState::Starting);
        let (error_tx, error_rx) = oneshot::channel::<TunnelError>();

        let task_stop = stop.clone();
        tokio::spawn(async move {
            let outcome =
                forward_connections(&dialer, listener, remote_port, probe, &task_stop, &state_tx)
                    .await;
            let pod = &dialer.descriptor().pod;
            match outcome {
                Ok(()) => {
                    debug!(local = %local_addr, pod = %pod, "Port-forward stopped");
                    state_tx.send_replace(TunnelState::Stopped);
                }
                Err(e) => {
                    error!(local = %local_addr, pod = %pod, error = %e, "Port-forward failed");
                    state_tx.send_replace(TunnelState::Failed(e.to_string()));
                    let _ = error_tx.send(e);
                }
            }
        });

        let session = TunnelSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            local_addr,
            stop,
            state: state_rx,
        };

        match tokio::time::timeout(grace, error_rx).await {
            Ok(Ok(e)) => {
                session.stop();
                Err(TunnelError::Startup(Box::new(e)))
            }
            Ok(Err(_)) | Err(_) => {
                debug!(local = %local_addr, "No startup error within grace window");
                Ok(session)
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn state(&self) -> TunnelState {
        self.state.borrow().clone()
    }

    /// Wait for the forwarding task to end and return how it ended
    pub async fn finished(&self) -> TunnelState {
        let mut state = self.state.clone();
        let finished = match state.wait_for(TunnelState::is_finished).await {
            Ok(finished) => finished.clone(),
            Err(_) => self.state(),
        };
        finished
    }
}

async fn forward_connections<T: ForwardTransport>(
    dialer: &Dialer<T>,
    listener: TcpListener,
    remote_port: u16,
    probe: bool,
    stop: &StopSignal,
    state: &watch::Sender<TunnelState>,
) -> Result<()> {
    // An unreachable pod shows up on the first dial.
    if probe {
        tokio::select! {
            _ = stop.stopped() => return Ok(()),
            probed = dialer.dial(remote_port) => drop(probed?),
        }
    }

    state.send_replace(TunnelState::Ready);
    info!(
        local = %listener.local_addr()?,
        namespace = %dialer.descriptor().namespace,
        pod = %dialer.descriptor().pod,
        port = remote_port,
        "Forwarding"
    );

    loop {
        tokio::select! {
            _ = stop.stopped() => return Ok(()),
            accepted = listener.accept() => {
                let (conn, peer) = accepted?;
                let dialer = dialer.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    if let Err(e) = relay(&dialer, conn, remote_port, &stop).await {
                        warn!(peer = %peer, error = %e, "Connection relay failed");
                    }
                });
            }
        }
    }
}

async fn relay<T: ForwardTransport>(
    dialer: &Dialer<T>,
    mut conn: TcpStream,
    remote_port: u16,
    stop: &StopSignal,
) -> Result<()> {
    let mut upstream = dialer.dial(remote_port).await?;
    tokio::select! {
        _ = stop.stopped() => {}
        copied = tokio::io::copy_bidirectional(&mut conn, &mut upstream) => {
            let (sent, received) = copied?;
            debug!(sent, received, "Connection closed");
        }
    }
    Ok(())
}
