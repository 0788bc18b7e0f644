//! Kubernetes port-forward management
//!
//! [`PortForwardManager`] runs the whole forward sequence (resolve the
//! target, build the dialer, start the session, register it, arm the
//! cancellation bridge) and stops tunnels by the name they were opened with.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, info};

use super::cluster::{ClusterClient, KubeCluster};
use super::dialer::Dialer;
use super::registry::{AddressKey, Registry};
use super::resolver::{Addressing, PollPolicy, TargetResolver};
use super::session::{TunnelSession, TunnelState, STARTUP_GRACE};
use crate::config::ClusterSource;
use crate::errors::{Result, TunnelError};
use crate::signals::CancellationBridge;

/// Runtime knobs for opening tunnels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelOptions {
    /// Local address the listener binds to
    pub bind_address: IpAddr,
    /// How long a start waits for early failures
    pub grace: Duration,
    pub readiness: PollPolicy,
    /// Stop tunnels on SIGINT/SIGTERM
    pub arm_signals: bool,
    /// Dial the pod once during start to catch an unreachable port early
    pub probe_on_start: bool,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            grace: STARTUP_GRACE,
            readiness: PollPolicy::default(),
            arm_signals: true,
            probe_on_start: true,
        }
    }
}

/// What to forward where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub namespace: String,
    /// Pod or service name
    pub target: String,
    /// Local port; 0 picks a free one
    pub local_port: u16,
    pub remote_port: u16,
    pub source: ClusterSource,
}

impl ForwardRequest {
    pub fn new(namespace: &str, target: &str, local_port: u16, remote_port: u16) -> Self {
        Self {
            namespace: namespace.to_string(),
            target: target.to_string(),
            local_port,
            remote_port,
            source: ClusterSource::default(),
        }
    }

    pub fn with_source(mut self, source: ClusterSource) -> Self {
        self.source = source;
        self
    }

    /// Reject arguments that could never address a tunnel
    pub fn validate(&self) -> Result<()> {
        validate_name("namespace", &self.namespace)?;
        validate_name("target", &self.target)?;
        if self.remote_port == 0 {
            return Err(TunnelError::Argument(
                "remote port must be between 1 and 65535".to_string(),
            ));
        }
        if let Some(context) = &self.source.context {
            if context.contains('/') {
                return Err(TunnelError::Argument(format!(
                    "context contains illegal character '/': {}",
                    context
                )));
            }
        }
        Ok(())
    }
}

fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(TunnelError::Argument(format!("{} cannot be empty", kind)));
    }
    if value.contains('/') {
        return Err(TunnelError::Argument(format!(
            "{} contains illegal character '/': {}",
            kind, value
        )));
    }
    Ok(())
}

/// A started tunnel as seen by the caller
#[derive(Clone)]
pub struct ForwardHandle {
    key: AddressKey,
    addressing: Addressing,
    session: TunnelSession,
    registry: Arc<Registry>,
}

impl ForwardHandle {
    /// The registry key, always the pod name
    pub fn key(&self) -> &AddressKey {
        &self.key
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    /// The pod actually serving the tunnel
    pub fn pod(&self) -> &str {
        self.addressing.pod()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr()
    }

    pub fn state(&self) -> TunnelState {
        self.session.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.session.is_stopped()
    }

    /// Stop this tunnel; a newer tunnel under the same key is left alone
    pub fn stop(&self) {
        self.registry.retire(&self.key, &self.session);
    }

    /// Wait until the tunnel ends
    pub async fn finished(&self) -> TunnelState {
        self.session.finished().await
    }
}

impl std::fmt::Debug for ForwardHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardHandle")
            .field("key", &self.key)
            .field("addressing", &self.addressing)
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Opens, tracks and stops tunnels
#[derive(Clone, Default)]
pub struct PortForwardManager {
    registry: Arc<Registry>,
    options: TunnelOptions,
}

impl PortForwardManager {
    /// Create a new port-forward manager
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: TunnelOptions) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            options,
        }
    }

    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Forward to a pod or service using the cluster named by `request.source`
    pub async fn forward(&self, request: &ForwardRequest) -> Result<ForwardHandle> {
        request.validate()?;
        check_local_port(self.options.bind_address, request.local_port)?;

        let cluster = KubeCluster::connect(&request.source).await?;
        self.open(&cluster, request).await
    }

    /// Forward through an already connected cluster client
    pub async fn forward_with<C: ClusterClient>(
        &self,
        cluster: &C,
        request: &ForwardRequest,
    ) -> Result<ForwardHandle> {
        request.validate()?;
        check_local_port(self.options.bind_address, request.local_port)?;

        self.open(cluster, request).await
    }

    async fn open<C: ClusterClient>(
        &self,
        cluster: &C,
        request: &ForwardRequest,
    ) -> Result<ForwardHandle> {
        let target = TargetResolver::new(cluster)
            .with_policy(self.options.readiness)
            .resolve(&request.namespace, &request.target)
            .await?;

        let dialer = Dialer::build(cluster, &target.namespace, target.pod())?;

        let session = TunnelSession::start(
            dialer,
            self.options.bind_address,
            request.local_port,
            request.remote_port,
            self.options.grace,
            self.options.probe_on_start,
        )
        .await?;

        let key = self.registry.register(
            &target.namespace,
            &target.addressing,
            request.remote_port,
            session.clone(),
        );

        if self.options.arm_signals {
            CancellationBridge::arm(
                Arc::clone(&self.registry),
                key.clone(),
                session.stop_signal().clone(),
            );
        }

        info!(
            local = %session.local_addr(),
            key = %key,
            addressed = target.addressing.addressed_name(),
            "Port-forward started"
        );

        Ok(ForwardHandle {
            key,
            addressing: target.addressing,
            session,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Stop the tunnel(s) reachable by `name` as a pod or as a service.
    ///
    /// Stopping something that is not running is not an error.
    pub fn stop_forwarding(&self, namespace: &str, name: &str, remote_port: u16) {
        let stopped = self.registry.stop(namespace, name, remote_port);
        debug!(namespace, name, port = remote_port, stopped, "Stop requested");
    }

    /// Close all port-forwards
    pub fn close_all(&self) {
        let stopped = self.registry.stop_all();
        debug!(stopped, "Closed all port-forwards");
    }

    pub fn state(&self, key: &AddressKey) -> Option<TunnelState> {
        self.registry.state(key)
    }

    /// Get the active port-forwards and their states
    pub fn active(&self) -> Vec<(AddressKey, TunnelState)> {
        self.registry.active()
    }

    /// Get the number of active port-forwards
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }
}

/// Fail fast when the local port is already taken
fn check_local_port(address: IpAddr, port: u16) -> Result<()> {
    let listener =
        TcpListener::bind((address, port)).map_err(|source| TunnelError::LocalResource {
            address: address.to_string(),
            port,
            source,
        })?;

    // Drop the listener to release the port
    drop(listener);

    Ok(())
}

/// Global port-forward manager instance
static PORT_FORWARD_MANAGER: OnceLock<PortForwardManager> = OnceLock::new();

/// Get the process-wide port-forward manager
pub fn get_port_forward_manager() -> &'static PortForwardManager {
    PORT_FORWARD_MANAGER.get_or_init(PortForwardManager::new)
}

/// Forward through the process-wide manager
pub async fn forward(request: &ForwardRequest) -> Result<ForwardHandle> {
    get_port_forward_manager().forward(request).await
}

/// Stop through the process-wide manager
pub fn stop_forwarding(namespace: &str, name: &str, remote_port: u16) {
    get_port_forward_manager().stop_forwarding(namespace, name, remote_port);
}
