//! Cluster access
//!
//! The tunnel core only needs a handful of reads from the control plane
//! (get a pod, get a service, list pods by selector) plus an upgrade-capable
//! transport. [`ClusterClient`] and [`ForwardTransport`] describe exactly that
//! surface; [`KubeCluster`] implements it on top of `kube`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::dialer::ConnectionDescriptor;
use crate::config::ClusterSource;
use crate::errors::{Result, TunnelError};

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the phase string reported by the API server
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of a pod's status that decides readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatusView {
    pub phase: PodPhase,
    /// One flag per container status entry
    pub containers_ready: Vec<bool>,
}

impl PodStatusView {
    /// A pod is ready when it is running and at least one container says so.
    ///
    /// Which container matters is unknown here, so any ready container counts.
    pub fn is_ready(&self) -> bool {
        self.phase == PodPhase::Running && self.containers_ready.iter().any(|ready| *ready)
    }

    /// Short description for log lines
    pub fn describe(&self) -> String {
        if self.phase == PodPhase::Running && !self.is_ready() {
            "NoContainerReady".to_string()
        } else {
            self.phase.to_string()
        }
    }
}

/// A pod as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub status: PodStatusView,
}

impl PodInfo {
    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }
}

/// A service as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub namespace: String,
    pub name: String,
    pub selector: BTreeMap<String, String>,
}

impl ServiceInfo {
    /// Render the selector in `key=value,key=value` form.
    ///
    /// Returns `None` for selector-less services, which have no managed pods.
    pub fn label_selector(&self) -> Option<String> {
        if self.selector.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .selector
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        Some(parts.join(","))
    }
}

/// Any bidirectional byte stream into a pod port
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn TunnelStream>;

/// Opens upgraded streams to the port-forward sub-resource of a pod
pub trait ForwardTransport: Clone + Send + Sync + 'static {
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        remote_port: u16,
    ) -> impl Future<Output = Result<BoxedStream>> + Send;
}

/// Read access to the cluster control plane
pub trait ClusterClient: Send + Sync {
    type Transport: ForwardTransport;

    /// API server address, possibly carrying a gateway path prefix
    fn api_host(&self) -> String;

    /// Fetch a pod; `Ok(None)` when it does not exist
    fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<PodInfo>>> + Send;

    /// Fetch a service; `Ok(None)` when it does not exist
    fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ServiceInfo>>> + Send;

    /// List pods matching a label selector
    fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<PodInfo>>> + Send;

    /// Build the upgrade-capable transport used by the dialer
    fn transport(&self) -> Result<Self::Transport>;
}

/// [`ClusterClient`] backed by a `kube` client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    cluster_url: String,
}

impl KubeCluster {
    /// Load configuration from the given source and build a client.
    ///
    /// Without a kubeconfig path the in-cluster service account is used.
    pub async fn connect(source: &ClusterSource) -> Result<Self> {
        let config = match source.kubeconfig.as_deref() {
            Some(path) => {
                debug!(path = %path.display(), context = ?source.context, "Loading kubeconfig");
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    TunnelError::Config(format!(
                        "Failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let options = KubeConfigOptions {
                    context: source.context.clone(),
                    ..KubeConfigOptions::default()
                };
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| TunnelError::Config(format!("Invalid kubeconfig: {}", e)))?
            }
            None => {
                debug!("No kubeconfig path provided - trying in-cluster config");
                Config::incluster().map_err(|e| {
                    TunnelError::Config(format!("In-cluster config unavailable: {}", e))
                })?
            }
        };

        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config)?;

        Ok(Self { client, cluster_url })
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, cluster_url: impl Into<String>) -> Self {
        Self {
            client,
            cluster_url: cluster_url.into(),
        }
    }
}

impl ClusterClient for KubeCluster {
    type Transport = KubeTransport;

    fn api_host(&self) -> String {
        self.cluster_url.clone()
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get_opt(name).await?;
        Ok(pod.map(|p| pod_info(p, namespace)))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceInfo>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = services.get_opt(name).await?;
        Ok(service.map(|svc| ServiceInfo {
            namespace: svc
                .metadata
                .namespace
                .unwrap_or_else(|| namespace.to_string()),
            name: svc.metadata.name.unwrap_or_else(|| name.to_string()),
            selector: svc.spec.and_then(|spec| spec.selector).unwrap_or_default(),
        }))
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list
            .items
            .into_iter()
            .map(|p| pod_info(p, namespace))
            .collect())
    }

    fn transport(&self) -> Result<KubeTransport> {
        Ok(KubeTransport {
            client: self.client.clone(),
        })
    }
}

fn pod_info(pod: Pod, namespace: &str) -> PodInfo {
    let status = pod.status.unwrap_or_default();
    PodInfo {
        namespace: pod
            .metadata
            .namespace
            .unwrap_or_else(|| namespace.to_string()),
        name: pod.metadata.name.unwrap_or_default(),
        status: PodStatusView {
            phase: PodPhase::parse(status.phase.as_deref()),
            containers_ready: status
                .container_statuses
                .unwrap_or_default()
                .iter()
                .map(|c| c.ready)
                .collect(),
        },
    }
}

/// Port-forward transport over the `kube` websocket upgrade.
///
/// `kube` derives the sub-resource path from its own cluster URL, which keeps
/// any gateway prefix; the descriptor supplies the pod coordinates.
#[derive(Clone)]
pub struct KubeTransport {
    client: Client,
}

impl ForwardTransport for KubeTransport {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        remote_port: u16,
    ) -> Result<BoxedStream> {
        debug!(
            method = %descriptor.method,
            url = %descriptor.url,
            port = remote_port,
            "Upgrading port-forward connection"
        );
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &descriptor.namespace);
        let mut forwarder = pods
            .portforward(&descriptor.pod, &[remote_port])
            .await
            .map_err(|e| TunnelError::Transport(format!("{}: {}", descriptor.url, e)))?;

        let stream = forwarder.take_stream(remote_port).ok_or_else(|| {
            TunnelError::Transport(format!(
                "no stream for port {} on pod {}",
                remote_port, descriptor.pod
            ))
        })?;

        // The forwarder task ends once the stream is closed on both sides.
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                debug!(error = %e, "Port-forward connection closed with error");
            }
        });

        Ok(Box::new(stream))
    }
}
