//! Connection descriptors for the pod port-forward sub-resource

use std::sync::Arc;

use http::Method;
use url::Url;

use super::cluster::{BoxedStream, ClusterClient, ForwardTransport};
use crate::errors::{Result, TunnelError};

/// Where and how to open the upgraded port-forward connection.
///
/// A transport decides how much of this it uses. `KubeTransport` only takes
/// `namespace` and `pod`: `kube` derives the request from its own cluster URL
/// (gateway prefix included) and upgrades over websocket, so `method`, `url`
/// and `host` end up in logs and error text there, not on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub namespace: String,
    pub pod: String,
    /// The port-forward sub-resource expects POST for the upgrade
    pub method: Method,
    pub url: Url,
    /// `host[:port]` only, without any gateway path prefix
    pub host: String,
}

impl ConnectionDescriptor {
    /// Compose the descriptor for `pod` in `namespace` behind `api_host`.
    ///
    /// `api_host` may carry a scheme and a path prefix (for API servers reached
    /// through a gateway); the prefix is kept ahead of the sub-resource path.
    pub fn new(api_host: &str, namespace: &str, pod: &str) -> Result<Self> {
        let (scheme, rest) = match api_host.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("https", api_host),
        };

        let (host, prefix) = match rest.split_once('/') {
            Some((host, prefix)) => (host, prefix.trim_matches('/')),
            None => (rest, ""),
        };

        if host.is_empty() {
            return Err(TunnelError::Transport(format!(
                "API host has no host component: {}",
                api_host
            )));
        }

        let mut path = format!("/api/v1/namespaces/{}/pods/{}/portforward", namespace, pod);
        if !prefix.is_empty() {
            path = format!("/{}{}", prefix, path);
        }

        let url = Url::parse(&format!("{}://{}{}", scheme, host, path))
            .map_err(|e| TunnelError::Transport(format!("Invalid API host {}: {}", api_host, e)))?;

        Ok(Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            method: Method::POST,
            url,
            host: host.to_string(),
        })
    }
}

/// A descriptor paired with the transport that can dial it
#[derive(Clone)]
pub struct Dialer<T> {
    descriptor: Arc<ConnectionDescriptor>,
    transport: T,
}

impl<T: ForwardTransport> Dialer<T> {
    /// Build a dialer for `pod`, taking the transport from the cluster client
    pub fn build<C>(cluster: &C, namespace: &str, pod: &str) -> Result<Self>
    where
        C: ClusterClient<Transport = T>,
    {
        let descriptor = ConnectionDescriptor::new(&cluster.api_host(), namespace, pod)?;
        let transport = cluster.transport()?;
        Ok(Self::new(descriptor, transport))
    }

    pub fn new(descriptor: ConnectionDescriptor, transport: T) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            transport,
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Open one upgraded stream to `remote_port` inside the pod
    pub async fn dial(&self, remote_port: u16) -> Result<BoxedStream> {
        self.transport.connect(&self.descriptor, remote_port).await
    }
}
