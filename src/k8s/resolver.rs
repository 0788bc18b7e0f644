//! Pod / service name resolution
//!
//! A name is first tried as a pod. If no such pod exists it is tried as a
//! service, whose selector picks the first ready member. Either way the pod
//! is then polled until it reports ready or the check budget runs out.

use std::time::Duration;

use tracing::{debug, info};

use super::cluster::{ClusterClient, PodInfo, ServiceInfo};
use crate::errors::{ResolutionError, Result};

/// Maximum number of readiness checks for one pod
pub const READINESS_MAX_CHECKS: u32 = 6;

/// Pause between two readiness checks
pub const READINESS_INTERVAL: Duration = Duration::from_secs(10);

/// How a caller's name led to the pod that gets the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// The name was the pod itself
    Direct { pod: String },
    /// The name was a service that selected `pod`
    ViaAlias { service: String, pod: String },
}

impl Addressing {
    /// The pod the tunnel is opened against
    pub fn pod(&self) -> &str {
        match self {
            Addressing::Direct { pod } | Addressing::ViaAlias { pod, .. } => pod,
        }
    }

    /// The name the caller used
    pub fn addressed_name(&self) -> &str {
        match self {
            Addressing::Direct { pod } => pod,
            Addressing::ViaAlias { service, .. } => service,
        }
    }

    pub fn service(&self) -> Option<&str> {
        match self {
            Addressing::Direct { .. } => None,
            Addressing::ViaAlias { service, .. } => Some(service),
        }
    }
}

/// A pod that is ready to receive a tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub namespace: String,
    pub addressing: Addressing,
    pub ready: bool,
}

impl ResolvedTarget {
    pub fn pod(&self) -> &str {
        self.addressing.pod()
    }
}

/// Readiness polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total status checks, the first one included
    pub max_checks: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_checks: READINESS_MAX_CHECKS,
            interval: READINESS_INTERVAL,
        }
    }
}

/// Turns a pod or service name into a ready pod
pub struct TargetResolver<'a, C> {
    cluster: &'a C,
    policy: PollPolicy,
}

impl<'a, C: ClusterClient> TargetResolver<'a, C> {
    pub fn new(cluster: &'a C) -> Self {
        Self {
            cluster,
            policy: PollPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve `name` in `namespace` and wait for the pod to become ready
    pub async fn resolve(&self, namespace: &str, name: &str) -> Result<ResolvedTarget> {
        let (pod, service) = match self.cluster.get_pod(namespace, name).await? {
            Some(pod) => {
                debug!(namespace, pod = %pod.name, "Name refers to a pod");
                (pod, None)
            }
            None => {
                let service = self
                    .cluster
                    .get_service(namespace, name)
                    .await?
                    .ok_or_else(|| ResolutionError::NotFound {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                    })?;
                let pod = self.ready_pod_for_service(&service).await?;
                debug!(namespace, service = name, pod = %pod.name, "Service resolved to pod");
                (pod, Some(name.to_string()))
            }
        };

        let pod = self.wait_until_ready(pod).await?;
        let addressing = match service {
            Some(service) => Addressing::ViaAlias {
                service,
                pod: pod.name,
            },
            None => Addressing::Direct { pod: pod.name },
        };

        Ok(ResolvedTarget {
            namespace: namespace.to_string(),
            addressing,
            ready: true,
        })
    }

    /// First ready pod among the ones the service selects
    async fn ready_pod_for_service(&self, service: &ServiceInfo) -> Result<PodInfo> {
        let no_ready_target = || ResolutionError::NoReadyTarget {
            namespace: service.namespace.clone(),
            service: service.name.clone(),
        };

        let selector = service.label_selector().ok_or_else(no_ready_target)?;
        let pods = self.cluster.list_pods(&service.namespace, &selector).await?;
        debug!(
            service = %service.name,
            selector = %selector,
            candidates = pods.len(),
            "Listed service pods"
        );

        pods.into_iter()
            .find(PodInfo::is_ready)
            .ok_or_else(|| no_ready_target().into())
    }

    async fn wait_until_ready(&self, mut pod: PodInfo) -> Result<PodInfo> {
        let max_checks = self.policy.max_checks.max(1);
        let mut checks = 1;

        loop {
            if pod.is_ready() {
                return Ok(pod);
            }

            if checks >= max_checks {
                return Err(ResolutionError::ReadinessTimeout {
                    namespace: pod.namespace,
                    pod: pod.name,
                    checks,
                    phase: pod.status.describe(),
                }
                .into());
            }

            info!(
                namespace = %pod.namespace,
                pod = %pod.name,
                phase = %pod.status.describe(),
                check = checks,
                "Waiting {:?} for pod to become ready",
                self.policy.interval
            );
            tokio::time::sleep(self.policy.interval).await;

            let refreshed = self.cluster.get_pod(&pod.namespace, &pod.name).await?;
            pod = refreshed.ok_or_else(|| ResolutionError::NotFound {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
            })?;
            checks += 1;
        }
    }
}
