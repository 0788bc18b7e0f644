//! In-memory cluster used by the unit tests

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::DuplexStream;

use super::cluster::{
    BoxedStream, ClusterClient, ForwardTransport, PodInfo, PodPhase, PodStatusView, ServiceInfo,
};
use super::dialer::{ConnectionDescriptor, Dialer};
use crate::errors::{Result, TunnelError};

pub fn status(phase: PodPhase, ready: &[bool]) -> PodStatusView {
    PodStatusView {
        phase,
        containers_ready: ready.to_vec(),
    }
}

struct FakePod {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
    /// Statuses handed out by successive gets; the last one sticks
    statuses: VecDeque<PodStatusView>,
}

impl FakePod {
    fn info(&self) -> PodInfo {
        PodInfo {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            status: self
                .statuses
                .front()
                .cloned()
                .unwrap_or_else(|| status(PodPhase::Unknown, &[])),
        }
    }
}

pub struct FakeCluster {
    pods: Mutex<Vec<FakePod>>,
    services: Vec<ServiceInfo>,
    vanishing: Mutex<HashSet<(String, String)>>,
    failure: Option<String>,
    pod_gets: AtomicUsize,
    transport: FakeTransport,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            pods: Mutex::new(Vec::new()),
            services: Vec::new(),
            vanishing: Mutex::new(HashSet::new()),
            failure: None,
            pod_gets: AtomicUsize::new(0),
            transport: FakeTransport::default(),
        }
    }

    pub fn with_pod(
        self,
        namespace: &str,
        name: &str,
        phase: PodPhase,
        ready: &[bool],
        labels: &[(&str, &str)],
    ) -> Self {
        self.with_pod_entry(namespace, name, vec![status(phase, ready)], labels)
    }

    pub fn with_pod_statuses(
        self,
        namespace: &str,
        name: &str,
        statuses: Vec<PodStatusView>,
    ) -> Self {
        self.with_pod_entry(namespace, name, statuses, &[])
    }

    fn with_pod_entry(
        self,
        namespace: &str,
        name: &str,
        statuses: Vec<PodStatusView>,
        labels: &[(&str, &str)],
    ) -> Self {
        self.pods.lock().unwrap().push(FakePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: to_map(labels),
            statuses: statuses.into(),
        });
        self
    }

    pub fn with_service(mut self, namespace: &str, name: &str, selector: &[(&str, &str)]) -> Self {
        self.services.push(ServiceInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            selector: to_map(selector),
        });
        self
    }

    pub fn with_transport(mut self, transport: FakeTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Every lookup fails with a cluster error
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn remove_pod_after_first_get(&self, namespace: &str, name: &str) {
        self.vanishing
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn pod_gets(&self) -> usize {
        self.pod_gets.load(Ordering::SeqCst)
    }

    pub fn transport_handle(&self) -> FakeTransport {
        self.transport.clone()
    }

    fn check_failure(&self) -> Result<()> {
        match &self.failure {
            Some(message) => Err(TunnelError::Cluster(message.clone())),
            None => Ok(()),
        }
    }
}

impl ClusterClient for FakeCluster {
    type Transport = FakeTransport;

    fn api_host(&self) -> String {
        "https://127.0.0.1:6443".to_string()
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>> {
        self.check_failure()?;
        self.pod_gets.fetch_add(1, Ordering::SeqCst);

        let key = (namespace.to_string(), name.to_string());
        let mut pods = self.pods.lock().unwrap();
        let Some(index) = pods
            .iter()
            .position(|p| p.namespace == namespace && p.name == name)
        else {
            return Ok(None);
        };

        let info = pods[index].info();
        if pods[index].statuses.len() > 1 {
            pods[index].statuses.pop_front();
        }
        if self.vanishing.lock().unwrap().remove(&key) {
            pods.remove(index);
        }
        Ok(Some(info))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceInfo>> {
        self.check_failure()?;
        Ok(self
            .services
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        self.check_failure()?;
        let wanted: Vec<(&str, &str)> = selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();

        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .filter(|p| {
                wanted
                    .iter()
                    .all(|(k, v)| p.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(FakePod::info)
            .collect())
    }

    fn transport(&self) -> Result<FakeTransport> {
        Ok(self.transport.clone())
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub enum FakeMode {
    /// Every stream echoes what it receives
    #[default]
    Echo,
    /// Every dial fails at once
    Refuse,
    /// Every dial fails after the delay
    RefuseAfter(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    mode: FakeMode,
    dials: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode,
            dials: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl ForwardTransport for FakeTransport {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        _remote_port: u16,
    ) -> Result<BoxedStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FakeMode::Echo => Ok(Box::new(echo_stream())),
            FakeMode::Refuse => Err(TunnelError::Transport(format!(
                "pod {} unreachable",
                descriptor.pod
            ))),
            FakeMode::RefuseAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(TunnelError::Transport(format!(
                    "pod {} went away",
                    descriptor.pod
                )))
            }
        }
    }
}

fn echo_stream() -> DuplexStream {
    let (client, server) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(server);
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });
    client
}

pub fn fake_dialer(pod: &str, transport: FakeTransport) -> Dialer<FakeTransport> {
    let descriptor = ConnectionDescriptor::new("https://127.0.0.1:6443", "ns1", pod).unwrap();
    Dialer::new(descriptor, transport)
}
