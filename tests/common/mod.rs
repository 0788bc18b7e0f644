//! Common test utilities for podtunnel integration tests
//!
//! - An in-memory cluster built on the public `ClusterClient` trait
//! - An echo transport standing in for the port-forward upgrade
//! - CLI invocation helpers with an isolated config directory

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use podtunnel::errors::Result;
use podtunnel::k8s::{
    BoxedStream, ClusterClient, ConnectionDescriptor, ForwardTransport, PodInfo, PodPhase,
    PodStatusView, PollPolicy, ServiceInfo, TunnelOptions,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Transport whose streams echo every byte back
#[derive(Clone, Default)]
pub struct EchoTransport {
    dials: Arc<AtomicUsize>,
}

impl EchoTransport {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl ForwardTransport for EchoTransport {
    async fn connect(
        &self,
        _descriptor: &ConnectionDescriptor,
        _remote_port: u16,
    ) -> Result<BoxedStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(Box::new(client))
    }
}

struct StoredPod {
    info: PodInfo,
    labels: BTreeMap<String, String>,
}

/// In-memory cluster with fixed pods and services
#[derive(Default)]
pub struct TestCluster {
    pods: Mutex<Vec<StoredPod>>,
    services: Vec<ServiceInfo>,
    transport: EchoTransport,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(
        self,
        namespace: &str,
        name: &str,
        ready: bool,
        labels: &[(&str, &str)],
    ) -> Self {
        let phase = if ready { PodPhase::Running } else { PodPhase::Pending };
        let pod = StoredPod {
            info: PodInfo {
                namespace: namespace.to_string(),
                name: name.to_string(),
                status: PodStatusView {
                    phase,
                    containers_ready: vec![ready],
                },
            },
            labels: to_map(labels),
        };
        self.pods.lock().unwrap().push(pod);
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

    pub fn transport_handle(&self) -> EchoTransport {
        self.transport.clone()
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => false,
    })
}

impl ClusterClient for TestCluster {
    type Transport = EchoTransport;

    fn api_host(&self) -> String {
        "https://127.0.0.1:6443".to_string()
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<PodInfo>> {
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .find(|p| p.info.namespace == namespace && p.info.name == name)
            .map(|p| p.info.clone()))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<ServiceInfo>> {
        Ok(self
            .services
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let pods = self.pods.lock().unwrap();
        Ok(pods
            .iter()
            .filter(|p| p.info.namespace == namespace && matches_selector(&p.labels, selector))
            .map(|p| p.info.clone())
            .collect())
    }

    fn transport(&self) -> Result<EchoTransport> {
        Ok(self.transport.clone())
    }
}

/// Options for in-process tests: no signal handlers, fast readiness polling
pub fn test_options() -> TunnelOptions {
    TunnelOptions {
        readiness: PollPolicy {
            max_checks: 2,
            interval: Duration::from_millis(10),
        },
        arm_signals: false,
        ..TunnelOptions::default()
    }
}

/// Send `payload` through the tunnel listening on `addr` and read the echo
pub async fn round_trip(addr: std::net::SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

/// Isolated environment for running the CLI binary
pub struct CliEnvironment {
    config_dir: TempDir,
}

impl CliEnvironment {
    pub fn new() -> Self {
        Self {
            config_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn write_config(&self, content: &str) {
        std::fs::write(self.config_dir.path().join("config.toml"), content).unwrap();
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_podtunnel"));
        cmd.env("PODTUNNEL_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("PODTUNNEL_NAMESPACE");
        cmd.env_remove("PODTUNNEL_DEBUG");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().unwrap()
    }
}
