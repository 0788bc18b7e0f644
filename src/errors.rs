//! Error types for podtunnel

use std::io;
use thiserror::Error;

/// Why a pod or service name could not be turned into a ready pod
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("no pod or service with name {name} found in namespace {namespace}")]
    NotFound { namespace: String, name: String },

    #[error("no ready pod available for service {service} in namespace {namespace}")]
    NoReadyTarget { namespace: String, service: String },

    #[error(
        "pod {namespace}/{pod} did not become ready in time ({checks} checks, last phase {phase})"
    )]
    ReadinessTimeout {
        namespace: String,
        pod: String,
        checks: u32,
        phase: String,
    },
}

/// Main error type for podtunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tunnel failed during startup: {0}")]
    Startup(#[source] Box<TunnelError>),

    #[error("Local address {address}:{port} is not available: {source}")]
    LocalResource {
        address: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
