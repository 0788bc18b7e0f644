//! CLI argument definitions using clap

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogLevel;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "podtunnel",
    version,
    about = "Forward a local port to a pod or service in a Kubernetes cluster",
    after_help = "Examples:\n  \
                  podtunnel -n shop web-7f9c 8080:80\n  \
                  podtunnel -n shop frontend 9000:80\n  \
                  podtunnel k8s://frontend.shop:80 9000"
)]
pub struct Args {
    /// Pod or service name, or k8s://name.namespace[:port]
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// LOCAL:REMOTE, or a single port used on both sides
    #[arg(value_name = "PORTS")]
    pub ports: String,

    /// Namespace of the target (default: from config, else "default")
    #[arg(short = 'n', long, env = "PODTUNNEL_NAMESPACE")]
    pub namespace: Option<String>,

    /// Path to the kubeconfig file
    #[arg(long, value_name = "PATH", conflicts_with = "in_cluster")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long, value_name = "NAME")]
    pub context: Option<String>,

    /// Use the in-cluster service account even if a kubeconfig exists
    #[arg(long)]
    pub in_cluster: bool,

    /// Local address to listen on
    #[arg(long, value_name = "ADDR")]
    pub address: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}
