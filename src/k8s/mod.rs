//! Kubernetes tunnel core
//!
//! Opens local TCP listeners that tunnel into one pod, addressed either by
//! pod name or by a service name that is resolved to a ready pod.
//!
//! # Flow
//! ```text
//! forward:  resolver -> dialer -> session -> registry -> cancellation bridge
//! stop:     registry (pod key, then service alias) -> session stop signal
//! ```
//!
//! # Target URL Format
//! ```text
//! k8s://name.namespace[:port]
//! ```

pub mod cluster;
pub mod dialer;
pub mod parser;
pub mod portforward;
pub mod registry;
pub mod resolver;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{
    BoxedStream, ClusterClient, ForwardTransport, KubeCluster, KubeTransport, PodInfo, PodPhase,
    PodStatusView, ServiceInfo, TunnelStream,
};
pub use dialer::{ConnectionDescriptor, Dialer};
pub use parser::{is_k8s_url, parse_ports, parse_target_url, PortPair, TargetUrl};
pub use portforward::{
    forward, get_port_forward_manager, stop_forwarding, ForwardHandle, ForwardRequest,
    PortForwardManager, TunnelOptions,
};
pub use registry::{AddressKey, AliasKey, Registry};
pub use resolver::{Addressing, PollPolicy, ResolvedTarget, TargetResolver};
pub use session::{StopSignal, TunnelSession, TunnelState};
