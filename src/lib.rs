//! podtunnel library interface
//!
//! Forwards a local TCP port to a port of a pod in a Kubernetes cluster,
//! addressed either directly by pod name or through a service.
//!
//! # Module Organization
//!
//! - [`k8s`] - Target resolution, tunnel sessions and the tunnel registry
//! - [`config`] - Settings file and cluster credential discovery
//! - [`signals`] - Interrupt handling (was_interrupted, CancellationBridge)
//! - [`errors`] - Error types (TunnelError, ResolutionError, Result)
//! - [`status`] - Exit status codes (ExitStatus)
//! - [`core`] - Main execution logic

pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod k8s;
pub mod logging;
pub mod signals;
pub mod status;

pub use errors::{ResolutionError, Result, TunnelError};
pub use k8s::{forward, stop_forwarding, ForwardHandle, ForwardRequest, PortForwardManager};
pub use status::ExitStatus;
