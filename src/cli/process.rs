//! Post-processing argument logic
//!
//! Turns parsed arguments plus the settings file into a forward request and
//! the tunnel options it runs with.

use crate::cli::args::Args;
use crate::config::{ClusterSource, Settings};
use crate::errors::TunnelError;
use crate::k8s::parser::{is_k8s_url, parse_ports, parse_target_url};
use crate::k8s::portforward::{ForwardRequest, TunnelOptions};
use crate::logging::LogLevel;

/// Namespace used when neither the command line nor the config names one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Everything needed to open the tunnel the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub request: ForwardRequest,
    pub options: TunnelOptions,
    pub log_level: LogLevel,
}

/// Process parsed args against the settings file
pub fn process_args(args: &Args, settings: &Settings) -> Result<Invocation, TunnelError> {
    let (target, namespace, url_port) = if is_k8s_url(&args.target) {
        let url = parse_target_url(&args.target)?;
        if let Some(ns) = args.namespace.as_deref() {
            if ns != url.namespace {
                return Err(TunnelError::Argument(format!(
                    "Namespace {} conflicts with namespace {} from the target URL",
                    ns, url.namespace
                )));
            }
        }
        (url.name, url.namespace, url.port)
    } else {
        let namespace = args
            .namespace
            .clone()
            .or_else(|| settings.namespace.clone())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        (args.target.clone(), namespace, None)
    };

    let ports = parse_ports(&args.ports, url_port)?;
    let context = args.context.clone().or_else(|| settings.context.clone());

    let source = if args.in_cluster {
        ClusterSource::in_cluster()
    } else {
        let explicit = args.kubeconfig.clone().or_else(|| settings.kubeconfig.clone());
        ClusterSource::discover(explicit, context)
    };

    let request =
        ForwardRequest::new(&namespace, &target, ports.local, ports.remote).with_source(source);
    request.validate()?;

    let mut options = settings.tunnel_options();
    if let Some(address) = args.address {
        options.bind_address = address;
    }

    let log_level = args.log_level.or(settings.log_level).unwrap_or_default();

    Ok(Invocation {
        request,
        options,
        log_level,
    })
}
