//! Target parsing
//!
//! Parses `k8s://` target URLs and the `LOCAL:REMOTE` port notation.

use crate::errors::TunnelError;

/// Parsed `k8s://name.namespace[:port]` target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    /// Pod or service name
    pub name: String,
    /// Kubernetes namespace
    pub namespace: String,
    /// Remote port, when the URL names one
    pub port: Option<u16>,
}

/// Parse a k8s:// URL into components
///
/// # URL Format
/// ```text
/// k8s://name.namespace[:port][/]
/// ```
///
/// # Examples
/// ```
/// use podtunnel::k8s::parse_target_url;
///
/// let url = parse_target_url("k8s://api-server.default:8080").unwrap();
/// assert_eq!(url.name, "api-server");
/// assert_eq!(url.namespace, "default");
/// assert_eq!(url.port, Some(8080));
/// ```
pub fn parse_target_url(url: &str) -> Result<TargetUrl, TunnelError> {
    // Must start with k8s://
    let url = url
        .strip_prefix("k8s://")
        .ok_or_else(|| TunnelError::Argument("K8s URL must start with k8s://".to_string()))?;

    // A bare trailing slash is tolerated; paths mean nothing to a tunnel
    let host_port = url.strip_suffix('/').unwrap_or(url);
    if host_port.contains('/') || host_port.contains('?') {
        return Err(TunnelError::Argument(format!(
            "K8s URL cannot carry a path or query: {}",
            url
        )));
    }

    // Parse host:port
    let (host, port) = match host_port.rfind(':') {
        Some(idx) => {
            let port_str = &host_port[idx + 1..];
            let port = parse_port(port_str, false)?;
            (&host_port[..idx], Some(port))
        }
        None => (host_port, None),
    };

    // Parse name.namespace
    let (name, namespace) = match host.find('.') {
        Some(idx) => (&host[..idx], &host[idx + 1..]),
        None => {
            return Err(TunnelError::Argument(format!(
                "K8s URL must include namespace: k8s://name.namespace. Got: {}",
                host
            )));
        }
    };

    if name.is_empty() {
        return Err(TunnelError::Argument(
            "Name cannot be empty in k8s URL".to_string(),
        ));
    }

    if namespace.is_empty() {
        return Err(TunnelError::Argument(
            "Namespace cannot be empty in k8s URL".to_string(),
        ));
    }

    validate_k8s_name(name, "target")?;
    validate_k8s_name(namespace, "namespace")?;

    Ok(TargetUrl {
        name: name.to_string(),
        namespace: namespace.to_string(),
        port,
    })
}

/// Local and remote side of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub local: u16,
    pub remote: u16,
}

/// Parse `LOCAL:REMOTE` or a single port.
///
/// A single port is the remote port forwarded to the same local port, unless
/// `remote` is already known (from a target URL), in which case it is the
/// local port.
pub fn parse_ports(spec: &str, remote: Option<u16>) -> Result<PortPair, TunnelError> {
    let spec = spec.trim();
    match spec.split_once(':') {
        Some((local, remote_str)) => {
            let local = if local.is_empty() { 0 } else { parse_port(local, true)? };
            let parsed_remote = parse_port(remote_str, false)?;
            if let Some(url_port) = remote {
                if url_port != parsed_remote {
                    return Err(TunnelError::Argument(format!(
                        "Remote port {} conflicts with port {} from the target URL",
                        parsed_remote, url_port
                    )));
                }
            }
            Ok(PortPair {
                local,
                remote: parsed_remote,
            })
        }
        None => match remote {
            Some(remote) => Ok(PortPair {
                local: parse_port(spec, true)?,
                remote,
            }),
            None => {
                let port = parse_port(spec, false)?;
                Ok(PortPair {
                    local: port,
                    remote: port,
                })
            }
        },
    }
}

fn parse_port(value: &str, allow_zero: bool) -> Result<u16, TunnelError> {
    let port: u16 = value
        .parse()
        .map_err(|_| TunnelError::Argument(format!("Invalid port: {}", value)))?;
    if port == 0 && !allow_zero {
        return Err(TunnelError::Argument(format!("Invalid port: {}", value)));
    }
    Ok(port)
}

/// Validate a Kubernetes resource name used in a target URL
fn validate_k8s_name(name: &str, kind: &str) -> Result<(), TunnelError> {
    // DNS labels must:
    // - Be 63 characters or fewer
    // - Contain only lowercase alphanumeric characters or '-'
    // - Start and end with an alphanumeric character

    if name.len() > 63 {
        return Err(TunnelError::Argument(format!(
            "K8s {} name too long (max 63 chars): {}",
            kind, name
        )));
    }

    if !name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false)
    {
        return Err(TunnelError::Argument(format!(
            "K8s {} name must start with a lowercase letter or digit: {}",
            kind, name
        )));
    }

    if !name
        .chars()
        .last()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false)
    {
        return Err(TunnelError::Argument(format!(
            "K8s {} name must end with alphanumeric character: {}",
            kind, name
        )));
    }

    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(TunnelError::Argument(format!(
                "K8s {} name contains invalid character '{}': {}",
                kind, c, name
            )));
        }
    }

    Ok(())
}

/// Check if a target is a k8s:// URL
pub fn is_k8s_url(url: &str) -> bool {
    url.starts_with("k8s://")
}
