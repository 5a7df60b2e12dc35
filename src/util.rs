use std::net::{IpAddr, Ipv4Addr};

use crate::error::ProbeError;

/// Resolve a hostname or IPv4 literal to the address probes are sent to.
pub async fn resolve_host_to_ipv4(host: &str) -> Result<Ipv4Addr, ProbeError> {
    // First try to parse as IP address
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => return Ok(ip),
        Ok(IpAddr::V6(_)) => {
            return Err(ProbeError::Resolution {
                host: host.to_string(),
                source: None,
            });
        }
        Err(_) => {}
    }

    // If parsing fails, resolve via DNS
    let addr = format!("{}:0", host);
    let addrs = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| ProbeError::Resolution {
            host: host.to_string(),
            source: Some(e),
        })?;

    addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ProbeError::Resolution {
            host: host.to_string(),
            source: None,
        })
}
