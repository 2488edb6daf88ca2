use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use url::Url;

use crate::error::GatewayError;
use crate::resource::FetchError;

/// Check if an IPv4 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()          // 127.0.0.0/8
        || ip.is_private()    // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
        || ip.is_link_local() // 169.254.0.0/16
        || ip.is_broadcast()  // 255.255.255.255
        || ip.is_unspecified() // 0.0.0.0
        || ip.is_multicast()  // 224.0.0.0/4
        || ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGNAT)
}

/// Check if an IPv6 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    ip.is_loopback()       // ::1
        || ip.is_unspecified() // ::
        || ip.is_multicast()   // ff00::/8
        || {
            let segments = ip.segments();
            // fc00::/7 (unique local)
            (segments[0] & 0xFE00) == 0xFC00
            // fe80::/10 (link-local)
            || (segments[0] & 0xFFC0) == 0xFE80
            || match ip.to_ipv4_mapped() {
                Some(v4) => is_private_ipv4(&v4),
                None => false,
            }
        }
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_private_ipv4(ip),
        IpAddr::V6(ip) => is_private_ipv6(ip),
    }
}

/// Validate a fetch target: absolute http(s) URL, no credentials,
/// no private/loopback IPs, no localhost domains.
pub fn validate_target_url(url: &str) -> Result<Url, GatewayError> {
    let parsed =
        Url::parse(url).map_err(|_| GatewayError::InvalidUrl("invalid URL format".to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GatewayError::InvalidUrl(
            "target must use http or https".to_string(),
        ));
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(GatewayError::InvalidUrl(
            "target must not embed credentials".to_string(),
        ));
    }

    match parsed.host() {
        Some(url::Host::Ipv4(ip)) => {
            if is_private_ipv4(&ip) {
                return Err(GatewayError::InvalidUrl(
                    "target cannot be a private or loopback IP address".to_string(),
                ));
            }
        }
        Some(url::Host::Ipv6(ip)) => {
            if is_private_ipv6(&ip) {
                return Err(GatewayError::InvalidUrl(
                    "target cannot be a private or loopback IP address".to_string(),
                ));
            }
        }
        Some(url::Host::Domain(domain)) => {
            let domain_lower = domain.to_lowercase();
            if domain_lower == "localhost"
                || domain_lower.ends_with(".localhost")
                || domain_lower.ends_with(".local")
                || domain_lower.ends_with(".internal")
            {
                return Err(GatewayError::InvalidUrl(
                    "target cannot be localhost or local domain".to_string(),
                ));
            }
        }
        None => {
            return Err(GatewayError::InvalidUrl(
                "target URL must have a host".to_string(),
            ));
        }
    }

    Ok(parsed)
}

/// Resolve `host` once and return the first address, failing if any
/// resolved address is private. The caller pins the connection to it.
pub async fn resolve_public_addr(host: &str, port: u16) -> Result<SocketAddr, FetchError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| FetchError::Failed(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.iter().any(|addr| is_private_ip(&addr.ip())) {
        return Err(FetchError::Blocked(
            "target resolves to a private IP address".to_string(),
        ));
    }

    addrs
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Failed(format!("no addresses found for {host}")))
}
