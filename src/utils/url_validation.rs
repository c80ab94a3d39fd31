//! Outbound URL checks for webhook tools (SSRF protection).
//!
//! Webhook tool URLs are checked twice:
//! - statically at startup by [`check_webhook_url`]: HTTPS only, a domain
//!   host, no raw IP literals
//! - at call time by [`resolve_public_addrs`], which resolves the host and
//!   refuses to proceed if any address is private or internal
//!
//! Local development can opt into `http://localhost` targets with
//! [`UrlPolicy::allow_local`]; loopback targets then skip both checks.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS, got: {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL resolves to private/internal IP address: {0}")]
    PrivateIpDetected(IpAddr),

    #[error("Failed to resolve hostname: {0}")]
    DnsResolutionFailed(String),

    #[error("URL host is a raw IP address which is not allowed")]
    RawIpNotAllowed,
}

/// How strict outbound URL checks are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlPolicy {
    /// Permit `http`/`https` to loopback hosts (development only).
    pub allow_local: bool,
}

impl UrlPolicy {
    pub fn strict() -> Self {
        Self { allow_local: false }
    }

    pub fn development() -> Self {
        Self { allow_local: true }
    }
}

/// IPv4 ranges that must never be reached by a tool call.
const BLOCKED_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
];

fn in_v4_range(ip: Ipv4Addr, base: Ipv4Addr, prefix: u8) -> bool {
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (u32::from(ip) & mask) == (u32::from(base) & mask)
}

pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    BLOCKED_V4
        .iter()
        .any(|(base, prefix)| in_v4_range(*ip, *base, *prefix))
}

pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&v4);
    }
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local, 2001:db8::/32 documentation
    (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

fn is_loopback_host(parsed: &Url) -> bool {
    match parsed.host() {
        Some(url::Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Static checks on a webhook URL. Does not touch the network.
pub fn check_webhook_url(url: &str, policy: UrlPolicy) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;
    let scheme = parsed.scheme().to_string();

    if policy.allow_local && is_loopback_host(&parsed) {
        if scheme != "http" && scheme != "https" {
            return Err(UrlValidationError::HttpsRequired(scheme));
        }
        return Ok(parsed);
    }

    if scheme != "https" {
        return Err(UrlValidationError::HttpsRequired(scheme));
    }

    match parsed.host() {
        Some(url::Host::Domain(d)) if d.eq_ignore_ascii_case("localhost") => {
            Err(UrlValidationError::PrivateIpDetected(IpAddr::V4(
                Ipv4Addr::LOCALHOST,
            )))
        }
        Some(url::Host::Domain(_)) => Ok(parsed),
        Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => {
            tracing::warn!(url = %url, "Webhook URL contains raw IP address");
            Err(UrlValidationError::RawIpNotAllowed)
        }
        None => Err(UrlValidationError::MissingHost),
    }
}

/// Resolve a checked URL's host and reject private destinations.
///
/// Loopback targets permitted by the policy are returned without resolution.
pub async fn resolve_public_addrs(
    parsed: &Url,
    policy: UrlPolicy,
) -> Result<Vec<SocketAddr>, UrlValidationError> {
    if policy.allow_local && is_loopback_host(parsed) {
        return Ok(Vec::new());
    }

    let host = parsed.host_str().ok_or(UrlValidationError::MissingHost)?;
    let port = parsed.port_or_known_default().unwrap_or(443);

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| UrlValidationError::DnsResolutionFailed(format!("{host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(UrlValidationError::DnsResolutionFailed(format!(
            "No addresses found for {host}"
        )));
    }

    if let Some(private) = addrs.iter().find(|a| is_private_ip(&a.ip())) {
        tracing::warn!(
            host = %host,
            resolved_ip = %private.ip(),
            "Webhook URL resolves to private IP address"
        );
        return Err(UrlValidationError::PrivateIpDetected(private.ip()));
    }

    Ok(addrs)
}
