use axum::http::HeaderMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Sent when no header or connection address yields a usable IP.
pub const UNKNOWN_CLIENT_IP: &str = "0.0.0.0";

pub const DEFAULT_TRUSTED_HEADER: &str = "x-real-ip";

/// Resolve the originating client address.
///
/// Priority: the trusted proxy header, then the first public hop of
/// `X-Forwarded-For` (or its first valid hop when every hop is private),
/// then the connection address, then [`UNKNOWN_CLIENT_IP`].
pub fn resolve_client_ip(
    headers: &HeaderMap,
    connect: Option<SocketAddr>,
    trusted_header: &str,
) -> String {
    trusted_header_ip(headers, trusted_header)
        .or_else(|| forwarded_for_ip(headers))
        .or_else(|| connect.map(|c| c.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
}

fn trusted_header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_hop)
}

fn forwarded_for_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())?;
    let hops: Vec<IpAddr> = xff.split(',').filter_map(parse_hop).collect();

    hops.iter()
        .copied()
        .find(is_public)
        .or_else(|| hops.first().copied())
}

/// Accepts `1.2.3.4`, `1.2.3.4:8080`, `::1` and `[::1]:8080`.
fn parse_hop(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
        .or_else(|| {
            raw.strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .and_then(|r| r.parse::<IpAddr>().ok())
        })
}

pub fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    // 100.64.0.0/10 carrier-grade NAT
    let shared = a == 100 && (64..128).contains(&b);

    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || shared)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = first & 0xfe00 == 0xfc00;
    let link_local = first & 0xffc0 == 0xfe80;

    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}
