//! Client address extraction, including the trusted-reverse-proxy policy.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

/// Which peers are allowed to speak for their clients via forwarding headers.
///
/// When a request arrives from a matching address, the effective client IP is
/// read from `X-Real-IP` or `X-Forwarded-For`. Everything else keeps its
/// transport peer address - forwarding headers from arbitrary clients are
/// attacker-controlled.
#[derive(Debug, Clone, Default)]
pub enum TrustedProxy {
    #[default]
    None,
    Ip(IpAddr),
    Cidr {
        net: IpAddr,
        prefix: u8,
    },
}

impl TrustedProxy {
    /// Parses an IP address (`127.0.0.1`) or CIDR range (`10.0.0.0/8`).
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Ok(ip) = IpAddr::from_str(s) {
            return Ok(TrustedProxy::Ip(ip));
        }
        if let Some((addr, prefix)) = s.split_once('/') {
            let net = IpAddr::from_str(addr)
                .map_err(|_| format!("invalid network address {addr:?}"))?;
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| format!("invalid prefix length {prefix:?}"))?;
            let max = match net {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix > max {
                return Err(format!("prefix /{prefix} exceeds /{max}"));
            }
            return Ok(TrustedProxy::Cidr { net, prefix });
        }
        Err("must be an IP address (e.g. 127.0.0.1) or CIDR range (e.g. 10.0.0.0/8)".into())
    }

    /// True when `ip` is covered by this policy.
    pub fn matches(&self, ip: IpAddr) -> bool {
        match *self {
            TrustedProxy::None => false,
            TrustedProxy::Ip(trusted) => trusted == ip,
            TrustedProxy::Cidr { net, prefix } => cidr_contains(net, prefix, ip),
        }
    }
}

fn cidr_contains(net: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            (u32::from_be_bytes(net.octets()) & mask) == (u32::from_be_bytes(ip.octets()) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            (u128::from_be_bytes(net.octets()) & mask) == (u128::from_be_bytes(ip.octets()) & mask)
        }
        _ => false,
    }
}

/// The effective client IP for a request.
///
/// The transport peer address comes from the connection; when that peer is a
/// trusted proxy, the first of `X-Real-IP` / `X-Forwarded-For` wins.
pub fn client_ip<B>(req: &Request<B>, proxy: &TrustedProxy) -> IpAddr {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if proxy.matches(peer) {
        if let Some(forwarded) = forwarded_ip(req.headers()) {
            return forwarded;
        }
    }
    peer
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = IpAddr::from_str(real.trim()) {
            return Some(ip);
        }
    }
    // X-Forwarded-For is a comma-separated chain; the first hop is the client.
    if let Some(fwd) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = fwd.split(',').next()?.trim();
        if let Ok(ip) = IpAddr::from_str(first) {
            return Some(ip);
        }
    }
    None
}
