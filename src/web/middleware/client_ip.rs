//! Client IP resolution against operator-trusted reverse proxies.
//!
//! The socket peer address is authoritative unless the peer is inside one of
//! the configured trusted CIDR ranges, in which case the first entry of
//! `X-Forwarded-For` (the original client in a forwarding chain) is used
//! instead. An untrusted peer presenting the header cannot override the
//! stored provenance.

use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use tracing::{error, warn};

/// Forwarded-address header consulted for trusted peers.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// The connection-level address was not `host:port`. The transport always
    /// hands us a well-formed peer address, so this is a server defect.
    #[error("could not split address {addr:?} into host and port")]
    AddressParse { addr: String },
    /// A trusted proxy forwarded an unparseable client address. A trusted hop
    /// producing garbage is a policy violation, not something to paper over.
    #[error("failed to parse IP from {FORWARDED_FOR_HEADER} header")]
    InvalidForwardedAddress { client: String },
}

/// Resolve the authoritative client IP for a request.
pub fn resolve(
    direct: &str,
    forwarded_for: Option<&str>,
    trusted_ranges: &[IpNet],
) -> Result<IpAddr, TrustError> {
    let peer: SocketAddr = direct.parse().map_err(|_| TrustError::AddressParse {
        addr: direct.to_owned(),
    })?;
    let direct_ip = peer.ip();

    let Some(forwarded_for) = forwarded_for.filter(|v| !v.is_empty()) else {
        return Ok(direct_ip);
    };

    if !is_trusted(direct_ip, trusted_ranges) {
        warn!(
            forwarded_for,
            peer = %direct_ip,
            "untrusted remote attempted to override stored IP"
        );
        return Ok(direct_ip);
    }

    // Take the first comma-delimited address: the original client. Intermediate
    // hops are not checked against the trusted ranges -- a trusted proxy
    // appending to and forwarding the header it received is an implicit
    // expression of trust, honored transitively.
    let client = forwarded_for.split(',').next().unwrap_or("").trim();
    match client.parse::<IpAddr>() {
        Ok(ip) => Ok(ip),
        Err(_) => {
            error!(
                client,
                peer = %direct_ip,
                "couldn't use trusted {} header",
                FORWARDED_FOR_HEADER
            );
            Err(TrustError::InvalidForwardedAddress {
                client: client.to_owned(),
            })
        }
    }
}

fn is_trusted(ip: IpAddr, trusted_ranges: &[IpNet]) -> bool {
    trusted_ranges.iter().any(|net| net.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(cidrs: &[&str]) -> Vec<IpNet> {
        cidrs.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn direct_ip_without_forwarded_header() {
        let ip = resolve("1.2.3.4:5678", None, &ranges(&["10.0.0.0/8"])).unwrap();
        assert_eq!(ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn untrusted_peer_cannot_override() {
        let ip = resolve("1.2.3.4:5678", Some("9.9.9.9"), &ranges(&["10.0.0.0/8"])).unwrap();
        assert_eq!(ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn trusted_peer_yields_first_forwarded_hop() {
        let ip = resolve(
            "10.0.0.1:443",
            Some("9.9.9.9, 8.8.8.8"),
            &ranges(&["10.0.0.0/8"]),
        )
        .unwrap();
        assert_eq!(ip, "9.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn trusted_peer_with_garbage_header_is_fatal() {
        let err = resolve("10.0.0.1:443", Some("not-an-ip"), &ranges(&["10.0.0.0/8"]))
            .unwrap_err();
        assert!(matches!(err, TrustError::InvalidForwardedAddress { .. }));
    }

    #[test]
    fn unparseable_peer_address_is_fatal() {
        // No port -- the transport never produces this.
        let err = resolve("1.2.3.4", None, &[]).unwrap_err();
        assert!(matches!(err, TrustError::AddressParse { .. }));
    }

    #[test]
    fn empty_forwarded_header_is_ignored() {
        let ip = resolve("10.0.0.1:443", Some(""), &ranges(&["10.0.0.0/8"])).unwrap();
        assert_eq!(ip, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ipv6_peer_resolves() {
        let ip = resolve("[2001:db8::1]:8080", None, &[]).unwrap();
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ipv6_trusted_range_honors_forwarded() {
        let ip = resolve(
            "[2001:db8::1]:8080",
            Some("9.9.9.9"),
            &ranges(&["2001:db8::/32"]),
        )
        .unwrap();
        assert_eq!(ip, "9.9.9.9".parse::<IpAddr>().unwrap());
    }
}
