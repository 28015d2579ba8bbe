use std::net::IpAddr;

use ipnet::IpNet;

/// CIDR blocks considered private/loopback/link-local for SSRF defense.
fn blocked_nets() -> &'static [&'static str] {
    &[
        "127.0.0.0/8",
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "0.0.0.0/8",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
}

/// Whether `ip` falls inside any private/loopback/link-local range and
/// should be rejected as a webhook delivery destination.
#[must_use]
pub fn is_blocked(ip: IpAddr) -> bool {
    blocked_nets()
        .iter()
        .filter_map(|cidr| cidr.parse::<IpNet>().ok())
        .any(|net| net.contains(&ip))
}

/// Re-resolves `host` and rejects the delivery if any resolved address is
/// private/loopback/link-local. `host` is the hostname only (no port).
pub async fn resolve_and_check(host: &str) -> Result<Vec<IpAddr>, String> {
    let lookup = format!("{host}:0");
    let addrs = tokio::net::lookup_host(&lookup)
        .await
        .map_err(|e| format!("dns resolution failed: {e}"))?
        .map(|sa| sa.ip())
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err("no addresses resolved".to_string());
    }
    if let Some(blocked) = addrs.iter().find(|ip| is_blocked(**ip)) {
        return Err(format!("{blocked} is a private/loopback/link-local address"));
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_blocked() {
        assert!(is_blocked("127.0.0.1".parse().unwrap()));
        assert!(is_blocked("::1".parse().unwrap()));
    }

    #[test]
    fn private_ranges_are_blocked() {
        assert!(is_blocked("10.1.2.3".parse().unwrap()));
        assert!(is_blocked("192.168.0.1".parse().unwrap()));
        assert!(is_blocked("172.16.5.5".parse().unwrap()));
        assert!(is_blocked("169.254.1.1".parse().unwrap()));
    }

    #[test]
    fn public_address_is_not_blocked() {
        assert!(!is_blocked("8.8.8.8".parse().unwrap()));
    }
}
