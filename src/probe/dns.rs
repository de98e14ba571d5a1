//! Name resolution for probes.

use super::{within, ProbeError, ProberState};

use rand::seq::SliceRandom;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Resolve `host` and pick one of its addresses at random.
///
/// IPv4 records are preferred; IPv6 is used only when a name has no IPv4
/// address. Picking randomly spreads probes across all records of a family
/// instead of always measuring the first one.
pub async fn resolve(host: &str, port: u16, timeout: Duration) -> Result<IpAddr, ProbeError> {
    let addrs: Vec<SocketAddr> =
        within(ProberState::Resolving, timeout, tokio::net::lookup_host((host, port)))
            .await?
            .map_err(|source| ProbeError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();

    pick(&addrs).ok_or_else(|| ProbeError::NoAddress(host.to_string()))
}

fn pick(addrs: &[SocketAddr]) -> Option<IpAddr> {
    let v4: Vec<&SocketAddr> = addrs.iter().filter(|a| a.is_ipv4()).collect();
    let mut rng = rand::thread_rng();
    if v4.is_empty() {
        addrs.choose(&mut rng).map(|a| a.ip())
    } else {
        v4.choose(&mut rng).map(|a| a.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_pick_spreads_over_records() {
        assert_eq!(pick(&[]), None);

        let addrs: Vec<SocketAddr> = (1..=4)
            .map(|i| SocketAddr::from(([10, 0, 0, i], 443)))
            .collect();
        let seen: HashSet<IpAddr> = (0..200).filter_map(|_| pick(&addrs)).collect();
        assert!(seen.len() > 1);
        assert!(seen.iter().all(|ip| addrs.iter().any(|a| a.ip() == *ip)));
    }

    #[test]
    fn test_pick_prefers_ipv4() {
        let mut addrs: Vec<SocketAddr> = (1..=4)
            .map(|i| SocketAddr::from(([0x2001, 0xdb8, 0, 0, 0, 0, 0, i], 443)))
            .collect();
        addrs.push(SocketAddr::from(([192, 0, 2, 7], 443)));
        addrs.push(SocketAddr::from(([192, 0, 2, 8], 443)));

        for _ in 0..200 {
            assert!(pick(&addrs).unwrap().is_ipv4());
        }
    }

    #[test]
    fn test_pick_falls_back_to_ipv6() {
        let addrs = [
            SocketAddr::from(([0x2001, 0xdb8, 0, 0, 0, 0, 0, 1], 443)),
            SocketAddr::from(([0x2001, 0xdb8, 0, 0, 0, 0, 0, 2], 443)),
        ];
        assert!(pick(&addrs).unwrap().is_ipv6());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let ip = resolve("localhost", 80, Duration::from_secs(5)).await.unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn test_resolve_literal() {
        let ip = resolve("127.0.0.1", 80, Duration::from_secs(5)).await.unwrap();
        assert_eq!(ip, IpAddr::from([127, 0, 0, 1]));
    }
}
