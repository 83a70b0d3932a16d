//! CIDR network ranges and lazy host enumeration.

use ipnetwork::{IpNetwork, Ipv4Network};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Errors produced while parsing a network range.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("invalid network range '{input}': {reason}")]
    Invalid { input: String, reason: String },
    #[error("IPv6 range '{0}' is not supported")]
    Unsupported(String),
}

/// An IPv4 CIDR block to scan.
///
/// A bare address (`10.0.0.7`) is accepted and treated as a `/32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange(Ipv4Network);

impl NetworkRange {
    pub fn new(network: Ipv4Network) -> Self {
        Self(network)
    }

    pub fn network(&self) -> Ipv4Network {
        self.0
    }

    /// Number of scannable hosts.
    ///
    /// `/32` is the single address, `/31` is both addresses (point-to-point),
    /// everything else excludes the network and broadcast addresses.
    pub fn host_count(&self) -> u64 {
        let (first, last) = self.bounds();
        u64::from(last) - u64::from(first) + 1
    }

    /// Lazily enumerate the hosts in ascending order.
    ///
    /// Every call starts a fresh iteration.
    pub fn hosts(&self) -> Hosts {
        let (first, last) = self.bounds();
        Hosts {
            next: Some(first),
            last,
        }
    }

    fn bounds(&self) -> (u32, u32) {
        let network = u32::from(self.0.network());
        let broadcast = u32::from(self.0.broadcast());
        match self.0.prefix() {
            32 | 31 => (network, broadcast),
            _ => (network + 1, broadcast - 1),
        }
    }
}

impl FromStr for NetworkRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed: IpNetwork = trimmed.parse().map_err(|e: ipnetwork::IpNetworkError| {
            RangeError::Invalid {
                input: trimmed.to_string(),
                reason: e.to_string(),
            }
        })?;

        match parsed {
            IpNetwork::V4(v4) => {
                // Normalise host bits so 192.168.1.77/24 scans the whole /24
                let normalised = Ipv4Network::new(v4.network(), v4.prefix()).map_err(|e| {
                    RangeError::Invalid {
                        input: trimmed.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Self(normalised))
            }
            IpNetwork::V6(_) => Err(RangeError::Unsupported(trimmed.to_string())),
        }
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.network(), self.0.prefix())
    }
}

/// Iterator over the hosts of a [`NetworkRange`].
#[derive(Debug, Clone)]
pub struct Hosts {
    next: Option<u32>,
    last: u32,
}

impl Iterator for Hosts {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current < self.last {
            Some(current + 1)
        } else {
            None
        };
        Some(Ipv4Addr::from(current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            Some(current) => {
                let remaining = u64::from(self.last) - u64::from(current) + 1;
                let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
                (remaining, Some(remaining))
            }
            None => (0, Some(0)),
        }
    }
}

/// Sum of host counts across ranges. Overlapping ranges are counted twice.
pub fn total_hosts(ranges: &[NetworkRange]) -> u64 {
    ranges.iter().map(NetworkRange::host_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(s: &str) -> NetworkRange {
        s.parse().unwrap()
    }

    #[test]
    fn test_host_counts() {
        assert_eq!(range("10.0.0.0/30").host_count(), 2);
        assert_eq!(range("192.168.1.0/24").host_count(), 254);
        assert_eq!(range("10.0.0.0/31").host_count(), 2);
        assert_eq!(range("10.0.0.9/32").host_count(), 1);
        assert_eq!(range("10.0.0.9").host_count(), 1);
        assert_eq!(range("0.0.0.0/0").host_count(), (1u64 << 32) - 2);
    }

    #[test]
    fn test_hosts_skip_network_and_broadcast() {
        let hosts: Vec<Ipv4Addr> = range("10.0.0.0/30").hosts().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );

        let p2p: Vec<Ipv4Addr> = range("10.0.0.0/31").hosts().collect();
        assert_eq!(
            p2p,
            vec![Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 1)]
        );
    }

    #[test]
    fn test_hosts_is_restartable() {
        let r = range("192.168.5.0/29");
        let first: Vec<_> = r.hosts().collect();
        let second: Vec<_> = r.hosts().collect();
        assert_eq!(first, second);
        assert_eq!(first.len() as u64, r.host_count());
        assert_eq!(r.hosts().size_hint(), (6, Some(6)));
    }

    #[test]
    fn test_top_of_address_space_terminates() {
        let hosts: Vec<_> = range("255.255.255.252/30").hosts().collect();
        assert_eq!(hosts.len(), 2);
        let single: Vec<_> = range("255.255.255.255/32").hosts().collect();
        assert_eq!(single, vec![Ipv4Addr::BROADCAST]);
    }

    #[test]
    fn test_host_bits_are_normalised() {
        let r = range("192.168.1.77/24");
        assert_eq!(r.to_string(), "192.168.1.0/24");
        assert_eq!(r.hosts().next(), Some(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "not-a-cidr".parse::<NetworkRange>(),
            Err(RangeError::Invalid { .. })
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<NetworkRange>(),
            Err(RangeError::Invalid { .. })
        ));
        assert!(matches!(
            "fe80::/64".parse::<NetworkRange>(),
            Err(RangeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_total_hosts_counts_overlap() {
        let ranges = [range("10.0.0.0/30"), range("10.0.0.0/30"), range("10.0.1.0/24")];
        assert_eq!(total_hosts(&ranges), 2 + 2 + 254);
    }
}
