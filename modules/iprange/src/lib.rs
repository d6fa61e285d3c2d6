//! Address range expansion: single addresses, inclusive `start-end` ranges and CIDR blocks.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// CGMiner API port, used when a port string is empty.
pub const DEFAULT_PORT: u16 = 4028;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid address spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },
    #[error("invalid range '{spec}': start address must be less than or equal to end address")]
    RangeOrder { spec: String },
    #[error("unsupported address family in '{spec}': only IPv4 ranges and CIDR blocks are supported")]
    UnsupportedFamily { spec: String },
    #[error("invalid port '{0}': must be between 1 and 65535")]
    InvalidPort(String),
}

impl RangeError {
    /// The address spec that failed, if the error came from expansion.
    pub fn spec(&self) -> Option<&str> {
        match self {
            RangeError::InvalidSpec { spec, .. } | RangeError::RangeOrder { spec } | RangeError::UnsupportedFamily { spec } => Some(spec),
            RangeError::InvalidPort(_) => None,
        }
    }

    fn invalid(spec: &str, reason: impl Into<String>) -> Self {
        RangeError::InvalidSpec { spec: spec.to_string(), reason: reason.into() }
    }
}

/// Ordered, duplicate-free list of host addresses in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    ips: Vec<IpAddr>,
}

impl AddressSet {
    pub fn count(&self) -> usize {
        self.ips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }

    pub fn as_slice(&self) -> &[IpAddr] {
        &self.ips
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IpAddr> {
        self.ips.iter()
    }

    pub fn to_string_list(&self) -> Vec<String> {
        self.ips.iter().map(|ip| ip.to_string()).collect()
    }
}

impl IntoIterator for AddressSet {
    type Item = IpAddr;
    type IntoIter = std::vec::IntoIter<IpAddr>;
    fn into_iter(self) -> Self::IntoIter {
        self.ips.into_iter()
    }
}

impl<'a> IntoIterator for &'a AddressSet {
    type Item = &'a IpAddr;
    type IntoIter = std::slice::Iter<'a, IpAddr>;
    fn into_iter(self) -> Self::IntoIter {
        self.ips.iter()
    }
}

/// Expand one spec. `/` selects CIDR, `-` an inclusive range, anything else a single address.
pub fn expand_one(spec: &str) -> Result<AddressSet, RangeError> {
    let spec = spec.trim();
    let ips = if spec.contains('/') {
        expand_cidr(spec)?
    } else if spec.contains('-') {
        expand_range(spec)?
    } else {
        let ip: IpAddr = spec.parse().map_err(|_| RangeError::invalid(spec, "not an IP address"))?;
        vec![ip]
    };
    Ok(AddressSet { ips })
}

/// Expand every spec in order, failing on the first bad one. Later duplicates are dropped.
pub fn expand_many<S: AsRef<str>>(specs: &[S]) -> Result<AddressSet, RangeError> {
    let mut seen = HashSet::new();
    let mut ips = Vec::new();
    for spec in specs {
        for ip in expand_one(spec.as_ref())? {
            if seen.insert(ip) {
                ips.push(ip);
            }
        }
    }
    Ok(AddressSet { ips })
}

/// Usable hosts of an IPv4 network: network and broadcast are dropped unless the
/// prefix is /31 or /32.
fn expand_cidr(spec: &str) -> Result<Vec<IpAddr>, RangeError> {
    let net: IpNet = spec.parse().map_err(|e| RangeError::invalid(spec, format!("invalid CIDR notation: {}", e)))?;
    match net {
        IpNet::V4(v4) => Ok(v4.hosts().map(IpAddr::V4).collect()),
        IpNet::V6(_) => Err(RangeError::UnsupportedFamily { spec: spec.to_string() }),
    }
}

fn expand_range(spec: &str) -> Result<Vec<IpAddr>, RangeError> {
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| RangeError::invalid(spec, "expected start-end"))?;
    let start: IpAddr = start.trim().parse().map_err(|_| RangeError::invalid(spec, "invalid start address"))?;
    let end: IpAddr = end.trim().parse().map_err(|_| RangeError::invalid(spec, "invalid end address"))?;
    let (start, end) = match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => (u32::from(s), u32::from(e)),
        _ => return Err(RangeError::UnsupportedFamily { spec: spec.to_string() }),
    };
    if start > end {
        return Err(RangeError::RangeOrder { spec: spec.to_string() });
    }
    // RangeInclusive<u32> stops at u32::MAX without wrapping
    Ok((start..=end).map(|n| IpAddr::V4(Ipv4Addr::from(n))).collect())
}

/// Parse a TCP port. An empty string selects [`DEFAULT_PORT`].
pub fn parse_port(s: &str) -> Result<u16, RangeError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(DEFAULT_PORT);
    }
    match s.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(RangeError::InvalidPort(s.to_string())),
    }
}
