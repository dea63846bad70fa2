//! Mirror network address allocation.
//!
//! Target VMs are addressed from the top of the mirror network walking
//! down, cluster hosts from the bottom walking up. Both walks are pure
//! functions of the network, so every phase derives the same addresses.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

use phenix_app_common::{AppError, AppResult};

/// Prefix length used when the mirror network omits one.
pub const DEFAULT_MASK: u8 = 16;

/// An immutable mirror network with first/last/next/prev iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorNet {
    net: IpNet,
}

impl MirrorNet {
    /// Parses `address[/mask]`.
    pub fn parse(s: &str) -> AppResult<Self> {
        let (host, mask) = match s.split_once('/') {
            Some((host, mask)) => (host, Some(mask)),
            None => (s, None),
        };

        let addr: IpAddr = host.trim().parse().map_err(|_| AppError::InvalidNetwork {
            address: host.to_string(),
        })?;

        let prefix = match mask {
            Some(mask) => mask.trim().parse::<u8>().map_err(|_| AppError::InvalidMask {
                mask: mask.to_string(),
            })?,
            None => DEFAULT_MASK,
        };

        let net = IpNet::new(addr, prefix).map_err(|_| AppError::InvalidMask {
            mask: prefix.to_string(),
        })?;

        Ok(Self { net: net.trunc() })
    }

    pub fn mask(&self) -> u8 {
        self.net.prefix_len()
    }

    /// First assignable address. Networks too small to have a network and
    /// broadcast address start at the network address.
    pub fn first(&self) -> IpAddr {
        let (lo, hi) = self.bounds();
        if hi - lo < 2 {
            self.addr(lo)
        } else {
            self.addr(lo + 1)
        }
    }

    /// Last assignable address.
    pub fn last(&self) -> IpAddr {
        let (lo, hi) = self.bounds();
        if hi - lo < 2 {
            self.addr(hi)
        } else {
            self.addr(hi - 1)
        }
    }

    /// Successor of `addr`, pinned to the top of the block.
    pub fn next(&self, addr: IpAddr) -> IpAddr {
        let (lo, hi) = self.bounds();
        self.addr(to_u128(addr).saturating_add(1).clamp(lo, hi))
    }

    /// Predecessor of `addr`, pinned to the bottom of the block.
    pub fn prev(&self, addr: IpAddr) -> IpAddr {
        let (lo, hi) = self.bounds();
        self.addr(to_u128(addr).saturating_sub(1).clamp(lo, hi))
    }

    fn bounds(&self) -> (u128, u128) {
        (to_u128(self.net.network()), to_u128(self.net.broadcast()))
    }

    fn addr(&self, v: u128) -> IpAddr {
        match self.net {
            // Bounds keep v within the IPv4 block.
            IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(v as u32)),
            IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(v)),
        }
    }
}

fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u128::from(u32::from(a)),
        IpAddr::V6(a) => u128::from(a),
    }
}

impl fmt::Display for MirrorNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}
