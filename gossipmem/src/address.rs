use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MembershipError;

/// Identity of a member: a 4-byte id and a port.
///
/// The id doubles as an IPv4 address, so a [`NodeAddr`] converts losslessly
/// to and from a [`SocketAddrV4`]. Two equal addresses always denote the same
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    pub id: u32,
    pub port: u16,
}

impl NodeAddr {
    pub const fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }

    /// The well-known rendezvous address `0.0.0.1:0`.
    pub const fn default_introducer() -> Self {
        Self::new(1, 0)
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.id)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::from(*self))
    }
}

impl From<SocketAddrV4> for NodeAddr {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<NodeAddr> for SocketAddrV4 {
    fn from(addr: NodeAddr) -> Self {
        SocketAddrV4::new(addr.ip(), addr.port)
    }
}

impl TryFrom<SocketAddr> for NodeAddr {
    type Error = MembershipError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(v6) => Err(MembershipError::BootstrapFailure(format!(
                "IPv6 address {} cannot be used as a member identity",
                v6
            ))),
        }
    }
}

impl FromStr for NodeAddr {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>().map(NodeAddr::from)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}
