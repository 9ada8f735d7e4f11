pub mod balancer;
pub mod dialer;
pub mod events;
pub mod interface;
pub mod listener;
pub mod netif;
pub mod policy;
pub mod ring;
pub mod source_store;
pub mod store;

use std::net::SocketAddr;
use std::str::FromStr;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::core::error::DialError;

pub use balancer::Balancer;
pub use dialer::Dialer;
pub use interface::{Interface, TrackedStream};
pub use listener::Listener;
pub use policy::{
    AvoidPolicy, BlockPolicy, GenPolicy, Policy, PolicyCode, PolicySnapshot, ReservedPolicy,
    StickyPolicy,
};
pub use ring::Ring;
pub use source_store::{SourceSnapshot, SourceStore};
pub use store::Store;

/// Network family requested by a dial. Mirrors the `"tcp"`, `"tcp4"`,
/// `"tcp6"` strings accepted on the consumer interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    /// Whether a resolved address belongs to this network family.
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }
}

impl FromStr for Network {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(DialError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Target of an admission check.
///
/// Storage membership decisions evaluate policies against [`Target::Any`];
/// target-specific policies (reserve, avoid, sticky) must accept the
/// wildcard so that a source is only evicted from the protected store when
/// it is rejected for *every* target. A concrete dial evaluates against
/// [`Target::Addr`] and policies apply precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    Any,
    Addr(&'a str),
}

/// Live traffic counters of a source, captured at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub open_conns: u64,
}

/// Object-safe alias for the byte streams produced by sources.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type BoxedConn = Box<dyn Conn>;

impl std::fmt::Debug for dyn Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Conn")
    }
}

/// An abstract network egress: something with a stable identity that can
/// produce outbound connections.
///
/// Two sources with the same `name` are the same identity as far as policy
/// matching is concerned.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Typed attribute accessor. Sources that collect traffic counters
    /// return them here; others return `None`.
    fn metrics(&self) -> Option<MetricsSnapshot> {
        None
    }

    /// Dial `target` (a `host:port` string) on the requested network.
    fn dial<'a>(
        &'a self,
        network: Network,
        target: &'a str,
    ) -> BoxFuture<'a, Result<BoxedConn, DialError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parses_known_strings() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("tcp4".parse::<Network>().unwrap(), Network::Tcp4);
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        assert!("udp".parse::<Network>().is_err());
    }

    #[test]
    fn network_family_filtering() {
        let v4: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let v6: SocketAddr = "[::1]:80".parse().unwrap();

        assert!(Network::Tcp.accepts(&v4));
        assert!(Network::Tcp.accepts(&v6));
        assert!(Network::Tcp4.accepts(&v4));
        assert!(!Network::Tcp4.accepts(&v6));
        assert!(Network::Tcp6.accepts(&v6));
        assert!(!Network::Tcp6.accepts(&v4));
    }
}
