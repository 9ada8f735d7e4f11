use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use uuid::Uuid;

use crate::core::error::DialError;

use super::netif::Netif;
use super::{BoxedConn, MetricsSnapshot, Network, Source};

/// Traffic counters shared between an interface and the connections it
/// produced.
#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Per-connection control block kept in the interface registry. Aborting
/// it makes every pending and future I/O operation on the tracked stream
/// fail with `ConnectionAborted`.
#[derive(Debug, Default)]
struct ConnHandle {
    aborted: AtomicBool,
    read_waker: Mutex<Option<Waker>>,
    write_waker: Mutex<Option<Waker>>,
}

impl ConnHandle {
    fn aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        if let Ok(mut guard) = self.read_waker.lock() {
            if let Some(waker) = guard.take() {
                waker.wake();
            }
        }
        if let Ok(mut guard) = self.write_waker.lock() {
            if let Some(waker) = guard.take() {
                waker.wake();
            }
        }
    }

    fn register(slot: &Mutex<Option<Waker>>, waker: &Waker) {
        if let Ok(mut guard) = slot.lock() {
            *guard = Some(waker.clone());
        }
    }
}

type ConnRegistry = Arc<DashMap<Uuid, Arc<ConnHandle>>>;

/// A [`Source`] bound to a local network interface.
///
/// Dials are performed with the interface's chosen local address as the
/// socket's source address, so traffic leaves through that uplink without
/// any routing-table changes. Every produced connection is tracked so the
/// interface disappearing can forcibly close the affected sessions
/// instead of leaking them.
pub struct Interface {
    name: String,
    local_addr: IpAddr,
    conns: ConnRegistry,
    counters: Arc<Counters>,
    closed: AtomicBool,
}

impl Interface {
    pub fn new(name: impl Into<String>, local_addr: IpAddr) -> Self {
        Self {
            name: name.into(),
            local_addr,
            conns: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Build an interface from an OS descriptor, choosing one usable IPv4
    /// address. Returns `None` when the interface is down, loopback, or
    /// carries no usable address.
    pub fn from_netif(netif: &Netif) -> Option<Self> {
        if !netif.up || netif.loopback {
            return None;
        }
        let addr = choose_addr(&netif.addrs)?;
        Some(Self::new(netif.name.clone(), addr))
    }

    pub fn local_addr(&self) -> IpAddr {
        self.local_addr
    }

    /// Number of currently open tracked connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wrap a connection so that its close deregisters it from the
    /// tracking set and its traffic feeds the interface counters.
    pub fn follow(&self, stream: TcpStream) -> TrackedStream {
        let id = Uuid::new_v4();
        let handle = Arc::new(ConnHandle::default());
        self.conns.insert(id, handle.clone());
        // Lost race with close(): the registry sweep may already be done,
        // so this connection would never be aborted. Abort it here.
        if self.is_closed() {
            handle.abort();
            self.conns.remove(&id);
        }
        TrackedStream {
            id,
            inner: stream,
            handle,
            registry: self.conns.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Tear the interface down: abort every tracked connection and refuse
    /// any further dialing. Returns the number of connections aborted.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut aborted = 0;
        for entry in self.conns.iter() {
            entry.value().abort();
            aborted += 1;
        }
        self.conns.clear();
        aborted
    }

    pub async fn dial_tcp(
        &self,
        network: Network,
        target: &str,
    ) -> Result<TrackedStream, DialError> {
        if self.is_closed() {
            return Err(DialError::InterfaceClosed {
                name: self.name.clone(),
            });
        }

        let addr = self.resolve(network, target).await?;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| DialError::io(target, e))?;
        socket
            .bind(SocketAddr::new(self.local_addr, 0))
            .map_err(|e| DialError::io(target, e))?;

        let stream = socket
            .connect(addr)
            .await
            .map_err(|e| DialError::io(target, e))?;

        // The interface may have been torn down while the connect was in
        // flight; hand the connection back only if we are still live.
        if self.is_closed() {
            return Err(DialError::InterfaceClosed {
                name: self.name.clone(),
            });
        }

        tracing::debug!(
            target = "source",
            interface = %self.name,
            local = %self.local_addr,
            remote = %addr,
            "dialed through interface"
        );
        Ok(self.follow(stream))
    }

    async fn resolve(&self, network: Network, target: &str) -> Result<SocketAddr, DialError> {
        let addrs = lookup_host(target)
            .await
            .map_err(|e| DialError::io(target, e))?;
        addrs
            .filter(|addr| network.accepts(addr))
            .find(|addr| addr.is_ipv4() == self.local_addr.is_ipv4())
            .ok_or_else(|| {
                DialError::io(
                    target,
                    io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!(
                            "no {} address for target reachable from {}",
                            network.as_str(),
                            self.local_addr
                        ),
                    ),
                )
            })
    }
}

impl Source for Interface {
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> Option<MetricsSnapshot> {
        Some(MetricsSnapshot {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            open_conns: self.conns.len() as u64,
        })
    }

    fn dial<'a>(
        &'a self,
        network: Network,
        target: &'a str,
    ) -> BoxFuture<'a, Result<BoxedConn, DialError>> {
        Box::pin(async move {
            let stream = self.dial_tcp(network, target).await?;
            Ok(Box::new(stream) as BoxedConn)
        })
    }
}

/// Pick one usable IPv4 address, preferring public over private ranges.
/// Loopback and link-local addresses are never usable.
fn choose_addr(addrs: &[IpAddr]) -> Option<IpAddr> {
    let usable: Vec<Ipv4Addr> = addrs
        .iter()
        .filter_map(|addr| match addr {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
        .filter(|v4| {
            !v4.is_loopback()
                && !v4.is_link_local()
                && !v4.is_unspecified()
                && !v4.is_broadcast()
                && !v4.is_multicast()
        })
        .collect();

    usable
        .iter()
        .find(|v4| !v4.is_private())
        .or_else(|| usable.first())
        .map(|v4| IpAddr::V4(*v4))
}

/// A connection produced by an [`Interface`]. Dropping it (or shutting it
/// down) deregisters it from the interface's tracking set; the interface
/// closing aborts it.
#[derive(Debug)]
pub struct TrackedStream {
    id: Uuid,
    inner: TcpStream,
    handle: Arc<ConnHandle>,
    registry: ConnRegistry,
    counters: Arc<Counters>,
}

impl TrackedStream {
    fn aborted_error() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, "interface closed")
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.handle.aborted() {
            return Poll::Ready(Err(Self::aborted_error()));
        }
        ConnHandle::register(&this.handle.read_waker, cx.waker());
        let pre = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = (buf.filled().len() - pre) as u64;
                this.counters.bytes_received.fetch_add(n, Ordering::Relaxed);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.handle.aborted() {
            return Poll::Ready(Err(Self::aborted_error()));
        }
        ConnHandle::register(&this.handle.write_waker, cx.waker());
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.handle.aborted() {
            return Poll::Ready(Err(Self::aborted_error()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_addr_skips_loopback_and_link_local() {
        let addrs = vec![
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(169, 254, 1, 2)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
        ];
        assert_eq!(
            choose_addr(&addrs),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
        );
    }

    #[test]
    fn choose_addr_prefers_public_over_private() {
        let addrs = vec![
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
        ];
        assert_eq!(
            choose_addr(&addrs),
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
        );
    }

    #[test]
    fn choose_addr_ignores_ipv6_only_interfaces() {
        let addrs = vec!["fe80::1".parse().unwrap(), "2001:db8::1".parse().unwrap()];
        assert_eq!(choose_addr(&addrs), None);
    }

    #[test]
    fn closed_interface_refuses_dialing() {
        let iface = Interface::new("test0", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        iface.close();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(iface.dial_tcp(Network::Tcp, "127.0.0.1:1"))
            .unwrap_err();
        assert!(matches!(err, DialError::InterfaceClosed { .. }));
    }
}
