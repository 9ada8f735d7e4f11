//! Proxy front-ends: the consumers of the source subsystem.
//!
//! Both servers speak their protocol with the client, hand the requested
//! target to the [`Dialer`], and splice bytes between the two ends. All
//! selection logic stays in the core.

pub mod http;
pub mod socks5;

use std::io;
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::core::source::Dialer;

/// Proxy protocol spoken to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Socks5,
    Http,
}

impl Proto {
    pub fn as_str(self) -> &'static str {
        match self {
            Proto::Socks5 => "socks5",
            Proto::Http => "http",
        }
    }
}

impl FromStr for Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "socks5" => Ok(Proto::Socks5),
            "http" => Ok(Proto::Http),
            other => Err(format!(
                "unsupported proxy protocol {other:?} (available: http, socks5)"
            )),
        }
    }
}

/// Accept clients on `port` and serve them until `token` is cancelled.
pub async fn serve(
    proto: Proto,
    port: u16,
    dialer: Arc<Dialer>,
    token: CancellationToken,
) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(
        target = "proxy",
        proto = proto.as_str(),
        port,
        "proxy listening"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(target = "proxy", error = %err, "accept failed");
                        continue;
                    }
                };
                let dialer = dialer.clone();
                tokio::spawn(async move {
                    let served = match proto {
                        Proto::Socks5 => socks5::handle(stream, dialer).await,
                        Proto::Http => http::handle(stream, dialer).await,
                    };
                    if let Err(err) = served {
                        tracing::debug!(
                            target = "proxy",
                            peer = %peer,
                            error = %err,
                            "client session ended with error"
                        );
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_parses_known_strings() {
        assert_eq!("socks5".parse::<Proto>().unwrap(), Proto::Socks5);
        assert_eq!("http".parse::<Proto>().unwrap(), Proto::Http);
        assert!("ftp".parse::<Proto>().is_err());
    }
}
