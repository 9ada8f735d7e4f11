use thiserror::Error;

/// Errors produced by the source subsystem when asked to provide an
/// outbound connection.
#[derive(Debug, Error)]
pub enum DialError {
    /// The balancer has no source that passes the admission policies for
    /// the requested target. Proxy front-ends map this to "network
    /// unreachable" (SOCKS5) or 502 (HTTP).
    #[error("no sources available")]
    NoSources,

    /// The underlying OS dial failed. The original error chain is kept.
    #[error("dial {target} failed")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A dial was attempted on an interface that has already been torn
    /// down. The caller may retry through the balancer; the core does not.
    #[error("interface {name} is closed")]
    InterfaceClosed { name: String },

    /// The requested network is not one of tcp/tcp4/tcp6.
    #[error("unsupported network {0:?}")]
    UnsupportedNetwork(String),
}

impl DialError {
    pub fn io(target: impl Into<String>, source: std::io::Error) -> Self {
        DialError::Io {
            target: target.into(),
            source,
        }
    }

    /// Category label used in logs and dial-failure events.
    pub fn category(&self) -> &'static str {
        match self {
            DialError::NoSources => "no_sources",
            DialError::Io { .. } => "dial_failed",
            DialError::InterfaceClosed { .. } => "interface_closed",
            DialError::UnsupportedNetwork(_) => "unsupported_network",
        }
    }
}
