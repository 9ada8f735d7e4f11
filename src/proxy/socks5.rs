//! SOCKS5 server front-end (RFC 1928).
//!
//! Supports the No Auth method and the CONNECT command with IPv4, IPv6
//! and domain address types. BIND and UDP ASSOCIATE are not proxied
//! through egress interfaces and are rejected.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::error::DialError;
use crate::core::source::{Dialer, Network};

pub const SOCKS5_VERSION: u8 = 0x05;

pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

/// Serve one client connection.
pub async fn handle(mut stream: TcpStream, dialer: Arc<Dialer>) -> io::Result<()> {
    negotiate(&mut stream).await?;

    let target = match read_request(&mut stream).await {
        Ok(target) => target,
        Err(rep) => {
            reply(&mut stream, rep).await?;
            return Ok(());
        }
    };

    let mut upstream = match dialer.dial(Network::Tcp, &target).await {
        Ok(conn) => conn,
        Err(err) => {
            reply(&mut stream, reply_code(&err)).await?;
            return Ok(());
        }
    };

    reply(&mut stream, REP_SUCCESS).await?;

    // From here the session is a plain byte splice; either side closing
    // (including the interface force-closing the upstream) ends it.
    let _ = copy_bidirectional(&mut stream, &mut upstream).await;
    Ok(())
}

/// Version/method negotiation: read the client's methods and pick No Auth.
async fn negotiate(stream: &mut TcpStream) -> io::Result<()> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let version = header[0];
    let nmethods = header[1] as usize;

    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    if version != SOCKS5_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid SOCKS version 0x{version:02x}"),
        ));
    }
    if !methods.contains(&AUTH_NO_AUTH) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_NO_ACCEPTABLE])
            .await?;
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client offers no acceptable authentication method",
        ));
    }

    stream.write_all(&[SOCKS5_VERSION, AUTH_NO_AUTH]).await
}

/// Read the connect request; on protocol errors the reply code to send
/// back is returned instead.
async fn read_request(stream: &mut TcpStream) -> Result<String, u8> {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|_| REP_GENERAL_FAILURE)?;
    let [version, cmd, _rsv, atyp] = header;

    if version != SOCKS5_VERSION {
        return Err(REP_GENERAL_FAILURE);
    }
    if cmd != CMD_CONNECT {
        return Err(REP_COMMAND_NOT_SUPPORTED);
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream
                .read_exact(&mut octets)
                .await
                .map_err(|_| REP_GENERAL_FAILURE)?;
            IpAddr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream
                .read_exact(&mut octets)
                .await
                .map_err(|_| REP_GENERAL_FAILURE)?;
            format!("[{}]", IpAddr::from(octets))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await.map_err(|_| REP_GENERAL_FAILURE)? as usize;
            let mut name = vec![0u8; len];
            stream
                .read_exact(&mut name)
                .await
                .map_err(|_| REP_GENERAL_FAILURE)?;
            String::from_utf8(name).map_err(|_| REP_GENERAL_FAILURE)?
        }
        _ => return Err(REP_ATYP_NOT_SUPPORTED),
    };

    let port = stream.read_u16().await.map_err(|_| REP_GENERAL_FAILURE)?;
    Ok(format!("{host}:{port}"))
}

/// Send a reply with an all-zero bind address.
async fn reply(stream: &mut TcpStream, rep: u8) -> io::Result<()> {
    let msg = [
        SOCKS5_VERSION,
        rep,
        0x00,      // RSV
        ATYP_IPV4, // BND.ADDR
        0,
        0,
        0,
        0,
        0, // BND.PORT
        0,
    ];
    stream.write_all(&msg).await
}

fn reply_code(err: &DialError) -> u8 {
    match err {
        DialError::NoSources => REP_NETWORK_UNREACHABLE,
        DialError::Io { source, .. } if source.kind() == io::ErrorKind::ConnectionRefused => {
            REP_CONNECTION_REFUSED
        }
        DialError::Io { .. } => REP_HOST_UNREACHABLE,
        DialError::InterfaceClosed { .. } => REP_HOST_UNREACHABLE,
        DialError::UnsupportedNetwork(_) => REP_GENERAL_FAILURE,
    }
}
