//! HTTP proxy front-end.
//!
//! Handles CONNECT tunnels (RFC 9110 §9.3.6) and absolute-form plain
//! requests. TLS interception is out of the question: CONNECT bytes are
//! spliced opaquely.

use std::io;
use std::sync::Arc;

use tokio::io::{copy_bidirectional, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::core::error::DialError;
use crate::core::source::{Dialer, Network};

const MAX_HEADER_LINES: usize = 100;

/// Serve one client connection.
///
/// The client stream stays wrapped in its BufReader for the whole
/// session so bytes the client pipelined behind the request head are not
/// lost when splicing starts.
pub async fn handle(stream: TcpStream, dialer: Arc<Dialer>) -> io::Result<()> {
    let mut client = BufReader::new(stream);

    let mut request_line = String::new();
    client.read_line(&mut request_line).await?;
    let request_line = request_line.trim_end();
    if request_line.is_empty() {
        return Ok(());
    }

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri), Some(_version)) = (parts.next(), parts.next(), parts.next())
    else {
        return respond(&mut client, "400 Bad Request").await;
    };
    let method = method.to_string();
    let uri = uri.to_string();

    // Drain the header section; CONNECT discards it, absolute-form
    // requests forward everything except the hop-by-hop headers.
    let mut headers = Vec::new();
    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        client.read_line(&mut line).await?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
        headers.push(line);
    }

    if method.eq_ignore_ascii_case("CONNECT") {
        tunnel(client, &uri, dialer).await
    } else {
        forward(client, &method, &uri, headers, dialer).await
    }
}

/// CONNECT: dial the authority and splice bytes.
async fn tunnel(
    mut client: BufReader<TcpStream>,
    authority: &str,
    dialer: Arc<Dialer>,
) -> io::Result<()> {
    let mut upstream = match dialer.dial(Network::Tcp, authority).await {
        Ok(conn) => conn,
        Err(err) => return respond(&mut client, status_for(&err)).await,
    };

    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    let _ = copy_bidirectional(&mut client, &mut upstream).await;
    Ok(())
}

/// Absolute-form request: dial the target, replay the request in
/// origin-form, then splice the rest of the session.
async fn forward(
    mut client: BufReader<TcpStream>,
    method: &str,
    uri: &str,
    headers: Vec<String>,
    dialer: Arc<Dialer>,
) -> io::Result<()> {
    let Some((target, path)) = split_absolute_uri(uri) else {
        return respond(&mut client, "400 Bad Request").await;
    };

    let mut upstream = match dialer.dial(Network::Tcp, &target).await {
        Ok(conn) => conn,
        Err(err) => return respond(&mut client, status_for(&err)).await,
    };

    let mut head = format!("{method} {path} HTTP/1.1\r\n");
    for line in &headers {
        // Proxy-Connection is a hop-by-hop header for the proxy leg only.
        if line
            .split(':')
            .next()
            .is_some_and(|n| n.eq_ignore_ascii_case("proxy-connection"))
        {
            continue;
        }
        head.push_str(line);
    }
    head.push_str("\r\n");
    upstream.write_all(head.as_bytes()).await?;

    let _ = copy_bidirectional(&mut client, &mut upstream).await;
    Ok(())
}

/// `http://host[:port]/path` → (`host:port`, `/path`).
fn split_absolute_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("http://")?;
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return None;
    }
    let target = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Some((target, path.to_string()))
}

fn status_for(err: &DialError) -> &'static str {
    match err {
        DialError::NoSources => "502 Bad Gateway",
        DialError::Io { .. } | DialError::InterfaceClosed { .. } => "502 Bad Gateway",
        DialError::UnsupportedNetwork(_) => "400 Bad Request",
    }
}

async fn respond<S: AsyncWrite + Unpin>(stream: &mut S, status: &str) -> io::Result<()> {
    let msg = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(msg.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_uri_splits_into_target_and_path() {
        assert_eq!(
            split_absolute_uri("http://example.com/index.html"),
            Some(("example.com:80".to_string(), "/index.html".to_string()))
        );
        assert_eq!(
            split_absolute_uri("http://example.com:8080"),
            Some(("example.com:8080".to_string(), "/".to_string()))
        );
        assert_eq!(split_absolute_uri("example.com:443"), None);
        assert_eq!(split_absolute_uri("http://"), None);
    }

    #[test]
    fn dial_errors_map_to_gateway_statuses() {
        assert_eq!(status_for(&DialError::NoSources), "502 Bad Gateway");
        assert_eq!(
            status_for(&DialError::io(
                "t:80",
                io::Error::new(io::ErrorKind::TimedOut, "timeout")
            )),
            "502 Bad Gateway"
        );
        assert_eq!(
            status_for(&DialError::UnsupportedNetwork("udp".to_string())),
            "400 Bad Request"
        );
    }
}
