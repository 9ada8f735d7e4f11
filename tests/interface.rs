//! Connection tracking and teardown of a live interface, exercised over
//! real loopback sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use booster::core::source::interface::Interface;
use booster::core::source::{Network, Source};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

/// Echo server on an ephemeral loopback port.
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn dial_tracks_and_drop_deregisters() {
    let echo = spawn_echo().await;
    let iface = Interface::new("lo-test", LOOPBACK);
    assert_eq!(iface.len(), 0);

    let conn1 = iface.dial_tcp(Network::Tcp, &echo.to_string()).await.unwrap();
    assert_eq!(iface.len(), 1);
    let conn2 = iface.dial_tcp(Network::Tcp, &echo.to_string()).await.unwrap();
    assert_eq!(iface.len(), 2);

    drop(conn1);
    assert_eq!(iface.len(), 1);
    drop(conn2);
    assert_eq!(iface.len(), 0);
}

#[tokio::test]
async fn close_aborts_open_connections() {
    let echo = spawn_echo().await;
    let iface = Arc::new(Interface::new("lo-test", LOOPBACK));

    let mut conn1 = iface.dial_tcp(Network::Tcp, &echo.to_string()).await.unwrap();
    let mut conn2 = iface.dial_tcp(Network::Tcp, &echo.to_string()).await.unwrap();
    assert_eq!(iface.len(), 2);

    // Park a read on one connection so teardown must wake it.
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        conn1.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let aborted = iface.close();
    assert_eq!(aborted, 2);
    assert_eq!(iface.len(), 0);

    let read_result = timeout(Duration::from_secs(1), reader)
        .await
        .expect("aborted read must wake up")
        .unwrap();
    assert!(read_result.is_err(), "pending read must fail after close");

    // The other connection fails on its next use.
    assert!(conn2.write_all(b"ping").await.is_err());
}

#[tokio::test]
async fn closed_interface_refuses_new_dials() {
    let echo = spawn_echo().await;
    let iface = Interface::new("lo-test", LOOPBACK);
    iface.close();

    let err = iface
        .dial_tcp(Network::Tcp, &echo.to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        booster::DialError::InterfaceClosed { .. }
    ));
}

#[tokio::test]
async fn traffic_feeds_the_metrics_counters() {
    let echo = spawn_echo().await;
    let iface = Interface::new("lo-test", LOOPBACK);

    let mut conn = iface.dial_tcp(Network::Tcp, &echo.to_string()).await.unwrap();
    conn.write_all(b"12345678").await.unwrap();
    let mut buf = [0u8; 8];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"12345678");

    let metrics = iface.metrics().unwrap();
    assert_eq!(metrics.bytes_sent, 8);
    assert_eq!(metrics.bytes_received, 8);
    assert_eq!(metrics.open_conns, 1);

    drop(conn);
    assert_eq!(iface.metrics().unwrap().open_conns, 0);
}

#[tokio::test]
async fn dial_failure_preserves_the_os_error() {
    // Bind-then-drop to get a port with nothing listening.
    let port = {
        let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let iface = Interface::new("lo-test", LOOPBACK);

    let err = iface
        .dial_tcp(Network::Tcp, &format!("127.0.0.1:{port}"))
        .await
        .unwrap_err();
    match err {
        booster::DialError::Io { source, .. } => {
            assert_eq!(source.kind(), std::io::ErrorKind::ConnectionRefused);
        }
        other => panic!("expected Io error, got {other:?}"),
    }
    assert_eq!(iface.len(), 0);
}

#[tokio::test]
async fn tcp6_dial_through_v4_interface_is_rejected() {
    let echo = spawn_echo().await;
    let iface = Interface::new("lo-test", LOOPBACK);

    let err = iface
        .dial_tcp(Network::Tcp6, &echo.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, booster::DialError::Io { .. }));
}
