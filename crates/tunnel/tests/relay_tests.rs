//! Tunnel Relay Integration Tests
//!
//! Exercises the relay loop, the per-connection handshake and the listener
//! with in-memory upstreams:
//! - Pass-through of bytes after the 20-byte header
//! - Close propagation in both directions
//! - Shutdown closing both sockets
//! - Failures staying local to one connection
//!
//! Run with: `cargo test -p tunnel --test relay_tests`

use protocol::{HEADER_LEN, TunnelHeader};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tunnel::{ClosedBy, TunnelError, UpstreamConnector, handle_connection, relay};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

type Targets = Arc<Mutex<Vec<(String, u16)>>>;

/// Upstream handing the server end of each connection to the test
struct MockUpstream {
    targets: Targets,
    servers: mpsc::UnboundedSender<DuplexStream>,
    refuse: bool,
}

impl MockUpstream {
    fn new() -> (Self, Targets, mpsc::UnboundedReceiver<DuplexStream>) {
        let targets = Targets::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let upstream = Self {
            targets: Arc::clone(&targets),
            servers: tx,
            refuse: false,
        };
        (upstream, targets, rx)
    }

    fn refusing() -> (Self, Targets) {
        let (mut upstream, targets, _rx) = Self::new();
        upstream.refuse = true;
        (upstream, targets)
    }
}

impl UpstreamConnector for MockUpstream {
    type Stream = DuplexStream;

    async fn connect(&self, host: &str, port: u16) -> tunnel::Result<DuplexStream> {
        self.targets.lock().unwrap().push((host.to_string(), port));
        if self.refuse {
            return Err(TunnelError::Connect {
                addr: format!("{}:{}", host, port),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }

        let (proxy_side, server_side) = duplex(64 * 1024);
        let _ = self.servers.send(server_side);
        Ok(proxy_side)
    }
}

fn header(host: &str) -> [u8; HEADER_LEN] {
    TunnelHeader::new(host).unwrap().encode()
}

async fn read_until_closed<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    timeout(TEST_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("stream was not closed")
        .unwrap();
    received
}

mod relay_loop {
    use super::*;

    #[tokio::test]
    async fn test_bytes_pass_through_unmodified() {
        let (mut client, proxy_in) = duplex(1024);
        let (proxy_out, mut server) = duplex(1024);
        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(relay(proxy_in, proxy_out, rx));

        client.write_all(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING");

        server.write_all(b"PONG").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG");

        // Closing the upstream closes the client
        drop(server);
        assert!(read_until_closed(&mut client).await.is_empty());

        let stats = handle.await.unwrap();
        assert_eq!(stats.to_upstream, 4);
        assert_eq!(stats.to_client, 4);
        assert_eq!(stats.closed_by, ClosedBy::Upstream);
    }

    #[tokio::test]
    async fn test_client_close_propagates() {
        let (mut client, proxy_in) = duplex(1024);
        let (proxy_out, mut server) = duplex(1024);
        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(relay(proxy_in, proxy_out, rx));

        client.write_all(b"bye").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(read_until_closed(&mut server).await, b"bye");
        assert_eq!(handle.await.unwrap().closed_by, ClosedBy::Client);
    }

    #[tokio::test]
    async fn test_shutdown_closes_both_sides() {
        let (mut client, proxy_in) = duplex(1024);
        let (proxy_out, mut server) = duplex(1024);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(relay(proxy_in, proxy_out, rx));

        tx.send(true).unwrap();

        assert!(read_until_closed(&mut client).await.is_empty());
        assert!(read_until_closed(&mut server).await.is_empty());
        assert_eq!(handle.await.unwrap().closed_by, ClosedBy::Shutdown);
    }

    #[tokio::test]
    async fn test_transfer_larger_than_buffer() {
        let (mut client, proxy_in) = duplex(4096);
        let (proxy_out, mut server) = duplex(4096);
        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(relay(proxy_in, proxy_out, rx));

        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client.shutdown().await.unwrap();
            client
        });

        assert_eq!(read_until_closed(&mut server).await, expected);
        writer.await.unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(stats.to_upstream, 100_000);
        assert_eq!(stats.closed_by, ClosedBy::Client);
    }
}

mod handshake {
    use super::*;

    #[tokio::test]
    async fn test_header_names_target() {
        let (upstream, targets, mut servers) = MockUpstream::new();
        let (mut client, proxy_in) = duplex(1024);
        let (_tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            handle_connection(proxy_in, &upstream, 3240, rx).await
        });

        client.write_all(&header("10.0.0.5")).await.unwrap();
        client.write_all(b"PING").await.unwrap();

        let mut server = timeout(TEST_TIMEOUT, servers.recv()).await.unwrap().unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING");
        assert_eq!(*targets.lock().unwrap(), vec![("10.0.0.5".to_string(), 3240)]);

        drop(server);
        assert!(read_until_closed(&mut client).await.is_empty());
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.closed_by, ClosedBy::Upstream);
    }

    #[tokio::test]
    async fn test_blank_header_rejected() {
        let (upstream, targets, _servers) = MockUpstream::new();
        let (mut client, proxy_in) = duplex(1024);
        let (_tx, rx) = watch::channel(false);

        client.write_all(&[b' '; HEADER_LEN]).await.unwrap();
        let result = handle_connection(proxy_in, &upstream, 3240, rx).await;

        assert!(matches!(result, Err(TunnelError::InvalidHeader(_))));
        assert!(targets.lock().unwrap().is_empty());
        assert!(read_until_closed(&mut client).await.is_empty());
    }

    #[tokio::test]
    async fn test_short_header() {
        let (upstream, targets, _servers) = MockUpstream::new();
        let (mut client, proxy_in) = duplex(1024);
        let (_tx, rx) = watch::channel(false);

        client.write_all(b"10.0.").await.unwrap();
        drop(client);
        let result = handle_connection(proxy_in, &upstream, 3240, rx).await;

        assert!(matches!(result, Err(TunnelError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(targets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refused_connection_closes_client() {
        let (upstream, targets) = MockUpstream::refusing();
        let (mut client, proxy_in) = duplex(1024);
        let (_tx, rx) = watch::channel(false);

        client.write_all(&header("usbip.lan")).await.unwrap();
        let result = handle_connection(proxy_in, &upstream, 3240, rx).await;

        assert!(matches!(result, Err(TunnelError::Connect { .. })));
        assert_eq!(targets.lock().unwrap().len(), 1);
        assert!(read_until_closed(&mut client).await.is_empty());
    }
}

mod listener {
    use super::*;
    use tokio::net::TcpStream;
    use tunnel::TunnelServer;

    #[tokio::test]
    async fn test_connections_are_independent() {
        let (upstream, targets, mut servers) = MockUpstream::new();
        let server = TunnelServer::bind("127.0.0.1:0".parse().unwrap(), upstream, 3240)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(server.run(rx));

        // A broken client does not disturb others
        let mut broken = TcpStream::connect(addr).await.unwrap();
        broken.write_all(&[0u8; HEADER_LEN]).await.unwrap();
        assert!(read_until_closed(&mut broken).await.is_empty());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&header("usbip.lan")).await.unwrap();
        client.write_all(b"PING").await.unwrap();

        let mut upstream_end = timeout(TEST_TIMEOUT, servers.recv()).await.unwrap().unwrap();
        let mut buf = [0u8; 4];
        upstream_end.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PING");

        upstream_end.write_all(b"PONG").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG");

        assert_eq!(*targets.lock().unwrap(), vec![("usbip.lan".to_string(), 3240)]);

        // Shutdown stops the listener and closes the open connection
        tx.send(true).unwrap();
        timeout(TEST_TIMEOUT, running).await.unwrap().unwrap().unwrap();

        let mut rest = Vec::new();
        let closed = timeout(TEST_TIMEOUT, client.read_to_end(&mut rest)).await.unwrap();
        assert!(closed.is_err() || rest.is_empty());
    }
}
