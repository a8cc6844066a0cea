//! Integration tests for WSS Tunnel
//!
//! Drives complete sessions over loopback sockets:
//! - CONNECT front end, fingerprinted TLS dial, websocket upgrade
//! - Relay server authentication and destination dialing
//! - Byte relay in both directions and session teardown

use futures_util::StreamExt;
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use wss_tunnel::config::{ProxyConfig, RelayConfig, TunnelSettings};
use wss_tunnel::protocol::{CONNECT_ESTABLISHED, SERVICE_UNAVAILABLE};
use wss_tunnel::proxy::{ClientStream, HttpProxyServer};
use wss_tunnel::server::tls_acceptor;
use wss_tunnel::tunnel::TunnelError;
use wss_tunnel::{Error, RelayServer, TunnelClient};

const BOUND: Duration = Duration::from_secs(10);

/// Self-signed `localhost` certificate: server acceptor and matching roots
fn localhost_tls() -> (TlsAcceptor, Arc<RootCertStore>) {
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let mut roots = RootCertStore::empty();
    roots.add(cert.der().clone()).unwrap();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let acceptor = tls_acceptor(vec![cert.der().clone()], key).unwrap();

    (acceptor, Arc::new(roots))
}

/// Start a TLS relay; returns its address and the roots that trust it
async fn start_relay(secret: &str) -> (SocketAddr, Arc<RootCertStore>) {
    let (acceptor, roots) = localhost_tls();
    let settings = RelayConfig {
        listen: "127.0.0.1:0".into(),
        password: secret.into(),
        ..RelayConfig::default()
    }
    .validate()
    .unwrap();

    let listener = TcpListener::bind(settings.listen).await.unwrap();
    let server = RelayServer::from_listener(listener, Some(acceptor), &settings);
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });

    (addr, roots)
}

/// Echo server standing in for the destination
async fn start_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.split();
                tokio::io::copy(&mut rd, &mut wr).await.ok();
                wr.shutdown().await.ok();
            });
        }
    });
    addr
}

fn settings(relay_port: u16, secret: &str, chunk_kb: u32) -> TunnelSettings {
    ProxyConfig {
        relay: format!("localhost:{}/tunnel", relay_port),
        password: secret.into(),
        chunk_kb,
        ..ProxyConfig::default()
    }
    .validate()
    .unwrap()
}

/// Start the CONNECT front end in front of `client`
async fn start_proxy(client: TunnelClient) -> SocketAddr {
    let server = HttpProxyServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let client = Arc::new(client);

    tokio::spawn(async move {
        server
            .run(move |stream: ClientStream, target: String| {
                let client = Arc::clone(&client);
                async move { client.serve(stream, &target).await }
            })
            .await
    });

    addr
}

/// Open a CONNECT tunnel through the proxy and consume the success line
async fn connect(proxy: SocketAddr, target: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n\r\n", target, target).as_bytes())
        .await
        .unwrap();

    let mut line = vec![0u8; CONNECT_ESTABLISHED.len()];
    stream.read_exact(&mut line).await.unwrap();
    assert_eq!(line, CONNECT_ESTABLISHED);
    stream
}

async fn echo_check(stream: &mut TcpStream, data: &[u8]) {
    stream.write_all(data).await.unwrap();
    let mut buf = vec![0u8; data.len()];
    timeout(BOUND, stream.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf, data);
}

#[tokio::test]
async fn test_round_trip_through_proxy() {
    let (relay, roots) = start_relay("s3cret").await;
    let echo = start_echo().await;
    let proxy = start_proxy(TunnelClient::with_roots(&settings(relay.port(), "s3cret", 1), roots)).await;

    let mut stream = connect(proxy, &echo.to_string()).await;

    echo_check(&mut stream, b"hello through the tunnel").await;

    // Larger than one chunk in both directions
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    echo_check(&mut stream, &payload).await;
}

#[tokio::test]
async fn test_success_line_precedes_dial() {
    // The relay accepts nothing until the client has its success line, so
    // no TLS handshake can complete before that
    let relay = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_port = relay.local_addr().unwrap().port();

    let proxy = start_proxy(TunnelClient::new(&settings(relay_port, "s3cret", 64))).await;

    let mut stream = timeout(BOUND, connect(proxy, "example.com:443")).await.unwrap();

    // The dial still follows
    let (dialed, _) = timeout(BOUND, relay.accept()).await.unwrap().unwrap();
    drop(dialed);

    // The failed handshake closes the client without another byte
    let mut rest = Vec::new();
    timeout(BOUND, stream.read_to_end(&mut rest)).await.unwrap().ok();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_unreachable_relay_closes_client() {
    // Nothing listens on the relay port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = listener.local_addr().unwrap().port();
    drop(listener);

    let proxy = start_proxy(TunnelClient::new(&settings(dead_port, "s3cret", 64))).await;

    let mut stream = connect(proxy, "example.com:443").await;

    let mut rest = Vec::new();
    timeout(BOUND, stream.read_to_end(&mut rest)).await.unwrap().unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_non_connect_never_dials() {
    let relay = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_port = relay.local_addr().unwrap().port();
    let dials = Arc::new(AtomicUsize::new(0));
    {
        let dials = Arc::clone(&dials);
        tokio::spawn(async move {
            while relay.accept().await.is_ok() {
                dials.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let proxy = start_proxy(TunnelClient::new(&settings(relay_port, "s3cret", 64))).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
        .await
        .unwrap();

    let mut reply = Vec::new();
    timeout(BOUND, stream.read_to_end(&mut reply)).await.unwrap().unwrap();
    assert_eq!(reply, SERVICE_UNAVAILABLE);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dials.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_secret_closes_client() {
    let (relay, roots) = start_relay("right").await;
    let echo = start_echo().await;
    let proxy = start_proxy(TunnelClient::with_roots(&settings(relay.port(), "wrong", 64), roots)).await;

    let mut stream = connect(proxy, &echo.to_string()).await;
    stream.write_all(b"never relayed").await.ok();

    let mut rest = Vec::new();
    timeout(BOUND, stream.read_to_end(&mut rest)).await.unwrap().ok();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_wrong_secret_session_error() {
    let (relay, roots) = start_relay("right").await;
    let client = TunnelClient::with_roots(&settings(relay.port(), "wrong", 64), roots);

    let (mut app, stream) = tokio::io::duplex(1024);
    let err = timeout(BOUND, client.serve(stream, "example.com:443"))
        .await
        .unwrap()
        .unwrap_err();

    match err {
        Error::Tunnel(TunnelError::Rejected { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "Unauthorized");
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    // The session owned the client stream and has released it
    let mut rest = Vec::new();
    assert_eq!(app.read_to_end(&mut rest).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_target_rejected_by_relay() {
    let (relay, roots) = start_relay("s3cret").await;
    let client = TunnelClient::with_roots(&settings(relay.port(), "s3cret", 64), roots);

    let (_app, stream) = tokio::io::duplex(1024);
    let err = timeout(BOUND, client.serve(stream, "example.com:0"))
        .await
        .unwrap()
        .unwrap_err();

    assert!(
        matches!(err, Error::Tunnel(TunnelError::Rejected { status: 400, .. })),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_message_boundaries_at_relay() {
    // Bare relay that records the message sizes it receives
    let (acceptor, roots) = localhost_tls();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_port = listener.local_addr().unwrap().port();
    let relay = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let tls = acceptor.accept(socket).await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tls).await.unwrap();

        let mut sizes = Vec::new();
        let mut data = Vec::new();
        while data.len() < 2500 {
            match ws.next().await {
                Some(Ok(Message::Binary(chunk))) => {
                    sizes.push(chunk.len());
                    data.extend_from_slice(&chunk);
                }
                Some(Ok(_)) => continue,
                other => panic!("relay stream ended early: {:?}", other),
            }
        }
        (sizes, data)
    });

    let client = TunnelClient::with_roots(&settings(relay_port, "s3cret", 1), roots);
    let (mut app, stream) = tokio::io::duplex(8 * 1024);
    let payload: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
    app.write_all(&payload).await.unwrap();

    let session = tokio::spawn(async move { client.serve(stream, "example.com:443").await });

    let (sizes, data) = timeout(BOUND, relay).await.unwrap().unwrap();
    assert_eq!(sizes, vec![1024, 1024, 452]);
    assert_eq!(data, payload);

    drop(app);
    let _ = timeout(BOUND, session).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_sessions_independent() {
    let (relay, roots) = start_relay("s3cret").await;
    let echo = start_echo().await;
    let proxy = start_proxy(TunnelClient::with_roots(&settings(relay.port(), "s3cret", 4), roots)).await;

    let mut a = connect(proxy, &echo.to_string()).await;
    let mut b = connect(proxy, &echo.to_string()).await;

    echo_check(&mut a, b"session a").await;
    echo_check(&mut b, b"session b").await;

    drop(a);
    tokio::time::sleep(Duration::from_millis(100)).await;

    echo_check(&mut b, b"still alive").await;
}

#[tokio::test]
async fn test_relay_close_frame_ends_session() {
    // Relay that sends a close frame and then holds the socket open
    let (acceptor, roots) = localhost_tls();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_port = listener.local_addr().unwrap().port();
    let (release, held) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let tls = acceptor.accept(socket).await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tls).await.unwrap();
        ws.close(None).await.ok();
        let _ = held.await;
        drop(ws);
    });

    let client = TunnelClient::with_roots(&settings(relay_port, "s3cret", 64), roots);
    let proxy = start_proxy(client).await;

    let mut stream = connect(proxy, "example.com:443").await;
    let mut rest = Vec::new();
    timeout(BOUND, stream.read_to_end(&mut rest)).await.unwrap().ok();
    assert!(rest.is_empty());

    drop(release);
}

#[tokio::test]
async fn test_closing_client_ends_session() {
    let (relay, roots) = start_relay("s3cret").await;
    let echo = start_echo().await;
    let client = TunnelClient::with_roots(&settings(relay.port(), "s3cret", 64), roots);

    let (mut app, stream) = tokio::io::duplex(1024);
    let target = echo.to_string();
    let session = tokio::spawn(async move { client.serve(stream, &target).await });

    app.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    timeout(BOUND, app.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"ping");

    drop(app);
    // Bounded teardown is what matters; the relay may race us with an error
    timeout(BOUND, session).await.unwrap().unwrap().ok();
}
