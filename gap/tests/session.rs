//! End-to-end session supervisor scenarios driven over real sockets
//! (spec.md §8 S5, S6): a fake upstream server plays the IMAP server role
//! so `run_session` exercises its real connect/handshake/proxy/teardown
//! path, while the client leg is a `tokio::io::duplex` half driven
//! directly from the test.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use gap::config::{Limits, ListenerConfig, UpstreamConfig};
use gap::io::BoxedStream;
use gap::policy::allow_all;

async fn spawn_fake_upstream() -> (std::net::SocketAddr, TcpListener) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, listener)
}

fn test_listener_config(addr: std::net::SocketAddr) -> ListenerConfig {
    let upstream = UpstreamConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: "svc".to_string(),
        password: "svc-pass".to_string(),
        use_tls: false,
    };
    let mut cfg = ListenerConfig::new("test".to_string(), upstream);
    cfg.limits = Limits {
        max_line_bytes: 65536,
        max_literal_bytes: 1024 * 1024,
        command_timeout_s: 1,
        idle_timeout_s: 3600,
    };
    cfg
}

async fn read_until_greeting(client: &mut tokio::io::DuplexStream) -> String {
    let mut buf = vec![0u8; 4096];
    let n = client.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).to_string()
}

/// S5: the upstream closes its socket while a command is in flight. The
/// session must synthesize a `NO` completion for the stuck tag, send
/// `* BYE`, then close rather than hang.
#[tokio::test]
async fn s5_upstream_disconnect_mid_flight_synthesizes_no_and_bye() {
    let (addr, listener) = spawn_fake_upstream().await;
    let cfg = std::sync::Arc::new(test_listener_config(addr));
    let policy = std::sync::Arc::new(allow_all());
    let logger = gap::log::process_logger();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"* PREAUTH ready\r\n").await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = sock.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"G0000 CAPABILITY"));
        sock.write_all(b"* CAPABILITY IMAP4rev1 IDLE\r\n")
            .await
            .unwrap();
        sock.write_all(b"G0000 OK CAPABILITY completed\r\n")
            .await
            .unwrap();

        // Wait for the client's FETCH to arrive upstream, then vanish
        // without responding.
        let n = sock.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"P0001 FETCH"));
        drop(sock);
    });

    let (client_side, mut test_driver): (tokio::io::DuplexStream, tokio::io::DuplexStream) =
        tokio::io::duplex(8192);
    let client_io: BoxedStream = Box::new(client_side);
    let peer: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();

    tokio::spawn(gap::session::run_session(client_io, peer, cfg, policy, logger));

    let greeting = read_until_greeting(&mut test_driver).await;
    assert!(greeting.starts_with("* OK"));

    test_driver
        .write_all(b"A001 FETCH 1:* (FLAGS)\r\n")
        .await
        .unwrap();

    // The session must report the disconnect back to the client rather
    // than hanging: a NO completion for A001 followed by BYE.
    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !seen.contains("* BYE") {
        let mut buf = vec![0u8; 4096];
        let fut = test_driver.read(&mut buf);
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => seen.push_str(&String::from_utf8_lossy(&buf[..n])),
            Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Ok(Err(e)) => panic!("unexpected read error: {e}"),
            Err(_) => panic!("timed out waiting for teardown, saw: {seen:?}"),
        }
    }

    assert!(seen.contains("A001 NO"), "expected a NO completion, saw: {seen:?}");
    assert!(seen.contains("* BYE"), "expected a BYE, saw: {seen:?}");
}

/// S6: the upstream accepts a command but never answers it. The periodic
/// sweep must expire the command after `command_timeout_s` and reply
/// `BAD ... timeout` without tearing down the rest of the session.
#[tokio::test]
async fn s6_command_timeout_is_synthesized_by_the_sweep() {
    let (addr, listener) = spawn_fake_upstream().await;
    let cfg = std::sync::Arc::new(test_listener_config(addr));
    let policy = std::sync::Arc::new(allow_all());
    let logger = gap::log::process_logger();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"* PREAUTH ready\r\n").await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = sock.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"G0000 CAPABILITY"));
        sock.write_all(b"* CAPABILITY IMAP4rev1 IDLE\r\n")
            .await
            .unwrap();
        sock.write_all(b"G0000 OK CAPABILITY completed\r\n")
            .await
            .unwrap();

        // Accept the client's command and simply never answer it, while
        // keeping the connection open.
        let n = sock.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"P0001 NOOP"));
        tokio::time::sleep(Duration::from_secs(20)).await;
    });

    let (client_side, mut test_driver): (tokio::io::DuplexStream, tokio::io::DuplexStream) =
        tokio::io::duplex(8192);
    let client_io: BoxedStream = Box::new(client_side);
    let peer: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();

    tokio::spawn(gap::session::run_session(client_io, peer, cfg, policy, logger));

    let greeting = read_until_greeting(&mut test_driver).await;
    assert!(greeting.starts_with("* OK"));

    test_driver.write_all(b"A001 NOOP\r\n").await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(10), test_driver.read(&mut buf))
        .await
        .expect("timed out waiting for the timeout reply")
        .unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]).to_string();
    assert_eq!(reply, "A001 BAD Command timeout\r\n");
}
