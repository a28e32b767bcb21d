//! End-to-end scenarios driven through the public `Client`/`Session` surface.
//!
//! Each test scripts the exact byte sequence a real server would send, the way
//! `core/tests/http_integration.rs` drives a real connection in the teacher crate;
//! here the "real connection" is a loopback `TcpListener` fixture instead of a live
//! remote server, since the scenarios are deterministic protocol dialogs.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use smtp_session::{Client, DebugMode, Request, SessionConfig, SessionData, TlsContext};

#[tokio::test]
async fn plain_connect_then_noop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"220 smtp.test ESMTP ready\r\n").await.unwrap();
        let mut reader = BufReader::new(&mut sock);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "NOOP\r\n");
        sock.write_all(b"250 OK\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let client = Client::new(1).unwrap();
    let data = SessionData::new(addr.ip().to_string(), addr.port(), false);
    let (session, greeting) = client
        .create_session(data, SessionConfig::default(), DebugMode::DebugOff)
        .wait()
        .await
        .unwrap();
    assert_eq!(greeting.code, 220);

    let result = session.execute(Request::Noop).wait().await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].code, 250);
    assert!(result[0].is_last_line());
}

#[tokio::test]
async fn ehlo_multiline_reply_is_collected_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"220 smtp.test ESMTP ready\r\n").await.unwrap();
        let mut reader = BufReader::new(&mut sock);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("EHLO"));
        sock.write_all(b"250-smtp.test Hello\r\n250-SIZE 10485760\r\n250 STARTTLS\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let client = Client::new(1).unwrap();
    let data = SessionData::new(addr.ip().to_string(), addr.port(), false);
    let (session, _greeting) = client
        .create_session(data, SessionConfig::default(), DebugMode::DebugOff)
        .wait()
        .await
        .unwrap();

    let result = session
        .execute(Request::Ehlo("client.example".to_string()))
        .wait()
        .await
        .unwrap();
    assert_eq!(result.len(), 3);
    assert!(!result[0].is_last_line());
    assert!(!result[1].is_last_line());
    assert!(result[2].is_last_line());
    assert_eq!(result[2].tail, "STARTTLS");
}

#[tokio::test]
async fn auth_login_success_resolves_three_responses_in_order() {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"220 smtp.test ESMTP ready\r\n").await.unwrap();
        let mut reader = BufReader::new(&mut sock);

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "AUTH LOGIN\r\n");
        sock.write_all(b"334 VXNlcm5hbWU6\r\n").await.unwrap();

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), BASE64.encode("u"));
        sock.write_all(b"334 UGFzc3dvcmQ6\r\n").await.unwrap();

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim_end(), BASE64.encode("p"));
        sock.write_all(b"235 OK\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    });

    let client = Client::new(1).unwrap();
    let data = SessionData::new(addr.ip().to_string(), addr.port(), false);
    let (session, _greeting) = client
        .create_session(data, SessionConfig::default(), DebugMode::DebugOff)
        .wait()
        .await
        .unwrap();

    let request = Request::auth_login("u", "p");
    assert!(request.is_sensitive());
    let result = session.execute(request).wait().await.unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result[0].code, 334);
    assert_eq!(result[1].code, 334);
    assert_eq!(result[2].code, 235);
}

#[tokio::test]
async fn read_idle_during_live_command_resolves_channel_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(b"220 smtp.test ESMTP ready\r\n").await.unwrap();
        // Never answer QUIT; hold the socket open past the read timeout.
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let client = Client::new(1).unwrap();
    let data = SessionData::new(addr.ip().to_string(), addr.port(), false);
    let mut config = SessionConfig::default();
    config.read_timeout_ms = 50;
    let (session, _greeting) = client
        .create_session(data, config, DebugMode::DebugOff)
        .wait()
        .await
        .unwrap();

    let err = session.execute(Request::Quit).wait().await.unwrap_err();
    assert_eq!(err.kind, smtp_session::ErrorKind::ChannelTimeout);
}

/// Scenario 3: a direct-TLS probe fails (the peer doesn't speak TLS at all), the
/// client reconnects plain to the same endpoint, and completes via the PLAIN_STARTTLS
/// dialog — all on the single session-creation completion returned up front.
#[tokio::test]
async fn starttls_opportunistic_upgrade_after_failed_tls_probe() {
    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let cert_der = cert.cert.der().clone();
    let key_der = cert.key_pair.serialize_der();

    tokio::spawn(run_probe_then_starttls_server(listener, cert_der.clone(), key_der));

    let mut root_store = tokio_rustls::rustls::RootCertStore::empty();
    root_store.add(cert_der).unwrap();
    let client_config = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls_context = TlsContext::from_client_config(Arc::new(client_config));

    let mut data = SessionData::new(addr.ip().to_string(), addr.port(), true);
    data.tls_context = Some(tls_context);
    let mut config = SessionConfig::default();
    config.enable_starttls = true;

    let client = Client::new(1).unwrap();
    let (session, greeting) = client
        .create_session(data, config, DebugMode::DebugOff)
        .wait()
        .await
        .unwrap();

    assert_eq!(greeting.code, 220);
    assert_eq!(greeting.tail, "Go ahead");
    // Only one session id is ever assigned: the failed probe's socket never reaches
    // the point where an id would be drawn.
    assert_eq!(session.id(), 1);
}

async fn run_probe_then_starttls_server(
    listener: TcpListener,
    cert_der: tokio_rustls::rustls::pki_types::CertificateDer<'static>,
    key_der: Vec<u8>,
) {
    // First connection: the implicit-TLS probe. These bytes are not a TLS record, so
    // the client's handshake fails to parse them and falls back to plain STARTTLS.
    let (mut first, _) = listener.accept().await.unwrap();
    let _ = first.write_all(b"220 not actually tls\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(first);

    // Second connection: the plain reconnect that drives the STARTTLS dialog.
    let (second, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(second);
    reader.get_mut().write_all(b"220 ready\r\n").await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap(); // EHLO ...
    reader
        .get_mut()
        .write_all(b"250-smtp.test Hello\r\n250 STARTTLS\r\n")
        .await
        .unwrap();

    line.clear();
    reader.read_line(&mut line).await.unwrap(); // STARTTLS
    reader.get_mut().write_all(b"220 Go ahead\r\n").await.unwrap();

    let tcp = reader.into_inner();
    let key = tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer::from(key_der);
    let server_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key.into())
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));
    let tls_stream = acceptor.accept(tcp).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    drop(tls_stream);
}
