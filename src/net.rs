/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! TCP/TLS connection plumbing shared by the bring-up pipeline.
//!
//! A session starts life as a plain `TcpStream` or, for implicit TLS, is wrapped in a
//! `rustls` client stream immediately after connect. STARTTLS upgrades a plain stream
//! to TLS in place, consuming it and producing a new `Connection::Tls`. Both variants
//! implement `AsyncRead`/`AsyncWrite` so the rest of the pipeline is agnostic to which
//! one it holds.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                let _ = root_store.add(cert);
            }
        }
        Err(_) => {}
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

/// Default TLS client config (native + Mozilla roots, no client auth). Built once and
/// shared process-wide since most sessions never override it.
fn default_client_config() -> Arc<ClientConfig> {
    static DEFAULT: OnceLock<Arc<ClientConfig>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            let config = ClientConfig::builder()
                .with_root_certificates(build_root_store())
                .with_no_client_auth();
            Arc::new(config)
        })
        .clone()
}

/// Caller-overridable TLS configuration (`SessionData::tls_context`). Falls back to the
/// process default (native + Mozilla roots) when not set.
#[derive(Clone)]
pub struct TlsContext(Arc<ClientConfig>);

impl TlsContext {
    pub fn default_context() -> Self {
        Self(default_client_config())
    }

    pub fn from_client_config(config: Arc<ClientConfig>) -> Self {
        Self(config)
    }

    fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.0.clone())
    }
}

impl Default for TlsContext {
    fn default() -> Self {
        Self::default_context()
    }
}

/// Resolve SNI: the spec allows a list of host names; rustls's handshake takes a single
/// `ServerName`, so the first entry wins. Falls back to the connection host when the
/// list is empty.
fn resolve_server_name(host: &str, sni_names: &[String]) -> io::Result<ServerName<'static>> {
    let chosen = sni_names.first().map(String::as_str).unwrap_or(host);
    ServerName::try_from(chosen.to_string())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid SNI host name"))
}

/// Connect a TCP socket to `host:port`, optionally bound to `local_addr`, bounded by
/// `connect_timeout`. A timed-out attempt is reported as `io::ErrorKind::TimedOut` so
/// callers can tell it apart from a refused or unreachable connect.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    local_addr: Option<SocketAddr>,
    connect_timeout: Duration,
) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    let mut last_err = None;
    for addr in addrs {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(bind) = local_addr {
            if bind.is_ipv4() == addr.is_ipv4() {
                socket.bind(bind)?;
            }
        }
        match tokio::time::timeout(connect_timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to connect")))
}

/// Either a plain TCP connection or a TLS connection over TCP. Both bring-up paths
/// (implicit TLS and plain-then-STARTTLS) converge on this type before the session
/// engine takes ownership of the socket.
pub enum Connection {
    Plain(TcpStream),
    Tls(Box<TokioTlsStream<TcpStream>>),
}

impl Connection {
    /// Upgrade a plain connection to TLS in place (STARTTLS). Consumes `self`; the
    /// underlying TCP socket is reused for the handshake. The error is propagated
    /// exactly as `rustls`/`tokio-rustls` report it (not re-wrapped) so a caller can
    /// downcast to `rustls::Error` to tell a "this wasn't a TLS record at all" probe
    /// failure apart from a genuine handshake failure (e.g. certificate validation).
    ///
    /// # Panics
    /// Panics if called on a connection that is already TLS — the bring-up pipeline
    /// never attempts a double upgrade.
    pub async fn upgrade_to_tls(
        self,
        host: &str,
        sni_names: &[String],
        tls: &TlsContext,
    ) -> io::Result<Connection> {
        match self {
            Connection::Plain(tcp) => {
                let server_name = resolve_server_name(host, sni_names)?;
                let tls_stream = tls.connector().connect(server_name, tcp).await?;
                Ok(Connection::Tls(Box::new(tls_stream)))
            }
            Connection::Tls(_) => {
                panic!("upgrade_to_tls called on a connection already running TLS")
            }
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_flush(cx),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Process-wide monotonic session id counter (one per `Client`). Never yields zero or a
/// negative value; wraps back to 1 on overflow.
pub struct SessionIdCounter(AtomicU64);

impl SessionIdCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Assign the next id. Called exactly once per session, at the moment a connection
    /// socket is obtained.
    pub fn next(&self) -> i64 {
        loop {
            let current = self.0.load(Ordering::SeqCst);
            let next = current.wrapping_add(1);
            let next = if next == 0 || (next as i64) <= 0 { 1 } else { next };
            if self
                .0
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current as i64;
            }
        }
    }
}

impl Default for SessionIdCounter {
    fn default() -> Self {
        Self::new()
    }
}
