/*
 * bringup.rs
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

//! The chain that drives a connection from raw socket to a live, installed session.
//!
//! Four bring-up modes fall out of `(ssl, starttls)`: direct TLS with an opportunistic
//! STARTTLS fallback, direct TLS with no fallback, plain-then-STARTTLS, and plain with
//! no upgrade at all. Every phase applies the same read-idle and channel-inactive
//! handling: whichever happens first between a parsed line and those two events
//! resolves the session-creation completion exactly once and tears the socket down.

use std::io;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::completion::Completion;
use crate::config::{DebugMode, SessionConfig, SessionData};
use crate::error::{Error, ErrorKind};
use crate::framing::{LineEvent, LineReader};
use crate::log::smtp_log;
use crate::net::{connect_tcp, Connection, SessionIdCounter};
use crate::response::{self, Response};
use crate::session::{self, Session};

/// The greeting name the driver identifies itself with while probing STARTTLS
/// capability. Its value is never user-visible past the EHLO line itself.
const STARTTLS_PROBE_NAME: &str = "Reconnection";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    SslWithStarttls,
    SslNoStarttls,
    PlainStarttls,
    NonSsl,
}

fn derive_mode(data: &SessionData, config: &SessionConfig) -> Mode {
    match (data.ssl, config.enable_starttls) {
        (true, true) => Mode::SslWithStarttls,
        (true, false) => Mode::SslNoStarttls,
        (false, true) => Mode::PlainStarttls,
        (false, false) => Mode::NonSsl,
    }
}

/// The minimal interface the TLS probe needs back from the client to schedule a
/// fallback reconnect: `create_starttls_session` forces a plain connect and a
/// PLAIN_STARTTLS bring-up on the caller's existing session-creation completion.
pub trait StarttlsFallback: Send + Sync {
    fn create_starttls_session(
        &self,
        data: SessionData,
        config: SessionConfig,
        debug: DebugMode,
        completion: Completion<(Session, Response)>,
    );
}

/// The concrete fallback dispatcher: holds only the session-id counter, not the
/// whole client, so a lingering fallback task can't keep the client's runtime alive
/// past its own lifetime.
struct StarttlsDispatcher(Arc<SessionIdCounter>);

impl StarttlsFallback for StarttlsDispatcher {
    fn create_starttls_session(
        &self,
        data: SessionData,
        config: SessionConfig,
        debug: DebugMode,
        completion: Completion<(Session, Response)>,
    ) {
        let handle = ClientHandle { id_counter: self.0.clone(), fallback: Arc::new(StarttlsDispatcher(self.0.clone())) };
        tokio::spawn(run_plain_starttls(handle, data, config, debug, completion));
    }
}

/// Build the fallback dispatcher `Client::new` installs on every `ClientHandle` it hands out.
pub fn starttls_dispatcher(id_counter: Arc<SessionIdCounter>) -> Arc<dyn StarttlsFallback> {
    Arc::new(StarttlsDispatcher(id_counter))
}

/// Back-reference the bring-up pipeline needs from the client, plus the session-id
/// counter every successful bring-up draws from. Dropped as soon as bring-up finishes
/// so a lingering task holds nothing else of the client alive.
#[derive(Clone)]
pub struct ClientHandle {
    pub(crate) id_counter: Arc<SessionIdCounter>,
    pub(crate) fallback: Arc<dyn StarttlsFallback>,
}

/// Start a fresh session-creation bring-up for `data`/`config`, spawning the task and
/// returning its completion immediately.
pub fn start(client: ClientHandle, data: SessionData, config: SessionConfig, debug: DebugMode) -> Completion<(Session, Response)> {
    let completion = Completion::new();
    let task_completion = completion.clone();
    tokio::spawn(run(client, data, config, debug, task_completion));
    completion
}

pub(crate) async fn run(client: ClientHandle, data: SessionData, config: SessionConfig, debug: DebugMode, completion: Completion<(Session, Response)>) {
    match derive_mode(&data, &config) {
        Mode::NonSsl => run_plain_greeting(client, data, config, debug, completion).await,
        Mode::SslNoStarttls => run_tls_greeting(client, data, config, debug, completion, false).await,
        Mode::SslWithStarttls => run_tls_greeting(client, data, config, debug, completion, true).await,
        Mode::PlainStarttls => run_plain_starttls(client, data, config, debug, completion).await,
    }
}

/// Fail the completion with `kind` and best-effort close `conn`. Used by every
/// bring-up exit path so resolve-then-close ordering is uniform.
async fn fail(completion: &Completion<(Session, Response)>, conn: &mut Connection, kind: ErrorKind, message: impl Into<String>) {
    completion.set_error(Error::new(kind).with_message(message));
    let _ = conn.shutdown().await;
}

async fn fail_no_socket(completion: &Completion<(Session, Response)>, kind: ErrorKind, message: impl Into<String>) {
    completion.set_error(Error::new(kind).with_message(message));
}

/// Connect and, on TLS modes, perform the handshake. Direct-TLS failure is reported
/// via `Err` so the caller can decide between STARTTLS fallback and `NOT_SSL_RECORD`.
async fn connect(data: &SessionData, config: &SessionConfig, tls: bool) -> Result<Connection, (ErrorKind, String)> {
    let tcp = connect_tcp(&data.host, data.port, data.local_address, config.connect_timeout())
        .await
        .map_err(|e| (ErrorKind::WriteToServerFailed, e.to_string()))?;
    if !tls {
        return Ok(Connection::Plain(tcp));
    }
    Connection::Plain(tcp)
        .upgrade_to_tls(&data.host, &data.sni_names, &data.tls_context())
        .await
        .map_err(|e| {
            let kind = classify_tls_handshake_error(&e);
            (kind, e.to_string())
        })
}

/// Tell a TLS probe's "the peer isn't speaking TLS at all" condition apart from a
/// genuine handshake failure (bad certificate, protocol mismatch, etc). Only the
/// former should ever trigger a STARTTLS fallback reconnect; the latter is a real
/// failure and must be reported as such even when a fallback is available.
fn classify_tls_handshake_error(e: &io::Error) -> ErrorKind {
    let source = e.get_ref().map(|inner| inner as &(dyn std::error::Error + 'static));
    if let Some(tls_err) = source.and_then(|s| s.downcast_ref::<tokio_rustls::rustls::Error>()) {
        if matches!(
            tls_err,
            tokio_rustls::rustls::Error::CorruptMessage
                | tokio_rustls::rustls::Error::CorruptMessagePayload(_)
                | tokio_rustls::rustls::Error::InvalidMessage(_)
        ) {
            return ErrorKind::NotSslRecord;
        }
    }
    ErrorKind::ConnectionFailedException
}

async fn run_tls_greeting(
    client: ClientHandle,
    data: SessionData,
    config: SessionConfig,
    debug: DebugMode,
    completion: Completion<(Session, Response)>,
    fallback_allowed: bool,
) {
    match connect(&data, &config, true).await {
        Ok(conn) => run_greeting_reader(client, conn, data, config, debug, completion).await,
        Err((ErrorKind::WriteToServerFailed, msg)) => fail_no_socket(&completion, ErrorKind::WriteToServerFailed, msg).await,
        Err((ErrorKind::NotSslRecord, _)) if fallback_allowed => {
            // TLS probe: the peer didn't speak TLS. Ask the client to schedule a
            // plain reconnect to the same endpoint and run the STARTTLS dialog
            // driver on the same completion.
            client.fallback.create_starttls_session(data, config, debug, completion);
        }
        Err((kind, msg)) => fail_no_socket(&completion, kind, msg).await,
    }
}

async fn run_plain_greeting(client: ClientHandle, data: SessionData, config: SessionConfig, debug: DebugMode, completion: Completion<(Session, Response)>) {
    match connect(&data, &config, false).await {
        Ok(conn) => run_greeting_reader(client, conn, data, config, debug, completion).await,
        Err((kind, msg)) => fail_no_socket(&completion, kind, msg).await,
    }
}

/// Shared tail of both non-STARTTLS modes: read the terminal 220 and install the
/// live session, or fail with the appropriate bring-up error.
async fn run_greeting_reader(client: ClientHandle, conn: Connection, data: SessionData, config: SessionConfig, debug: DebugMode, completion: Completion<(Session, Response)>) {
    let mut reader = LineReader::new(conn, config.read_timeout());
    match reader.next_line().await {
        Ok(LineEvent::Line(line)) => match Response::parse(&line) {
            Ok(resp) if resp.code == response::GREETING => {
                let id = client.id_counter.next();
                if debug.is_on() {
                    smtp_log!(id, "connected, greeting: {}", resp.to_wire_line());
                }
                let conn = reader.into_inner();
                let session = session::spawn(id, data.session_context.clone(), conn, config.read_timeout());
                session.set_debug_mode(debug);
                completion.set_value((session, resp));
            }
            Ok(resp) => {
                let mut conn = reader.into_inner();
                fail(&completion, &mut conn, ErrorKind::ConnectionFailedInvalidGreetingCode, resp.to_wire_line()).await;
            }
            Err(e) => {
                let mut conn = reader.into_inner();
                fail(&completion, &mut conn, e.kind, e.message.unwrap_or_default()).await;
            }
        },
        Ok(LineEvent::Idle) => {
            let mut conn = reader.into_inner();
            fail(&completion, &mut conn, ErrorKind::ConnectionFailedExceedIdleMax, "no greeting within read timeout").await;
        }
        Ok(LineEvent::Inactive) => fail_no_socket(&completion, ErrorKind::ConnectionInactive, "socket closed before greeting").await,
        Err(e) => {
            let mut conn = reader.into_inner();
            fail(&completion, &mut conn, ErrorKind::ConnectionFailedException, e.to_string()).await;
        }
    }
}

/// The four-state STARTTLS dialog: greeting, EHLO (with a HELO retry on outright
/// rejection), capability scan for "STARTTLS", and the TLS upgrade itself.
async fn run_plain_starttls(client: ClientHandle, data: SessionData, config: SessionConfig, debug: DebugMode, completion: Completion<(Session, Response)>) {
    let tcp = match connect_tcp(&data.host, data.port, data.local_address, config.connect_timeout()).await {
        Ok(t) => t,
        Err(e) => return fail_no_socket(&completion, ErrorKind::WriteToServerFailed, e.to_string()).await,
    };
    let mut reader = LineReader::new(Connection::Plain(tcp), config.read_timeout());

    // PRE_EHLO
    if expect_success_line(&mut reader, &completion, response::GREETING).await.is_err() {
        return;
    }

    if write_line(&mut reader, &completion, &format!("EHLO {}", STARTTLS_PROBE_NAME)).await.is_err() {
        return;
    }

    // PRE_STARTTLS: collect the multi-line EHLO reply, retrying once via HELO if the
    // server rejects EHLO outright before any capability line arrives.
    let mut saw_starttls = false;
    let mut tried_helo = false;
    let last_line;
    loop {
        match reader.next_line().await {
            Ok(LineEvent::Line(line)) => match Response::parse(&line) {
                Ok(resp) => {
                    if !resp.is_success() && !tried_helo {
                        tried_helo = true;
                        if write_line(&mut reader, &completion, &format!("HELO {}", STARTTLS_PROBE_NAME)).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    if !resp.is_success() {
                        last_line = resp;
                        break;
                    }
                    let token = resp.message().split_whitespace().next().unwrap_or("");
                    if token.eq_ignore_ascii_case("STARTTLS") {
                        saw_starttls = true;
                    }
                    if resp.is_last_line() {
                        last_line = resp;
                        break;
                    }
                }
                Err(e) => {
                    let mut conn = reader.into_inner();
                    return fail(&completion, &mut conn, e.kind, e.message.unwrap_or_default()).await;
                }
            },
            Ok(LineEvent::Idle) => {
                let mut conn = reader.into_inner();
                return fail(&completion, &mut conn, ErrorKind::ConnectionFailedExceedIdleMax, "no EHLO reply within read timeout").await;
            }
            Ok(LineEvent::Inactive) => return fail_no_socket(&completion, ErrorKind::ConnectionInactive, "socket closed during EHLO").await,
            Err(e) => {
                let mut conn = reader.into_inner();
                return fail(&completion, &mut conn, ErrorKind::ConnectionFailedException, e.to_string()).await;
            }
        }
    }

    if !saw_starttls {
        let mut conn = reader.into_inner();
        return fail(&completion, &mut conn, ErrorKind::StartTlsFailed, last_line.to_wire_line()).await;
    }

    // POST_STARTTLS
    if write_line(&mut reader, &completion, "STARTTLS").await.is_err() {
        return;
    }
    let starttls_reply = match reader.next_line().await {
        Ok(LineEvent::Line(line)) => match Response::parse(&line) {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                let mut conn = reader.into_inner();
                return fail(&completion, &mut conn, ErrorKind::StartTlsFailed, resp.to_wire_line()).await;
            }
            Err(e) => {
                let mut conn = reader.into_inner();
                return fail(&completion, &mut conn, e.kind, e.message.unwrap_or_default()).await;
            }
        },
        Ok(LineEvent::Idle) => {
            let mut conn = reader.into_inner();
            return fail(&completion, &mut conn, ErrorKind::ConnectionFailedExceedIdleMax, "no STARTTLS reply within read timeout").await;
        }
        Ok(LineEvent::Inactive) => return fail_no_socket(&completion, ErrorKind::ConnectionInactive, "socket closed during STARTTLS").await,
        Err(e) => {
            let mut conn = reader.into_inner();
            return fail(&completion, &mut conn, ErrorKind::ConnectionFailedException, e.to_string()).await;
        }
    };

    let plain_conn = reader.into_inner();
    match plain_conn.upgrade_to_tls(&data.host, &data.sni_names, &data.tls_context()).await {
        Ok(tls_conn) => {
            let id = client.id_counter.next();
            if debug.is_on() {
                smtp_log!(id, "STARTTLS upgrade complete: {}", starttls_reply.to_wire_line());
            }
            let session = session::spawn(id, data.session_context.clone(), tls_conn, config.read_timeout());
            session.set_debug_mode(debug);
            completion.set_value((session, starttls_reply));
        }
        Err(e) => fail_no_socket(&completion, ErrorKind::ConnectionFailedException, e.to_string()).await,
    }
}

/// Read one line and require it be a last-line success reply with the given code
/// (used only for the initial 220 greeting in the STARTTLS driver).
async fn expect_success_line(
    reader: &mut LineReader<Connection>,
    completion: &Completion<(Session, Response)>,
    expected_code: u16,
) -> Result<(), ()> {
    match reader.next_line().await {
        Ok(LineEvent::Line(line)) => match Response::parse(&line) {
            Ok(resp) if resp.code == expected_code => Ok(()),
            Ok(resp) => {
                let _ = reader.get_mut().shutdown().await;
                completion.set_error(Error::new(ErrorKind::ConnectionFailedInvalidGreetingCode).with_message(resp.to_wire_line()));
                Err(())
            }
            Err(e) => {
                let _ = reader.get_mut().shutdown().await;
                completion.set_error(e);
                Err(())
            }
        },
        Ok(LineEvent::Idle) => {
            let _ = reader.get_mut().shutdown().await;
            completion.set_error(Error::new(ErrorKind::ConnectionFailedExceedIdleMax).with_message("no greeting within read timeout"));
            Err(())
        }
        Ok(LineEvent::Inactive) => {
            completion.set_error(Error::new(ErrorKind::ConnectionInactive).with_message("socket closed before greeting"));
            Err(())
        }
        Err(e) => {
            let _ = reader.get_mut().shutdown().await;
            completion.set_error(Error::new(ErrorKind::ConnectionFailedException).with_message(e.to_string()));
            Err(())
        }
    }
}

async fn write_line(reader: &mut LineReader<Connection>, completion: &Completion<(Session, Response)>, line: &str) -> Result<(), ()> {
    let mut bytes = line.as_bytes().to_vec();
    bytes.extend_from_slice(b"\r\n");
    match reader.get_mut().write_all(&bytes).await {
        Ok(()) => Ok(()),
        Err(e) => {
            completion.set_error(Error::new(ErrorKind::WriteToServerFailed).with_message(e.to_string()));
            Err(())
        }
    }
}
