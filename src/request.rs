/*
 * request.rs
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

//! SMTP command encoding, one variant per verb.
//!
//! A `Request` knows how to encode its first wire line and, for the handful of
//! commands that solicit a continuation reply (AUTH, DATA), how to encode the next
//! line once the server's 3xx arrives. Everything else about the wire dialog —
//! writing the bytes, reading the reply, matching it back to this request — is the
//! session engine's job.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::dot_stuffer::DotStuffer;
use crate::error::{Error, ErrorKind};
use crate::response::Response;

/// A lazy, single-use byte source for a DATA body.
pub enum MessageSource {
    Bytes(Vec<u8>),
    Reader(Box<dyn AsyncRead + Unpin + Send>),
}

impl From<Vec<u8>> for MessageSource {
    fn from(v: Vec<u8>) -> Self {
        MessageSource::Bytes(v)
    }
}

/// Where an AUTH LOGIN continuation dialog currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginStep {
    AwaitingUsernamePrompt,
    AwaitingPasswordPrompt,
    Done,
}

pub enum Request {
    Ehlo(String),
    Helo(String),
    Mail { sender: String, params: Option<String> },
    Rcpt(String),
    Data(MessageSource),
    Rset,
    Noop,
    Quit,
    Help,
    Expn(String),
    Vrfy(String),
    StartTls,
    AuthPlain { username: String, password: String },
    AuthLogin { username: String, password: String, step: LoginStep },
    AuthXoauth2 { username: String, token: String },
}

impl Request {
    pub fn auth_login(username: impl Into<String>, password: impl Into<String>) -> Request {
        Request::AuthLogin {
            username: username.into(),
            password: password.into(),
            step: LoginStep::AwaitingUsernamePrompt,
        }
    }

    /// A short name for this command, used in logs and `debug_data` for AUTH framing.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Ehlo(_) => "EHLO",
            Request::Helo(_) => "HELO",
            Request::Mail { .. } => "MAIL",
            Request::Rcpt(_) => "RCPT",
            Request::Data(_) => "DATA",
            Request::Rset => "RSET",
            Request::Noop => "NOOP",
            Request::Quit => "QUIT",
            Request::Help => "HELP",
            Request::Expn(_) => "EXPN",
            Request::Vrfy(_) => "VRFY",
            Request::StartTls => "STARTTLS",
            Request::AuthPlain { .. } => "AUTH PLAIN",
            Request::AuthLogin { .. } => "AUTH LOGIN",
            Request::AuthXoauth2 { .. } => "AUTH XOAUTH2",
        }
    }

    /// True for AUTH and DATA: only `debug_data()` may be logged, never the raw wire bytes.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Request::Data(_) | Request::AuthPlain { .. } | Request::AuthLogin { .. } | Request::AuthXoauth2 { .. }
        )
    }

    /// Redacted text suitable for a debug log, reflecting where in a multi-step dialog
    /// this request currently is.
    pub fn debug_data(&self) -> String {
        match self {
            Request::Data(_) => "DATA stream".to_string(),
            Request::AuthPlain { .. } => "AUTH PLAIN <secret>".to_string(),
            Request::AuthXoauth2 { .. } => "AUTH XOAUTH2 <secret>".to_string(),
            Request::AuthLogin { step, .. } => match step {
                LoginStep::AwaitingUsernamePrompt => "AUTH LOGIN".to_string(),
                LoginStep::AwaitingPasswordPrompt => "<username>".to_string(),
                LoginStep::Done => "<password>".to_string(),
            },
            other => other.encode_initial_line(),
        }
    }

    fn encode_initial_line(&self) -> String {
        match self {
            Request::Ehlo(name) => format!("EHLO {}", name),
            Request::Helo(name) => format!("HELO {}", name),
            Request::Mail { sender, params } => match params {
                Some(p) => format!("MAIL FROM:<{}> {}", sender, p),
                None => format!("MAIL FROM:<{}>", sender),
            },
            Request::Rcpt(recipient) => format!("RCPT TO:<{}>", recipient),
            Request::Data(_) => "DATA".to_string(),
            Request::Rset => "RSET".to_string(),
            Request::Noop => "NOOP".to_string(),
            Request::Quit => "QUIT".to_string(),
            Request::Help => "HELP".to_string(),
            Request::Expn(name) => format!("EXPN {}", name),
            Request::Vrfy(name) => format!("VRFY {}", name),
            Request::StartTls => "STARTTLS".to_string(),
            Request::AuthPlain { username, password } => {
                let mut payload = Vec::new();
                payload.push(0u8);
                payload.extend_from_slice(username.as_bytes());
                payload.push(0u8);
                payload.extend_from_slice(password.as_bytes());
                format!("AUTH PLAIN {}", BASE64.encode(payload))
            }
            Request::AuthLogin { .. } => "AUTH LOGIN".to_string(),
            Request::AuthXoauth2 { username, token } => {
                let payload = format!("user={}\x01auth=Bearer {}\x01\x01", username, token);
                format!("AUTH XOAUTH2 {}", BASE64.encode(payload))
            }
        }
    }

    /// Encode the full first wire line, CRLF-terminated. DATA's line is just the bare
    /// verb; the body itself is written by `encode_after_continuation` once the server
    /// sends 354.
    pub fn encode_initial(&self) -> Vec<u8> {
        let mut line = self.encode_initial_line().into_bytes();
        line.extend_from_slice(b"\r\n");
        line
    }

    /// Handle a continuation reply (334/354) for multi-step commands. Returns the bytes
    /// to write next, or an error if the continuation is unexpected for this command or
    /// arrives out of sequence.
    pub async fn encode_after_continuation(&mut self, response: &Response) -> Result<Vec<u8>, Error> {
        if !response.reply_class().is_success() && response.code != 334 && response.code != 354 {
            return Err(Error::new(ErrorKind::CommandNotAllowed)
                .with_message(format!("server rejected {} mid-dialog: {}", self.kind(), response.to_wire_line())));
        }
        match self {
            Request::AuthLogin { username, password, step } => match step {
                LoginStep::AwaitingUsernamePrompt => {
                    *step = LoginStep::AwaitingPasswordPrompt;
                    Ok(crlf(BASE64.encode(username.as_bytes())))
                }
                LoginStep::AwaitingPasswordPrompt => {
                    *step = LoginStep::Done;
                    Ok(crlf(BASE64.encode(password.as_bytes())))
                }
                LoginStep::Done => Err(Error::new(ErrorKind::MoreInputThanExpected)
                    .with_message("server requested a third AUTH LOGIN challenge")),
            },
            Request::AuthXoauth2 { .. } => {
                // The server's single challenge is answered with an empty line; a non-2xx
                // final reply carries the base64 failure detail and is surfaced normally.
                Ok(b"\r\n".to_vec())
            }
            Request::Data(source) => {
                if response.code != 354 {
                    return Err(Error::new(ErrorKind::CommandNotAllowed)
                        .with_message("DATA continuation expected code 354"));
                }
                encode_data_body(source).await
            }
            _ => Err(Error::new(ErrorKind::OperationNotSupportedForCommand)
                .with_message(format!("{} does not accept a continuation", self.kind()))),
        }
    }
}

fn crlf(mut s: String) -> Vec<u8> {
    s.push_str("\r\n");
    s.into_bytes()
}

/// Encode the full DATA body (dot-stuffed) plus the CRLF `.` CRLF terminator. Kept
/// separate from `encode_after_continuation` because it is async over an arbitrary
/// reader and the session engine streams it directly to the socket rather than
/// buffering the whole encoded frame up front for large bodies.
pub async fn encode_data_body(source: &mut MessageSource) -> Result<Vec<u8>, Error> {
    let bytes = match source {
        MessageSource::Bytes(b) => std::mem::take(b),
        MessageSource::Reader(r) => {
            let mut buf = Vec::new();
            r.read_to_end(&mut buf)
                .await
                .map_err(|e| Error::new(ErrorKind::ChannelException).with_message(e.to_string()))?;
            buf
        }
    };
    let mut stuffer = DotStuffer::new();
    let mut out = Vec::with_capacity(bytes.len() + 8);
    stuffer.process_chunk(&bytes, |chunk| out.extend_from_slice(chunk));
    stuffer.end_message(|chunk| out.extend_from_slice(chunk));
    Ok(out)
}
