/*
 * lib.rs
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

//! Asynchronous SMTP client session engine.
//!
//! A [`Client`] owns the I/O worker pool and mints sessions. [`Client::create_session`]
//! runs connection bring-up (implicit TLS, opportunistic STARTTLS, or plain) and
//! resolves a [`Completion`] with a live [`Session`] once the server's greeting has
//! been read. From there, [`Session::execute`] drives the command/response dialog one
//! [`Request`] at a time, including the multi-step SASL AUTH and DATA continuations.
//!
//! Line framing, SMTP command byte encoding per verb beyond what [`Request`] already
//! does, base64, and the concrete TLS trust material a caller wants to override are
//! the only things this crate leaves to its [`net::TlsContext`] seam; everything else
//! needed to hold a conversation with a real SMTP server lives here.

mod bringup;
mod client;
mod completion;
mod config;
mod dot_stuffer;
mod error;
mod framing;
mod log;
mod net;
mod request;
mod response;
mod session;

pub use client::Client;
pub use completion::Completion;
pub use config::{DebugMode, SessionConfig, SessionData};
pub use error::{Error, ErrorKind};
pub use net::TlsContext;
pub use request::{MessageSource, Request};
pub use response::{ReplyClass, Response, Separator};
pub use session::Session;
