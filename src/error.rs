/*
 * error.rs
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

//! Error kinds raised by the bring-up pipeline and the session engine.
//!
//! Hand-rolled, no `thiserror`/`anyhow`: matches `SmtpClientError`/`SaslError`/`StoreError`
//! elsewhere in this codebase, a plain struct with a `Display` impl and `std::error::Error`.

use std::fmt;

/// The failure kind describing why a session or a bring-up attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    InvalidServerResponse,
    WriteToServerFailed,
    ConnectionFailedException,
    ConnectionFailedExceedIdleMax,
    ConnectionFailedInvalidGreetingCode,
    ConnectionInactive,
    NotSslRecord,
    StartTlsFailed,
    ChannelException,
    ChannelTimeout,
    ChannelDisconnected,
    ClosingConnectionFailed,
    OperationProhibitedOnClosedChannel,
    CommandNotAllowed,
    OperationNotSupportedForCommand,
    MoreInputThanExpected,
    Cancelled,
    Timeout,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidServerResponse => "INVALID_SERVER_RESPONSE",
            ErrorKind::WriteToServerFailed => "WRITE_TO_SERVER_FAILED",
            ErrorKind::ConnectionFailedException => "CONNECTION_FAILED_EXCEPTION",
            ErrorKind::ConnectionFailedExceedIdleMax => "CONNECTION_FAILED_EXCEED_IDLE_MAX",
            ErrorKind::ConnectionFailedInvalidGreetingCode => "CONNECTION_FAILED_INVALID_GREETING_CODE",
            ErrorKind::ConnectionInactive => "CONNECTION_INACTIVE",
            ErrorKind::NotSslRecord => "NOT_SSL_RECORD",
            ErrorKind::StartTlsFailed => "STARTTLS_FAILED",
            ErrorKind::ChannelException => "CHANNEL_EXCEPTION",
            ErrorKind::ChannelTimeout => "CHANNEL_TIMEOUT",
            ErrorKind::ChannelDisconnected => "CHANNEL_DISCONNECTED",
            ErrorKind::ClosingConnectionFailed => "CLOSING_CONNECTION_FAILED",
            ErrorKind::OperationProhibitedOnClosedChannel => "OPERATION_PROHIBITED_ON_CLOSED_CHANNEL",
            ErrorKind::CommandNotAllowed => "COMMAND_NOT_ALLOWED",
            ErrorKind::OperationNotSupportedForCommand => "OPERATION_NOT_SUPPORTED_FOR_COMMAND",
            ErrorKind::MoreInputThanExpected => "MORE_INPUT_THAN_EXPECTED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

/// An error raised on behalf of a session (or, during bring-up, on behalf of the
/// pending session-creation completion). Renders to the form
/// `failureType=<kind>[,sId=<id>][,uId=<ctx>][,message=<msg>]`.
pub struct Error {
    pub kind: ErrorKind,
    pub session_id: Option<i64>,
    pub session_context: Option<String>,
    pub message: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            session_id: None,
            session_context: None,
            message: None,
            source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_session(mut self, session_id: i64, session_context: Option<&str>) -> Self {
        self.session_id = Some(session_id);
        self.session_context = session_context.map(str::to_string);
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn from_io(kind: ErrorKind, e: std::io::Error) -> Self {
        Self::new(kind).with_message(e.to_string())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({})", self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failureType={}", self.kind.as_str())?;
        if let Some(id) = self.session_id {
            write!(f, ",sId={}", id)?;
        }
        if let Some(ctx) = &self.session_context {
            write!(f, ",uId={}", ctx)?;
        }
        if let Some(msg) = &self.message {
            write!(f, ",message={}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_form_includes_all_fields_when_present() {
        let e = Error::new(ErrorKind::ChannelTimeout)
            .with_session(7, Some("user-42"))
            .with_message("no response");
        assert_eq!(
            e.to_string(),
            "failureType=CHANNEL_TIMEOUT,sId=7,uId=user-42,message=no response"
        );
    }

    #[test]
    fn display_form_omits_absent_fields() {
        let e = Error::new(ErrorKind::InvalidInput);
        assert_eq!(e.to_string(), "failureType=INVALID_INPUT");
    }
}
