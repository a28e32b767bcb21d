/*
 * config.rs
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

//! Immutable inputs to `Client::create_session`: where to connect, how, and under
//! what timeouts.

use std::net::SocketAddr;
use std::time::Duration;

use crate::net::TlsContext;

/// Per-connection target and transport-security request. `ssl` selects implicit TLS
/// on connect; whether a failed TLS probe may fall back to STARTTLS is governed by
/// `SessionConfig::enable_starttls`, not by this struct.
#[derive(Clone)]
pub struct SessionData {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub sni_names: Vec<String>,
    pub local_address: Option<SocketAddr>,
    pub session_context: Option<String>,
    pub tls_context: Option<TlsContext>,
}

impl SessionData {
    pub fn new(host: impl Into<String>, port: u16, ssl: bool) -> Self {
        SessionData {
            host: host.into(),
            port,
            ssl,
            sni_names: Vec::new(),
            local_address: None,
            session_context: None,
            tls_context: None,
        }
    }

    pub fn tls_context(&self) -> TlsContext {
        self.tls_context.clone().unwrap_or_default()
    }
}

/// Timeouts and STARTTLS policy, shared across sessions created with the same config.
#[derive(Clone, Copy)]
pub struct SessionConfig {
    pub connection_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub enable_starttls: bool,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            connection_timeout_ms: 500,
            read_timeout_ms: 10_000,
            enable_starttls: false,
        }
    }
}

/// Whether per-session wire activity is logged regardless of a global trace setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    DebugOff,
    DebugOn,
}

impl DebugMode {
    pub fn is_on(self) -> bool {
        matches!(self, DebugMode::DebugOn)
    }
}
