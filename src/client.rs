/*
 * client.rs
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

//! The factory that owns the event-loop group and mints sessions.

use std::sync::Arc;

use crate::bringup::{self, ClientHandle};
use crate::completion::Completion;
use crate::config::{DebugMode, SessionConfig, SessionData};
use crate::net::SessionIdCounter;
use crate::response::Response;
use crate::session::Session;

/// Owns a dedicated multi-thread Tokio runtime and the process-wide session-id
/// counter. Every session created through this client runs its bring-up and its
/// live command pipeline as tasks on this runtime, independent of whatever runtime
/// (if any) the caller itself is running on.
pub struct Client {
    runtime: tokio::runtime::Runtime,
    id_counter: Arc<SessionIdCounter>,
}

impl Client {
    /// Build a client with `num_threads` I/O worker threads.
    pub fn new(num_threads: usize) -> std::io::Result<Client> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads.max(1))
            .enable_all()
            .build()?;
        Ok(Client { runtime, id_counter: Arc::new(SessionIdCounter::new()) })
    }

    /// The handle every bring-up task gets: the session-id counter plus the
    /// `create_starttls_session` fallback a direct-TLS probe invokes when it hits a
    /// `NOT_SSL_RECORD` condition. Carries only what bring-up needs, not the client
    /// itself or its runtime.
    fn handle(&self) -> ClientHandle {
        ClientHandle {
            id_counter: self.id_counter.clone(),
            fallback: bringup::starttls_dispatcher(self.id_counter.clone()),
        }
    }

    /// Connect to `data.host:data.port` and run the bring-up pipeline selected by
    /// `(data.ssl, config.enable_starttls)`. The returned completion resolves with
    /// the live session and its greeting response, or with a bring-up error.
    pub fn create_session(&self, data: SessionData, config: SessionConfig, debug: DebugMode) -> Completion<(Session, Response)> {
        let completion = Completion::new();
        let task_completion = completion.clone();
        self.runtime.spawn(bringup::run(self.handle(), data, config, debug, task_completion));
        completion
    }

    /// Gracefully drain and terminate the event-loop group. Blocks the calling
    /// thread until every worker has shut down or `timeout` elapses.
    pub fn shutdown(self, timeout: std::time::Duration) {
        self.runtime.shutdown_timeout(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener as StdTcpListener;

    #[test]
    fn create_session_resolves_plain_greeting() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut sock, _)) = listener.accept() {
                let _ = sock.write_all(b"220 smtp.test ESMTP ready\r\n");
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
        });

        let client = Client::new(2).unwrap();
        let data = SessionData::new(addr.ip().to_string(), addr.port(), false);
        let completion = client.create_session(data, SessionConfig::default(), DebugMode::DebugOff);
        let (session, greeting) = client.runtime.block_on(completion.wait()).unwrap();
        assert_eq!(greeting.code, 220);
        assert_eq!(session.id(), 1);
    }

    #[test]
    fn session_ids_increment_across_sessions() {
        let make_listener = || {
            let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            std::thread::spawn(move || {
                for _ in 0..2 {
                    if let Ok((mut sock, _)) = listener.accept() {
                        let _ = sock.write_all(b"220 ready\r\n");
                        std::thread::sleep(std::time::Duration::from_millis(200));
                    }
                }
            });
            addr
        };
        let addr = make_listener();

        let client = Client::new(2).unwrap();
        let c1 = client.create_session(SessionData::new(addr.ip().to_string(), addr.port(), false), SessionConfig::default(), DebugMode::DebugOff);
        let (s1, _) = client.runtime.block_on(c1.wait()).unwrap();
        let c2 = client.create_session(SessionData::new(addr.ip().to_string(), addr.port(), false), SessionConfig::default(), DebugMode::DebugOff);
        let (s2, _) = client.runtime.block_on(c2.wait()).unwrap();
        assert_eq!(s1.id(), 1);
        assert_eq!(s2.id(), 2);
    }
}
