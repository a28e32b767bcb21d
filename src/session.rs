/*
 * session.rs
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

//! The live command/response pipeline.
//!
//! Each session owns a dedicated task holding the socket; the `Session` handle is
//! just an `mpsc` sender plus the id/context, safe to clone and move across threads.
//! Every submitted command is serialized through an in-flight queue bounded to one
//! entry, so responses for command N are fully drained before command N+1 is written.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::completion::Completion;
use crate::config::DebugMode;
use crate::error::{Error, ErrorKind};
use crate::framing::{LineEvent, LineReader};
use crate::log::smtp_log;
use crate::net::Connection;
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    RequestInPreparation,
    RequestSent,
    ResponsesDone,
}

struct CommandEntry {
    request: Request,
    collected: Vec<Response>,
    completion: Completion<Vec<Response>>,
    state: EntryState,
}

enum SessionMsg {
    Execute(Request, Completion<Vec<Response>>),
    SetDebugMode(bool),
    Close(Completion<bool>),
}

/// A live, cloneable handle to a session. All methods are safe to call from any
/// thread; the actual protocol work happens on the session's dedicated task.
#[derive(Clone)]
pub struct Session {
    id: i64,
    context: Option<String>,
    sender: mpsc::UnboundedSender<SessionMsg>,
    closed: Arc<AtomicBool>,
}

impl Session {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Submit a command. Fails synchronously (completion pre-resolved) if the
    /// channel is closed or another command is already in flight.
    pub fn execute(&self, request: Request) -> Completion<Vec<Response>> {
        let completion = Completion::new();
        if self.closed.load(Ordering::SeqCst) {
            completion.set_error(
                Error::new(ErrorKind::OperationProhibitedOnClosedChannel).with_session(self.id, self.context.as_deref()),
            );
            return completion;
        }
        if self
            .sender
            .send(SessionMsg::Execute(request, completion.clone()))
            .is_err()
        {
            completion.set_error(Error::new(ErrorKind::ChannelDisconnected).with_session(self.id, self.context.as_deref()));
        }
        completion
    }

    pub fn set_debug_mode(&self, mode: DebugMode) {
        let _ = self.sender.send(SessionMsg::SetDebugMode(mode.is_on()));
    }

    /// Orderly close. Resolves immediately with `true`, without I/O, if already closed.
    pub fn close(&self) -> Completion<bool> {
        let completion = Completion::new();
        if self.closed.load(Ordering::SeqCst) {
            completion.set_value(true);
            return completion;
        }
        if self.sender.send(SessionMsg::Close(completion.clone())).is_err() {
            completion.set_value(true);
        }
        completion
    }
}

struct Engine {
    id: i64,
    context: Option<String>,
    reader: LineReader<Connection>,
    queue: VecDeque<CommandEntry>,
    debug: bool,
    closed: Arc<AtomicBool>,
    rx: mpsc::UnboundedReceiver<SessionMsg>,
}

/// Spawn the dedicated task that owns `conn` and drives the command/response
/// pipeline. Returns the public handle; the greeting response has already been
/// consumed by the bring-up pipeline before this is called.
pub fn spawn(
    id: i64,
    context: Option<String>,
    conn: Connection,
    read_timeout: std::time::Duration,
) -> Session {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let engine = Engine {
        id,
        context: context.clone(),
        reader: LineReader::new(conn, read_timeout),
        queue: VecDeque::new(),
        debug: false,
        closed: closed.clone(),
        rx,
    };
    tokio::spawn(engine.run());
    Session { id, context, sender: tx, closed }
}

impl Engine {
    async fn run(mut self) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    }
                }
                line = self.reader.next_line() => {
                    self.handle_line_event(line).await;
                }
            }
        }
    }

    fn log(&self, msg: impl AsRef<str>) {
        if self.debug {
            smtp_log!(self.id, "{}", msg.as_ref());
        }
    }

    async fn handle_msg(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::SetDebugMode(on) => self.debug = on,
            SessionMsg::Execute(request, completion) => self.handle_execute(request, completion).await,
            SessionMsg::Close(completion) => self.handle_close(completion).await,
        }
    }

    async fn handle_execute(&mut self, request: Request, completion: Completion<Vec<Response>>) {
        if self.closed.load(Ordering::SeqCst) {
            completion.set_error(Error::new(ErrorKind::OperationProhibitedOnClosedChannel).with_session(self.id, self.context.as_deref()));
            return;
        }
        if !self.queue.is_empty() {
            completion.set_error(Error::new(ErrorKind::CommandNotAllowed).with_session(self.id, self.context.as_deref()));
            return;
        }
        let line = if request.is_sensitive() {
            self.log(format!("-> {}", request.debug_data()));
            request.encode_initial()
        } else {
            let bytes = request.encode_initial();
            self.log(format!("-> {}", String::from_utf8_lossy(&bytes).trim_end()));
            bytes
        };
        let entry = CommandEntry {
            request,
            collected: Vec::new(),
            completion: completion.clone(),
            state: EntryState::RequestInPreparation,
        };
        self.queue.push_back(entry);
        self.write_and_mark_sent(line).await;
    }

    /// Write `line` to the socket and advance the head entry to `RequestSent`
    /// regardless of outcome; on failure, resolve the head and close the session.
    async fn write_and_mark_sent(&mut self, line: Vec<u8>) {
        let result = self.reader.get_mut().write_all(&line).await;
        if let Some(head) = self.queue.front_mut() {
            head.state = EntryState::RequestSent;
        }
        if let Err(e) = result {
            self.fail_head(ErrorKind::WriteToServerFailed, e.to_string());
            self.shutdown_socket().await;
        }
    }

    /// Orderly close drains the in-flight head the same way a peer-initiated
    /// disconnect does: the head's completion must resolve with
    /// `CHANNEL_DISCONNECTED` exactly once, never left pending.
    async fn handle_close(&mut self, completion: Completion<bool>) {
        if self.closed.load(Ordering::SeqCst) {
            completion.set_value(true);
            return;
        }
        self.fail_head(ErrorKind::ChannelDisconnected, "connection closed by caller");
        match self.reader.get_mut().shutdown().await {
            Ok(()) => {
                self.mark_closed();
                completion.set_value(true);
            }
            Err(e) => {
                self.mark_closed();
                completion.set_error(Error::new(ErrorKind::ClosingConnectionFailed).with_session(self.id, self.context.as_deref()).with_message(e.to_string()));
            }
        }
    }

    async fn handle_line_event(&mut self, event: std::io::Result<LineEvent>) {
        match event {
            Err(e) => {
                self.fail_head(ErrorKind::ChannelException, e.to_string());
                self.shutdown_socket().await;
            }
            Ok(LineEvent::Idle) => {
                let head_waiting = matches!(self.queue.front(), Some(e) if e.state == EntryState::RequestSent);
                if head_waiting {
                    self.fail_head(ErrorKind::ChannelTimeout, "no response within read timeout");
                    self.shutdown_socket().await;
                }
            }
            Ok(LineEvent::Inactive) => {
                self.fail_head(ErrorKind::ChannelDisconnected, "connection closed by peer");
                self.mark_closed();
            }
            Ok(LineEvent::Line(line)) => match Response::parse(&line) {
                Ok(resp) => self.on_response(resp).await,
                Err(_) => {
                    self.fail_head(ErrorKind::InvalidServerResponse, format!("unparseable reply: {:?}", line));
                    self.shutdown_socket().await;
                }
            },
        }
    }

    async fn on_response(&mut self, resp: Response) {
        self.log(format!("<- {}", resp.to_wire_line()));
        if self.queue.is_empty() {
            self.log(format!("dropping unsolicited reply: {}", resp.to_wire_line()));
            return;
        }
        let is_continuation = resp.is_continuation();
        let is_last = resp.is_last_line();
        {
            let head = self.queue.front_mut().unwrap();
            head.collected.push(resp.clone());
        }

        if is_continuation {
            self.queue.front_mut().unwrap().state = EntryState::RequestInPreparation;
            let next = {
                let head = self.queue.front_mut().unwrap();
                head.request.encode_after_continuation(&resp).await
            };
            match next {
                Ok(bytes) => self.write_and_mark_sent(bytes).await,
                Err(e) => {
                    self.fail_head_with(e);
                    self.shutdown_socket().await;
                }
            }
        } else if is_last {
            self.queue.front_mut().unwrap().state = EntryState::ResponsesDone;
            let entry = self.queue.pop_front().unwrap();
            entry.completion.set_value(entry.collected);
        }
        // else: intermediate hyphen-continued line, keep collecting.
    }

    fn fail_head(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let err = Error::new(kind).with_session(self.id, self.context.as_deref()).with_message(message);
        self.fail_head_with(err);
    }

    fn fail_head_with(&mut self, err: Error) {
        if let Some(entry) = self.queue.pop_front() {
            entry.completion.set_error(err);
        }
    }

    fn mark_closed(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn shutdown_socket(&mut self) {
        let _ = self.reader.get_mut().shutdown().await;
        self.mark_closed();
    }
}
