/*
 * framing.rs
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

//! Line framing over a `Connection`: strips CRLF, yields one line per read, and
//! turns a stalled read into a distinguishable idle event so both the bring-up
//! pipeline and the live session engine can translate it into the right error.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Outcome of waiting for the next reply line.
pub enum LineEvent {
    Line(String),
    /// No data arrived within the read timeout; the connection is still open.
    Idle,
    /// The peer closed the connection (EOF) before a full line arrived.
    Inactive,
}

/// Reads CRLF-terminated lines off any `AsyncRead`, applying a read-idle timeout to
/// each read attempt.
///
/// `pending` carries a line assembled so far across calls to `next_line`: the future
/// it returns is not cancellation-safe to drop mid-read (a `select!` losing a race to
/// another branch does exactly that), so any bytes already consumed from the socket
/// live here instead of in that future's own stack frame, where dropping it would
/// discard them and desync the reply stream.
pub struct LineReader<R> {
    inner: BufReader<R>,
    read_timeout: Duration,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, read_timeout: Duration) -> Self {
        LineReader { inner: BufReader::new(inner), read_timeout, pending: Vec::new() }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    /// Read the next CRLF-terminated line, stripping the terminator. Distinguishes a
    /// read-idle timeout from a clean or abrupt close so callers can raise the right
    /// error kind for their phase.
    pub async fn next_line(&mut self) -> std::io::Result<LineEvent> {
        let read = tokio::time::timeout(self.read_timeout, read_until_lf(&mut self.inner, &mut self.pending)).await;
        match read {
            Err(_) => Ok(LineEvent::Idle),
            Ok(Err(e)) => Err(e),
            Ok(Ok(false)) if self.pending.is_empty() => Ok(LineEvent::Inactive),
            Ok(Ok(_)) => {
                let mut raw = std::mem::take(&mut self.pending);
                while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                let line = String::from_utf8(raw)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok(LineEvent::Line(line))
            }
        }
    }
}

/// Reads bytes one at a time until (and including) a `\n`, appending to `buf`.
/// Returns `true` if a `\n` terminated the read, `false` on EOF first. `buf` is the
/// caller's persistent `pending` line, so a byte pushed here survives even if this
/// future is dropped before the next one is read.
async fn read_until_lf<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool> {
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.push(byte[0]);
        if byte[0] == b'\n' {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_one_line_stripping_crlf() {
        let mut r = LineReader::new(Cursor::new(b"250 OK\r\n".to_vec()), Duration::from_secs(1));
        match r.next_line().await.unwrap() {
            LineEvent::Line(l) => assert_eq!(l, "250 OK"),
            _ => panic!("expected a line"),
        }
    }

    #[tokio::test]
    async fn reads_multiple_lines_in_order() {
        let mut r = LineReader::new(Cursor::new(b"250-a\r\n250 b\r\n".to_vec()), Duration::from_secs(1));
        let first = match r.next_line().await.unwrap() {
            LineEvent::Line(l) => l,
            _ => panic!("expected a line"),
        };
        let second = match r.next_line().await.unwrap() {
            LineEvent::Line(l) => l,
            _ => panic!("expected a line"),
        };
        assert_eq!(first, "250-a");
        assert_eq!(second, "250 b");
    }

    #[tokio::test]
    async fn eof_before_any_bytes_is_inactive() {
        let mut r = LineReader::new(Cursor::new(Vec::new()), Duration::from_secs(1));
        assert!(matches!(r.next_line().await.unwrap(), LineEvent::Inactive));
    }

    #[tokio::test]
    async fn stalled_read_reports_idle() {
        let (client, _server) = tokio::io::duplex(64);
        let mut r = LineReader::new(client, Duration::from_millis(20));
        assert!(matches!(r.next_line().await.unwrap(), LineEvent::Idle));
    }

    #[tokio::test]
    async fn bytes_read_before_a_dropped_call_are_not_lost() {
        use tokio::io::AsyncWriteExt;

        let (client, mut server) = tokio::io::duplex(64);
        let mut r = LineReader::new(client, Duration::from_millis(20));

        server.write_all(b"250-partial").await.unwrap();
        assert!(matches!(r.next_line().await.unwrap(), LineEvent::Idle));

        server.write_all(b" line\r\n").await.unwrap();
        match r.next_line().await.unwrap() {
            LineEvent::Line(l) => assert_eq!(l, "250-partial line"),
            _ => panic!("expected the reassembled line"),
        }
    }
}
