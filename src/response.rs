/*
 * response.rs
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

//! Parsed SMTP reply line.
//!
//! Line framing (stripping CRLF, yielding one line per callback) is an external
//! collaborator; `Response::parse` takes an already-framed ASCII line.

use crate::error::{Error, ErrorKind};

/// The separator byte immediately after the three-digit code, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// `' '` — this is the last line of the reply.
    Space,
    /// `'-'` — more lines follow.
    Hyphen,
    /// No fourth byte at all (a bare three-digit line, e.g. `"250"`).
    None,
}

/// The first digit of the code, classifying the kind of reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    PositivePreliminary, // 1xx (unused by SMTP proper, kept for completeness)
    PositiveCompletion,  // 2xx
    PositiveIntermediate, // 3xx
    TransientNegative,   // 4xx
    PermanentNegative,   // 5xx
}

impl ReplyClass {
    fn from_first_digit(d: u8) -> Self {
        match d {
            b'1' => ReplyClass::PositivePreliminary,
            b'2' => ReplyClass::PositiveCompletion,
            b'3' => ReplyClass::PositiveIntermediate,
            b'4' => ReplyClass::TransientNegative,
            _ => ReplyClass::PermanentNegative,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ReplyClass::PositiveCompletion)
    }
}

/// A single parsed SMTP reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub separator: Separator,
    pub tail: String,
}

/// Named codes the engine treats specially.
pub const GREETING: u16 = 220;
pub const STARTTLS_READY: u16 = 220;
pub const CLOSING: u16 = 221;
pub const EHLO_SUCCESS: u16 = 250;
pub const CHALLENGE: u16 = 334;
pub const START_MSG_INPUT: u16 = 354;
pub const HELP: u16 = 214;

impl Response {
    /// Parse one already-framed (CRLF-stripped) ASCII reply line.
    pub fn parse(line: &str) -> Result<Response, Error> {
        let bytes = line.as_bytes();
        if bytes.len() < 3 {
            return Err(Error::new(ErrorKind::InvalidServerResponse)
                .with_message(format!("reply line too short: {:?}", line)));
        }
        if !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() || !bytes[2].is_ascii_digit() {
            return Err(Error::new(ErrorKind::InvalidServerResponse)
                .with_message(format!("reply line does not start with a 3-digit code: {:?}", line)));
        }
        let first = bytes[0];
        let second = bytes[1];
        if !(b'2'..=b'5').contains(&first) || !(b'0'..=b'5').contains(&second) {
            return Err(Error::new(ErrorKind::InvalidServerResponse)
                .with_message(format!("reply code out of range: {:?}", line)));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| Error::new(ErrorKind::InvalidServerResponse).with_message("non-numeric reply code"))?;
        if !(200..=599).contains(&code) {
            return Err(Error::new(ErrorKind::InvalidServerResponse)
                .with_message(format!("reply code out of range: {}", code)));
        }

        if bytes.len() == 3 {
            return Ok(Response {
                code,
                separator: Separator::None,
                tail: String::new(),
            });
        }

        let sep_byte = bytes[3];
        let separator = match sep_byte {
            b' ' => Separator::Space,
            b'-' => Separator::Hyphen,
            _ => {
                return Err(Error::new(ErrorKind::InvalidServerResponse)
                    .with_message(format!("invalid separator byte after code: {:?}", line)))
            }
        };
        let tail = if bytes.len() > 4 { line[4..].to_string() } else { String::new() };
        Ok(Response { code, separator, tail })
    }

    /// `is_last_line ≡ separator is space or absent`.
    pub fn is_last_line(&self) -> bool {
        matches!(self.separator, Separator::Space | Separator::None)
    }

    /// `is_continuation ≡ code ∈ {334, 354}`.
    pub fn is_continuation(&self) -> bool {
        self.code == CHALLENGE || self.code == START_MSG_INPUT
    }

    pub fn reply_class(&self) -> ReplyClass {
        ReplyClass::from_first_digit((self.code / 100) as u8 + b'0')
    }

    pub fn is_success(&self) -> bool {
        self.reply_class().is_success()
    }

    /// The message text (empty if this line carries only a bare separator marker).
    pub fn message(&self) -> &str {
        &self.tail
    }

    /// Render back to the exact wire form (without the trailing CRLF, which framing owns).
    pub fn to_wire_line(&self) -> String {
        match self.separator {
            Separator::None => format!("{:03}", self.code),
            Separator::Space => format!("{:03} {}", self.code, self.tail),
            Separator::Hyphen => format!("{:03}-{}", self.code, self.tail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_three_digit_line_is_last_line_with_empty_tail() {
        let r = Response::parse("250").unwrap();
        assert!(r.is_last_line());
        assert_eq!(r.tail, "");
        assert_eq!(r.code, 250);
    }

    #[test]
    fn hyphen_with_no_tail_is_not_last_line() {
        let r = Response::parse("250-").unwrap();
        assert!(!r.is_last_line());
        assert_eq!(r.tail, "");
    }

    #[test]
    fn space_separated_is_last_line() {
        let r = Response::parse("250 OK").unwrap();
        assert!(r.is_last_line());
        assert_eq!(r.tail, "OK");
    }

    #[test]
    fn hyphen_separated_is_continuation_line() {
        let r = Response::parse("250-SIZE 10485760").unwrap();
        assert!(!r.is_last_line());
        assert_eq!(r.tail, "SIZE 10485760");
    }

    #[test]
    fn rejects_too_short_line() {
        assert!(Response::parse("2").is_err());
        assert!(Response::parse("1x").is_err());
    }

    #[test]
    fn rejects_non_digit_code() {
        assert!(Response::parse("2x0 ok").is_err());
    }

    #[test]
    fn rejects_invalid_separator_byte() {
        assert!(Response::parse("220Xready").is_err());
    }

    #[test]
    fn continuation_codes_recognized() {
        assert!(Response::parse("334 VXNlcm5hbWU6").unwrap().is_continuation());
        assert!(Response::parse("354 Start input").unwrap().is_continuation());
        assert!(!Response::parse("250 OK").unwrap().is_continuation());
    }

    #[test]
    fn reply_class_from_first_digit() {
        assert!(Response::parse("250 OK").unwrap().reply_class().is_success());
        assert!(!Response::parse("550 no").unwrap().reply_class().is_success());
    }

    #[test]
    fn round_trips_to_wire_line() {
        for line in ["250", "250-SIZE 10485760", "250 OK", "334 VXNlcm5hbWU6"] {
            let r = Response::parse(line).unwrap();
            assert_eq!(r.to_wire_line(), line);
        }
    }
}
