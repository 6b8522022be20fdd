// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHIORI/3.0 wire protocol: line-oriented text, CRLF on the wire, LF accepted.

pub mod request;
pub mod response;

use std::io::{self, BufRead};

pub use request::ShioriRequest;
pub use response::{reason_phrase, ShioriResponse};

/// Protocol token used on request and status lines.
pub const PROTOCOL: &str = "SHIORI/3.0";

/// `Sender` header value on requests built by this crate.
pub const DEFAULT_SENDER: &str = "libshiori";

/// Read one message (start line, headers, blank terminator) from `reader`.
///
/// Blank lines before the start line are skipped. Returns `Ok(None)` at a
/// clean end of stream; a message cut off by end of stream is returned as
/// read. Line endings are normalised to CRLF.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut message = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(if message.is_empty() { None } else { Some(message) });
        }
        let content = line.trim_end_matches(['\r', '\n']);
        if content.is_empty() {
            if message.is_empty() {
                continue;
            }
            message.push_str("\r\n");
            return Ok(Some(message));
        }
        message.push_str(content);
        message.push_str("\r\n");
    }
}
