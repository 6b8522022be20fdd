// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHIORI/3.0 response messages.

use std::collections::HashMap;
use std::fmt;

use super::PROTOCOL;

/// A SHIORI response: status text and a single `Value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShioriResponse {
    /// Status code and reason, e.g. `"200 OK"`.
    pub status: String,
    pub value: String,
    /// Headers other than `Value`, as received. Not emitted by [`ShioriResponse::build`].
    pub headers: HashMap<String, String>,
}

impl Default for ShioriResponse {
    fn default() -> Self {
        Self {
            status: "200 OK".to_owned(),
            value: String::new(),
            headers: HashMap::new(),
        }
    }
}

impl ShioriResponse {
    pub fn ok(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_status(status: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            value: value.into(),
            headers: HashMap::new(),
        }
    }

    /// Numeric part of the status, if it has one.
    pub fn status_code(&self) -> Option<u16> {
        self.status.split_whitespace().next()?.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status_code(), Some(200..=299))
    }

    /// Serialise as status line, `Charset`, `Content-Type`, `Value`, blank line.
    ///
    /// The value is written verbatim; callers must keep CR/LF out of it.
    pub fn build(&self) -> String {
        format!(
            "{PROTOCOL} {}\r\nCharset: UTF-8\r\nContent-Type: text/plain\r\nValue: {}\r\n\r\n",
            self.status, self.value
        )
    }

    /// Parse a module's answer. Returns `None` when there is no
    /// `SHIORI/x.y <status>` line; headers follow the request parser's rules.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let status_line = lines.by_ref().find(|l| !l.trim().is_empty())?;
        let (protocol, status) = status_line.trim().split_once(' ')?;
        if !protocol.starts_with("SHIORI/") {
            return None;
        }

        let mut response = Self::with_status(status.trim(), "");
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let Some(colon) = line.find(':') else {
                continue;
            };
            if colon == 0 {
                continue;
            }
            let key = line[..colon].trim();
            let value = line[colon + 1..].trim();
            if key == "Value" {
                response.value = value.to_owned();
            } else {
                response.headers.insert(key.to_owned(), value.to_owned());
            }
        }
        Some(response)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Option<Self> {
        Self::parse(&String::from_utf8_lossy(bytes))
    }
}

impl fmt::Display for ShioriResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}

/// Reason phrase for the status codes SHIORI modules use.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        204 => "No Content",
        310 => "Communicate",
        311 => "Not Enough",
        312 => "Advice",
        400 => "Bad Request",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_exact() {
        let text = ShioriResponse::ok("hello").build();
        assert_eq!(
            text,
            "SHIORI/3.0 200 OK\r\nCharset: UTF-8\r\nContent-Type: text/plain\r\nValue: hello\r\n\r\n"
        );
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(
            lines,
            vec![
                "SHIORI/3.0 200 OK",
                "Charset: UTF-8",
                "Content-Type: text/plain",
                "Value: hello",
                "",
                "",
            ]
        );
    }

    #[test]
    fn empty_value_still_emits_value_line() {
        let text = ShioriResponse::default().build();
        assert!(text.contains("\r\nValue: \r\n\r\n"));
    }

    #[test]
    fn parse_module_answer() {
        let res = ShioriResponse::parse("SHIORI/3.0 200 OK\r\nCharset: UTF-8\r\nValue: hi\r\n\r\n")
            .expect("parse");
        assert_eq!(res.status, "200 OK");
        assert_eq!(res.status_code(), Some(200));
        assert_eq!(res.value, "hi");
        assert_eq!(res.headers.get("Charset").map(String::as_str), Some("UTF-8"));
        assert!(res.is_success());
    }

    #[test]
    fn parse_no_content_without_value() {
        let res = ShioriResponse::parse("SHIORI/3.0 204 No Content\r\n\r\n").expect("parse");
        assert_eq!(res.status_code(), Some(204));
        assert_eq!(res.value, "");
    }

    #[test]
    fn parse_rejects_missing_status_line() {
        assert!(ShioriResponse::parse("").is_none());
        assert!(ShioriResponse::parse("HTTP/1.1 200 OK\r\n\r\n").is_none());
        assert!(ShioriResponse::parse("garbage").is_none());
    }

    #[test]
    fn value_with_sakura_script_survives() {
        let res = ShioriResponse::parse("SHIORI/3.0 200 OK\r\nValue: \\h\\s0Hello: there\\e\r\n\r\n")
            .expect("parse");
        assert_eq!(res.value, "\\h\\s0Hello: there\\e");
    }
}
