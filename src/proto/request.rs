// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SHIORI/3.0 request messages: tolerant parsing and canonical encoding.

use std::collections::HashMap;
use std::fmt::Write as _;

use super::PROTOCOL;

/// A SHIORI request: request line plus `Key: Value` headers.
///
/// Parsing never fails. Malformed input degrades to a partial message; a
/// request whose `id` is `None` is unroutable and should be answered with
/// an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShioriRequest {
    /// First token of the request line (`GET`, `NOTIFY`).
    pub method: Option<String>,
    /// Event or resource name. An `ID` header overrides the request line.
    pub id: Option<String>,
    /// Protocol token from the request line (`SHIORI/3.0`).
    pub version: Option<String>,
    /// Header map; keys are case-sensitive and the last occurrence wins.
    pub headers: HashMap<String, String>,
}

impl ShioriRequest {
    /// Parse a request. CRLF and LF line endings are both accepted.
    ///
    /// Blank lines before the request line are skipped; the first blank
    /// line after it ends the header block. Header lines without a colon,
    /// or starting with one, are ignored.
    pub fn parse(text: &str) -> Self {
        let mut req = Self::default();
        let mut lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let Some(request_line) = lines.by_ref().find(|l| !l.trim().is_empty()) else {
            return req;
        };
        let mut tokens = request_line.split_whitespace();
        req.method = tokens.next().map(str::to_owned);
        for token in tokens {
            if token.starts_with("SHIORI/") {
                req.version = Some(token.to_owned());
            } else if req.id.is_none() && req.version.is_none() {
                req.id = Some(token.to_owned());
            }
        }

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
            if key == "ID" {
                req.id = Some(value.to_owned());
            }
            req.headers.insert(key.to_owned(), value.to_owned());
        }
        req
    }

    /// Parse raw bytes, replacing invalid UTF-8.
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn is_routable(&self) -> bool {
        self.id.is_some()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Header `Reference{index}`.
    pub fn reference(&self, index: usize) -> Option<&str> {
        self.header(&format!("Reference{index}"))
    }

    /// `Reference0`, `Reference1`, … up to the first gap.
    pub fn references(&self) -> Vec<String> {
        (0..)
            .map_while(|i| self.reference(i).map(str::to_owned))
            .collect()
    }

    // -- building ----------------------------------------------------------

    /// A `GET` request for `id` with `Charset: UTF-8` and `Sender` set.
    pub fn get(id: &str) -> Self {
        Self::with_method("GET", id)
    }

    /// A `NOTIFY` request for `id`; modules answer it without a value.
    pub fn notify(id: &str) -> Self {
        Self::with_method("NOTIFY", id)
    }

    fn with_method(method: &str, id: &str) -> Self {
        let mut req = Self {
            method: Some(method.to_owned()),
            id: Some(id.to_owned()),
            version: Some(PROTOCOL.to_owned()),
            headers: HashMap::new(),
        };
        req.headers.insert("Charset".to_owned(), "UTF-8".to_owned());
        req.headers.insert("Sender".to_owned(), super::DEFAULT_SENDER.to_owned());
        req.headers.insert("ID".to_owned(), id.to_owned());
        req
    }

    pub fn header_value(mut self, key: &str, value: &str) -> Self {
        if key == "ID" {
            self.id = Some(value.to_owned());
        }
        self.headers.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn sender(self, sender: &str) -> Self {
        self.header_value("Sender", sender)
    }

    /// Set `Reference0..N` from `refs`, in order.
    pub fn references_from<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (i, r) in refs.into_iter().enumerate() {
            self.headers.insert(format!("Reference{i}"), r.as_ref().to_owned());
        }
        self
    }

    /// Wire form: `METHOD SHIORI/3.0`, headers, blank line, all CRLF.
    ///
    /// Header order is fixed: `Charset`, `Sender`, `ID`, references by
    /// index, then the rest by name.
    pub fn encode(&self) -> String {
        let method = self.method.as_deref().unwrap_or("GET");
        let version = self.version.as_deref().unwrap_or(PROTOCOL);
        let mut out = format!("{method} {version}\r\n");

        let mut headers = self.headers.clone();
        if let Some(id) = &self.id {
            headers.insert("ID".to_owned(), id.clone());
        }
        for key in ["Charset", "Sender", "ID"] {
            if let Some(value) = headers.remove(key) {
                let _ = write!(out, "{key}: {value}\r\n");
            }
        }
        let mut refs: Vec<(usize, String)> = Vec::new();
        let mut rest: Vec<(String, String)> = Vec::new();
        for (key, value) in headers {
            match key.strip_prefix("Reference").and_then(|n| n.parse::<usize>().ok()) {
                Some(index) => refs.push((index, value)),
                None => rest.push((key, value)),
            }
        }
        refs.sort_by_key(|(index, _)| *index);
        rest.sort();
        for (index, value) in refs {
            let _ = write!(out, "Reference{index}: {value}\r\n");
        }
        for (key, value) in rest {
            let _ = write!(out, "{key}: {value}\r\n");
        }
        out.push_str("\r\n");
        out
    }
}
