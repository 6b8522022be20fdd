// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Newline-delimited JSON framing for the helper process channel.
//
// One frame = one JSON value + b'\n'. serde_json never emits a raw newline
// inside a compact value, so the terminator is unambiguous.

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

pub const TERMINATOR: u8 = b'\n';

/// Encode `value` as one line and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value).map_err(|e| Error::transport(format!("encode frame: {e}")))?;
    line.push(TERMINATOR);
    writer
        .write_all(&line)
        .and_then(|()| writer.flush())
        .map_err(|e| Error::transport(format!("write frame: {e}")))
}

/// Read the bytes of one frame, without the terminator.
///
/// `Ok(None)` means the stream ended cleanly between frames. Bytes followed
/// by end of stream are a cut-off frame and fail the transport.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let n = reader
        .read_until(TERMINATOR, &mut buf)
        .map_err(|e| Error::transport(format!("read frame: {e}")))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&TERMINATOR) {
        return Err(Error::transport(format!(
            "stream closed inside a frame ({} bytes without terminator)",
            buf.len()
        )));
    }
    buf.pop();
    Ok(Some(buf))
}

/// Read and decode one frame.
pub fn read_frame<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    match read_line(reader)? {
        None => Ok(None),
        Some(line) => decode(&line).map(Some),
    }
}

/// Decode a frame body read with [`read_line`].
pub fn decode<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    serde_json::from_slice(line).map_err(|e| Error::transport(format!("malformed frame: {e}")))
}
