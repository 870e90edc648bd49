//! Incremental RESP Frame Decoder
//!
//! This module splits an inbound byte stream into [`Frame`]s. TCP gives
//! no message boundaries, so the decoder is incremental:
//!
//! 1. Append incoming network data to a buffer
//! 2. Call `decode()` to attempt decoding one frame
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, close the connection
//!
//! ## Recognized start bytes
//!
//! At the outermost level only three prefixes are valid:
//!
//! - `*` — an array of bulk strings, interpreted as a command. The first
//!   element becomes the command name (upper-cased); the rest are
//!   argument byte strings.
//! - `+` — an inline simple-string line, split on whitespace and
//!   synthesized into a command. This is how a replica understands the
//!   primary's `+FULLRESYNC <id> 0` reply.
//! - `$` — a raw length-prefixed payload WITHOUT trailing CRLF,
//!   surfaced as an opaque snapshot blob. Whatever follows the payload
//!   is decoded as a new outermost frame.
//!
//! Any other start byte is a framing error and fatal to the connection.
//! Short reads are never errors: the decoder reports `Ok(None)` and the
//! caller keeps the buffered bytes for the next read.

use crate::protocol::types::{Command, Frame};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur while decoding RESP frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown start byte at the outermost level
    #[error("unsupported frame start byte: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format in a length line
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 where text is required (inline lines, command names)
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, empty command, wrong element type)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The payload exceeds the maximum allowed size
    #[error("bulk too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk payload (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// An incremental decoder for the RESP subset emberkv speaks.
///
/// # Example
///
/// ```
/// use emberkv::protocol::{Frame, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new();
/// let buf = b"*1\r\n$4\r\nPING\r\n";
///
/// let (frame, consumed) = decoder.decode(buf).unwrap().unwrap();
/// assert_eq!(consumed, buf.len());
/// assert!(matches!(frame, Frame::Command(cmd) if cmd.name == "PING"));
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Creates a new decoder instance.
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((frame, consumed)))` - Successfully decoded a frame
    /// - `Ok(None)` - Incomplete data, need more bytes
    /// - `Err(e)` - Framing error, fatal to the connection
    pub fn decode(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            b'*' => self.decode_command(buf),
            b'+' => self.decode_inline(buf),
            b'$' => self.decode_snapshot(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Decodes a command array: `*<n>\r\n` followed by n bulk strings.
    fn decode_command(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        debug_assert!(buf[0] == b'*');

        let (count, mut consumed) = match read_length_line(buf)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        if count == 0 {
            return Err(ParseError::Protocol("empty command array".to_string()));
        }

        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match self.decode_bulk(&buf[consumed..])? {
                Some((data, used)) => {
                    elements.push(data);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        let args = elements.split_off(1);
        let name = std::str::from_utf8(&elements[0])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        Ok(Some((Frame::Command(Command::new(name, args)), consumed)))
    }

    /// Decodes a bulk string element: `$<len>\r\n<data>\r\n`.
    fn decode_bulk(&mut self, buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] != b'$' {
            return Err(ParseError::Protocol(format!(
                "expected bulk string element, got start byte {:#04x}",
                buf[0]
            )));
        }

        let (length, data_start) = match read_length_line(buf)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        let length = check_bulk_size(length as usize)?;

        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[data_start + length..total_needed] != b"\r\n" {
            return Err(ParseError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((data, total_needed)))
    }

    /// Decodes an inline simple-string line: `+<text>\r\n`.
    ///
    /// The line is split on whitespace and synthesized into a command so
    /// that replies such as `+FULLRESYNC <id> 0` flow through the same
    /// execution path as array-framed commands.
    fn decode_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        debug_assert!(buf[0] == b'+');

        let line_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let line = std::str::from_utf8(&buf[1..1 + line_end])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| ParseError::Protocol("empty inline line".to_string()))?;
        let args = tokens
            .map(|t| Bytes::copy_from_slice(t.as_bytes()))
            .collect();

        let consumed = 1 + line_end + 2;
        Ok(Some((Frame::Command(Command::new(name, args)), consumed)))
    }

    /// Decodes a snapshot payload: `$<len>\r\n<payload>` with NO
    /// trailing CRLF. The receiver reads exactly `len` bytes; any bytes
    /// after that belong to the next frame.
    fn decode_snapshot(&mut self, buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
        debug_assert!(buf[0] == b'$');

        let (length, data_start) = match read_length_line(buf)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        let length = check_bulk_size(length as usize)?;

        let total_needed = data_start + length;
        if buf.len() < total_needed {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&buf[data_start..total_needed]);
        Ok(Some((Frame::Snapshot(data), total_needed)))
    }
}

/// Reads a `<prefix><decimal>\r\n` header line.
///
/// Returns `(value, bytes_consumed_through_crlf)`, or `None` when the
/// CRLF has not arrived yet.
fn read_length_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let line_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let text = std::str::from_utf8(&buf[1..1 + line_end])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    let value: i64 = text
        .parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;

    Ok(Some((value, 1 + line_end + 2)))
}

fn check_bulk_size(size: usize) -> ParseResult<usize> {
    if size > MAX_BULK_SIZE {
        return Err(ParseError::BulkTooLarge {
            size,
            max: MAX_BULK_SIZE,
        });
    }
    Ok(size)
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some(i);
        }
    }
    None
}

/// Decodes a single frame from bytes.
///
/// This is a convenience function for simple use cases and tests.
pub fn decode_frame(buf: &[u8]) -> ParseResult<Option<(Frame, usize)>> {
    FrameDecoder::new().decode(buf)
}
