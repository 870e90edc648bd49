//! RESP Protocol Implementation
//!
//! This module implements the subset of the Redis Serialization Protocol
//! (RESP) that emberkv speaks, on both the client-facing and the
//! replication side of a connection.
//!
//! ## Overview
//!
//! RESP is a simple, binary-safe protocol. Clients send commands as
//! arrays of bulk strings; the server replies with simple strings,
//! errors, integers, bulk strings, or null bulks. Replication reuses the
//! same framing plus two extras: inline `+` lines (the FULLRESYNC reply)
//! and a length-prefixed snapshot payload without trailing CRLF.
//!
//! ## Modules
//!
//! - `types`: `RespValue`, `Command`, `Frame` and serialization
//! - `parser`: incremental `FrameDecoder` for the inbound byte stream
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{decode_frame, Frame, RespValue};
//! use bytes::Bytes;
//!
//! // Decoding incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (frame, consumed) = decode_frame(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert!(matches!(frame, Frame::Command(_)));
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("value"));
//! assert_eq!(response.serialize(), b"$5\r\nvalue\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{decode_frame, FrameDecoder, ParseError, ParseResult, MAX_BULK_SIZE};
pub use types::{Command, Frame, RespValue, CRLF};
