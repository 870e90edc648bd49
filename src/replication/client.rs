//! Replica-Side Handshake with the Primary
//!
//! On startup a replica dials its primary and performs a fixed sequence,
//! validating each reply:
//!
//! ```text
//! 1. PING                              -> +PONG
//! 2. REPLCONF listening-port <port>    -> +OK
//! 3. REPLCONF capa psync2              -> +OK
//! 4. PSYNC ? -1                        -> +FULLRESYNC <id> <offset>
//!                                         then the snapshot bulk
//! ```
//!
//! Replies are decoded with the same [`FrameDecoder`] the server side
//! uses: inline `+` lines surface as synthetic commands, so `+PONG`
//! decodes as a `PONG` command and `+FULLRESYNC <id> 0` as a
//! `FULLRESYNC` command with two arguments.
//!
//! Any step failing is fatal to the process. After step 4 the stream,
//! together with any bytes already buffered past the FULLRESYNC reply
//! (typically the snapshot), is handed to a background session that
//! applies replicated writes silently.

use crate::config::PrimaryAddr;
use crate::protocol::{Command, Frame, FrameDecoder, ParseError, RespValue};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Errors that can occur during the replica handshake.
///
/// All of them are fatal to startup.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Network failure while dialing or talking to the primary
    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),

    /// The primary sent bytes the decoder rejects
    #[error("protocol error during handshake: {0}")]
    Protocol(#[from] ParseError),

    /// The primary closed the connection mid-handshake
    #[error("primary closed the connection during handshake")]
    ConnectionClosed,

    /// A step got a well-formed but wrong reply
    #[error("unexpected reply to {step}: expected {expected}, got {got}")]
    UnexpectedReply {
        step: &'static str,
        expected: &'static str,
        got: String,
    },
}

/// What the primary reported in its FULLRESYNC reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimarySync {
    /// The primary's 40-character replication identifier
    pub repl_id: String,
    /// The primary's reported replication offset
    pub offset: i64,
}

/// Records the most recent FULLRESYNC the primary announced.
///
/// Shared between the handshake and the command engine (the engine also
/// accepts FULLRESYNC as a command, in case the reply arrives through
/// the inbound session loop instead of the handshake reader).
#[derive(Debug, Default)]
pub struct PrimaryLinkState {
    inner: Mutex<Option<PrimarySync>>,
}

impl PrimaryLinkState {
    /// Records the primary's announced replication id and offset.
    pub fn record(&self, sync: PrimarySync) {
        *self.inner.lock().unwrap() = Some(sync);
    }

    /// The most recently recorded sync, if any.
    pub fn last_sync(&self) -> Option<PrimarySync> {
        self.inner.lock().unwrap().clone()
    }
}

/// The established link to the primary, ready to hand to the inbound
/// session loop.
#[derive(Debug)]
pub struct ReplicaLink {
    /// The handshaken connection to the primary
    pub stream: TcpStream,
    /// Bytes received past the FULLRESYNC reply (snapshot and beyond)
    pub buffered: BytesMut,
    /// What the primary reported in FULLRESYNC
    pub sync: PrimarySync,
}

/// Dials the primary and runs the four-step handshake.
///
/// `listening_port` is this replica's own listen port, reported via
/// REPLCONF.
pub async fn establish(
    primary: &PrimaryAddr,
    listening_port: u16,
) -> Result<ReplicaLink, HandshakeError> {
    let address = primary.address();
    info!(primary = %address, "Connecting to primary for handshake");

    let mut stream = TcpStream::connect(&address).await?;
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::with_capacity(4096);

    send_command(&mut stream, &["PING"]).await?;
    expect_simple(&mut stream, &mut decoder, &mut buf, "PING", "PONG").await?;

    let port = listening_port.to_string();
    send_command(&mut stream, &["REPLCONF", "listening-port", &port]).await?;
    expect_simple(&mut stream, &mut decoder, &mut buf, "REPLCONF listening-port", "OK").await?;

    send_command(&mut stream, &["REPLCONF", "capa", "psync2"]).await?;
    expect_simple(&mut stream, &mut decoder, &mut buf, "REPLCONF capa", "OK").await?;

    send_command(&mut stream, &["PSYNC", "?", "-1"]).await?;
    let sync = expect_fullresync(&mut stream, &mut decoder, &mut buf).await?;

    info!(
        primary = %address,
        repl_id = %sync.repl_id,
        offset = sync.offset,
        "Handshake complete"
    );

    Ok(ReplicaLink {
        stream,
        buffered: buf,
        sync,
    })
}

/// Writes one command to the primary as a RESP array of bulk strings.
async fn send_command(stream: &mut TcpStream, parts: &[&str]) -> Result<(), HandshakeError> {
    let frame = RespValue::Array(
        parts
            .iter()
            .map(|p| RespValue::BulkString(Bytes::copy_from_slice(p.as_bytes())))
            .collect(),
    );
    debug!(command = parts[0], "Sending handshake command");
    stream.write_all(&frame.serialize()).await?;
    Ok(())
}

/// Reads frames until one complete frame is available.
async fn next_frame(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
    buf: &mut BytesMut,
) -> Result<Frame, HandshakeError> {
    loop {
        if let Some((frame, consumed)) = decoder.decode(buf)? {
            buf.advance(consumed);
            return Ok(frame);
        }

        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
    }
}

/// Expects a bare simple-string reply (`+PONG` / `+OK`).
async fn expect_simple(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
    buf: &mut BytesMut,
    step: &'static str,
    expected: &'static str,
) -> Result<(), HandshakeError> {
    match next_frame(stream, decoder, buf).await? {
        Frame::Command(cmd) if cmd.name == expected && cmd.args.is_empty() => Ok(()),
        other => Err(HandshakeError::UnexpectedReply {
            step,
            expected,
            got: describe_frame(&other),
        }),
    }
}

/// Expects the `+FULLRESYNC <id> <offset>` reply to PSYNC.
async fn expect_fullresync(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
    buf: &mut BytesMut,
) -> Result<PrimarySync, HandshakeError> {
    let frame = next_frame(stream, decoder, buf).await?;
    match &frame {
        Frame::Command(cmd) if cmd.name == "FULLRESYNC" && cmd.args.len() == 2 => {
            let sync = parse_fullresync(cmd);
            sync.ok_or_else(|| HandshakeError::UnexpectedReply {
                step: "PSYNC",
                expected: "FULLRESYNC <id> <offset>",
                got: describe_frame(&frame),
            })
        }
        _ => Err(HandshakeError::UnexpectedReply {
            step: "PSYNC",
            expected: "FULLRESYNC <id> <offset>",
            got: describe_frame(&frame),
        }),
    }
}

/// Parses the FULLRESYNC arguments into a [`PrimarySync`].
pub fn parse_fullresync(cmd: &Command) -> Option<PrimarySync> {
    if cmd.args.len() != 2 {
        return None;
    }
    let repl_id = std::str::from_utf8(&cmd.args[0]).ok()?.to_string();
    let offset = std::str::from_utf8(&cmd.args[1]).ok()?.parse().ok()?;
    Some(PrimarySync { repl_id, offset })
}

fn describe_frame(frame: &Frame) -> String {
    match frame {
        Frame::Command(cmd) => cmd.to_string(),
        Frame::Snapshot(data) => format!("<snapshot of {} bytes>", data.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A scripted primary: answers each inbound read with the next
    /// canned reply.
    async fn scripted_primary(replies: Vec<&'static [u8]>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            for reply in replies {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                stream.write_all(reply).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_handshake_succeeds_against_scripted_primary() {
        let addr = scripted_primary(vec![
            b"+PONG\r\n",
            b"+OK\r\n",
            b"+OK\r\n",
            b"+FULLRESYNC deadbeef 0\r\n$5\r\nhello",
        ])
        .await;

        let primary = PrimaryAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let link = establish(&primary, 6380).await.unwrap();

        assert_eq!(link.sync.repl_id, "deadbeef");
        assert_eq!(link.sync.offset, 0);
        // The snapshot bytes stay buffered for the inbound session.
        assert_eq!(&link.buffered[..], b"$5\r\nhello");
    }

    #[tokio::test]
    async fn test_handshake_fails_on_wrong_ping_reply() {
        let addr = scripted_primary(vec![b"+NOPE\r\n"]).await;

        let primary = PrimaryAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let err = establish(&primary, 6380).await.unwrap_err();

        assert!(matches!(
            err,
            HandshakeError::UnexpectedReply { step: "PING", .. }
        ));
    }

    #[tokio::test]
    async fn test_handshake_fails_when_primary_closes() {
        let addr = scripted_primary(vec![]).await;

        let primary = PrimaryAddr {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let err = establish(&primary, 6380).await.unwrap_err();

        assert!(matches!(
            err,
            HandshakeError::ConnectionClosed | HandshakeError::Io(_)
        ));
    }

    #[test]
    fn test_parse_fullresync_arguments() {
        let cmd = Command::new(
            "FULLRESYNC",
            vec![Bytes::from("abc123"), Bytes::from("42")],
        );
        let sync = parse_fullresync(&cmd).unwrap();
        assert_eq!(sync.repl_id, "abc123");
        assert_eq!(sync.offset, 42);

        let bad = Command::new("FULLRESYNC", vec![Bytes::from("abc123"), Bytes::from("x")]);
        assert!(parse_fullresync(&bad).is_none());
    }

    #[test]
    fn test_primary_link_state_records_latest() {
        let state = PrimaryLinkState::default();
        assert!(state.last_sync().is_none());

        state.record(PrimarySync {
            repl_id: "one".to_string(),
            offset: 0,
        });
        state.record(PrimarySync {
            repl_id: "two".to_string(),
            offset: 0,
        });
        assert_eq!(state.last_sync().unwrap().repl_id, "two");
    }
}
