//! Connection Session Handler
//!
//! Each TCP connection is driven by its own session task running the
//! loop below. On a primary every accepted connection starts as a
//! client session; completing PSYNC reclassifies it as an attached
//! replica. On a replica, the outbound connection to the primary runs
//! the same loop in inbound-from-primary mode for its whole life.
//!
//! ## Session state machine (primary side)
//!
//! ```text
//! START ──read──▶ CLIENT_ACTIVE ──PSYNC completes──▶ ATTACHED_REPLICA
//!                      │                                   │
//!                      │ decode → execute → reply          │ socket write half
//!                      │ per frame, in order               │ owned by the
//!                      ▼                                   ▼ replica registry
//!                EOF / error                       reads discarded until
//!                closes session                    the replica goes away
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream: a single read may carry half a command or several
//! pipelined ones. Received bytes accumulate in a `BytesMut` buffer;
//! every fully decoded frame is executed in order and its response
//! flushed before the next frame runs.

use crate::commands::{CommandHandler, SessionKind};
use crate::protocol::{Frame, FrameDecoder, ParseError, RespValue};
use crate::replication::{ReplicaLink, ReplicaRegistry, ReplicaSink};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// How a session's main loop came to an end besides an error.
enum SessionEnd {
    /// A PSYNC completed; the connection becomes a replica sink.
    Promoted,
}

/// Drives one TCP connection.
///
/// Owns the socket and the decode buffer exclusively; the store and the
/// replica registry are shared process-wide.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Peer address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Incremental RESP frame decoder
    decoder: FrameDecoder,

    /// The command engine (shared across connections)
    command_handler: CommandHandler,

    /// The attached-replica registry (shared)
    registry: Arc<ReplicaRegistry>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// How the engine should treat commands from this peer
    kind: SessionKind,
}

impl ConnectionHandler {
    /// Creates a session for an accepted client connection.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        command_handler: CommandHandler,
        registry: Arc<ReplicaRegistry>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            decoder: FrameDecoder::new(),
            command_handler,
            registry,
            stats,
            kind: SessionKind::Client,
        }
    }

    /// Creates the session a replica runs over its connection to the
    /// primary. Replies are suppressed for its whole lifetime.
    ///
    /// `buffered` carries bytes the handshake already read past the
    /// FULLRESYNC reply, typically the start of the snapshot.
    pub fn inbound_from_primary(
        stream: TcpStream,
        addr: SocketAddr,
        buffered: BytesMut,
        command_handler: CommandHandler,
        registry: Arc<ReplicaRegistry>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: buffered,
            decoder: FrameDecoder::new(),
            command_handler,
            registry,
            stats,
            kind: SessionKind::ReplicaInbound,
        }
    }

    /// Runs the session until the peer goes away, an error occurs, or a
    /// PSYNC promotes the connection into the replica registry.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(peer = %self.addr, kind = ?self.kind, "Session opened");

        match self.main_loop().await {
            Ok(SessionEnd::Promoted) => self.promote_to_replica_sink().await,
            Err(e) => {
                match &e {
                    ConnectionError::ClientDisconnected => {
                        debug!(peer = %self.addr, "Peer disconnected")
                    }
                    ConnectionError::IoError(io_err)
                        if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                    {
                        debug!(peer = %self.addr, "Connection reset by peer")
                    }
                    _ => warn!(peer = %self.addr, error = %e, "Session error"),
                }
                self.stats.connection_closed();
                Err(e)
            }
        }
    }

    /// The decode-execute-respond loop.
    async fn main_loop(&mut self) -> Result<SessionEnd, ConnectionError> {
        loop {
            while let Some(frame) = self.try_decode_frame()? {
                match frame {
                    Frame::Snapshot(payload) => {
                        debug!(
                            peer = %self.addr,
                            bytes = payload.len(),
                            "Received snapshot payload"
                        );
                    }
                    Frame::Command(cmd) => {
                        trace!(peer = %self.addr, command = %cmd, "Executing command");
                        let exec = self.command_handler.execute(&cmd, self.kind);
                        self.stats.command_processed();

                        if let Some(response) = &exec.response {
                            self.send_response(response).await?;
                        }
                        if let Some(follow_up) = &exec.follow_up {
                            self.send_response(follow_up).await?;
                        }
                        if let Some(frame) = &exec.propagate {
                            // The reply above is already on the wire; a
                            // failing sink never fails this command.
                            self.registry.broadcast(frame).await;
                        }
                        if exec.attach_replica {
                            return Ok(SessionEnd::Promoted);
                        }
                    }
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to decode one frame from the buffer.
    fn try_decode_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.decoder.decode(&self.buffer) {
            Ok(Some((frame, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    peer = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Decoded frame"
                );
                Ok(Some(frame))
            }
            Ok(None) => {
                trace!(
                    peer = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                // Framing errors are fatal; no reply is sent.
                warn!(peer = %self.addr, error = %e, "Framing error");
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            warn!(
                peer = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(peer = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the peer and flushes it.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(peer = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }

    /// Hands the socket over to the replica registry.
    ///
    /// The FULLRESYNC reply and the snapshot are already flushed at this
    /// point; a failure to attach is reported to the peer but does not
    /// retract them. The read half keeps draining so that a peer close
    /// is noticed and the sink detached.
    async fn promote_to_replica_sink(self) -> Result<(), ConnectionError> {
        let ConnectionHandler {
            stream,
            addr,
            registry,
            stats,
            ..
        } = self;
        let mut stream = stream.into_inner();

        let endpoint = match stream.peer_addr() {
            Ok(peer) => peer.to_string(),
            Err(e) => {
                warn!(peer = %addr, error = %e, "Cannot determine replica endpoint, rejecting attach");
                let reply = RespValue::error("ERR unable to determine replica endpoint");
                stream.write_all(&reply.serialize()).await?;
                stream.flush().await?;
                stats.connection_closed();
                return Ok(());
            }
        };

        let (mut read_half, write_half) = stream.into_split();
        registry.attach(ReplicaSink::new(endpoint.clone(), write_half));

        // Inbound traffic from an attached replica is not part of this
        // protocol subset; discard it until the connection goes away.
        let mut scratch = [0u8; 1024];
        loop {
            match read_half.read(&mut scratch).await {
                Ok(0) => break,
                Ok(n) => {
                    trace!(replica = %endpoint, bytes = n, "Discarding bytes from attached replica")
                }
                Err(e) => {
                    debug!(replica = %endpoint, error = %e, "Read from attached replica failed");
                    break;
                }
            }
        }

        registry.detach(&endpoint);
        stats.connection_closed();
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// RESP framing error
    #[error("Framing error: {0}")]
    ParseError(#[from] ParseError),

    /// Peer disconnected normally
    #[error("Peer disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial frame left in the buffer)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles one accepted client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    registry: Arc<ReplicaRegistry>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, command_handler, registry, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(peer = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

/// Runs the inbound-from-primary session over an established replica
/// link until the primary goes away.
pub async fn handle_primary_link(
    link: ReplicaLink,
    command_handler: CommandHandler,
    registry: Arc<ReplicaRegistry>,
    stats: Arc<ConnectionStats>,
) {
    let addr = link
        .stream
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));

    let handler = ConnectionHandler::inbound_from_primary(
        link.stream,
        addr,
        link.buffered,
        command_handler,
        registry,
        stats,
    );

    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {
                info!(primary = %addr, "Primary closed the replication stream")
            }
            _ => warn!(primary = %addr, error = %e, "Replication session ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;
    use crate::replication;
    use crate::storage::KvStore;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout, Duration};

    struct TestServer {
        addr: SocketAddr,
        storage: Arc<KvStore>,
        registry: Arc<ReplicaRegistry>,
        stats: Arc<ConnectionStats>,
    }

    /// Spawns a primary with repl-id "12" on a loopback port.
    async fn create_test_server() -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(KvStore::new());
        let registry = Arc::new(ReplicaRegistry::new());
        let stats = Arc::new(ConnectionStats::new());
        let command_handler = CommandHandler::new(Arc::clone(&storage), Role::Primary, "12");

        let accept_registry = Arc::clone(&registry);
        let accept_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    command_handler.clone(),
                    Arc::clone(&accept_registry),
                    Arc::clone(&accept_stats),
                ));
            }
        });

        TestServer {
            addr,
            storage,
            registry,
            stats,
        }
    }

    async fn read_exact_len(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let reply = read_exact_len(&mut client, 7).await;
        assert_eq!(&reply, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap();
        let reply = read_exact_len(&mut client, 5).await;
        assert_eq!(&reply, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n")
            .await
            .unwrap();
        let reply = read_exact_len(&mut client, 11).await;
        assert_eq!(&reply, b"$5\r\nvalue\r\n");
    }

    #[tokio::test]
    async fn test_get_missing_key_returns_null_bulk() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n")
            .await
            .unwrap();

        let reply = read_exact_len(&mut client, 5).await;
        assert_eq!(&reply, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_pipelined_commands_answered_in_order() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            )
            .await
            .unwrap();

        // +OK\r\n +OK\r\n $2\r\nv1\r\n $2\r\nv2\r\n
        let reply = read_exact_len(&mut client, 5 + 5 + 8 + 8).await;
        assert_eq!(&reply, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn test_unknown_command_reports_error() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client
            .write_all(b"*2\r\n$4\r\nGETX\r\n$3\r\nkey\r\n")
            .await
            .unwrap();

        let expected = b"-ERR Unknown command: GETX\r\n";
        let reply = read_exact_len(&mut client, expected.len()).await;
        assert_eq!(&reply, expected);
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection_without_reply() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        // ':' is not a valid outermost start byte.
        client.write_all(b":1000\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "expected close with no reply, got {:?}", &buf[..n]);
    }

    #[tokio::test]
    async fn test_command_split_across_reads() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
        sleep(Duration::from_millis(20)).await;
        client.write_all(b"NG\r\n").await.unwrap();

        let reply = read_exact_len(&mut client, 7).await;
        assert_eq!(&reply, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_psync_attaches_replica_and_streams_writes() {
        let server = create_test_server().await;
        let mut replica = TcpStream::connect(server.addr).await.unwrap();

        replica
            .write_all(b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n")
            .await
            .unwrap();

        // +FULLRESYNC 12 0\r\n
        let reply = read_exact_len(&mut replica, 18).await;
        assert_eq!(&reply, b"+FULLRESYNC 12 0\r\n");

        // $88\r\n followed by exactly 88 snapshot bytes, no trailing CRLF
        let header = read_exact_len(&mut replica, 5).await;
        assert_eq!(&header, b"$88\r\n");
        let snapshot = read_exact_len(&mut replica, 88).await;
        assert!(snapshot.starts_with(b"REDIS0011"));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(server.registry.len(), 1);

        // A write from another client now fans out to this connection.
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap();
        let reply = read_exact_len(&mut client, 5).await;
        assert_eq!(&reply, b"+OK\r\n");

        let propagated = read_exact_len(&mut replica, 33).await;
        assert_eq!(&propagated, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
    }

    #[tokio::test]
    async fn test_closed_replica_is_detached() {
        let server = create_test_server().await;

        let mut replica = TcpStream::connect(server.addr).await.unwrap();
        replica
            .write_all(b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n")
            .await
            .unwrap();
        let _ = read_exact_len(&mut replica, 18 + 5 + 88).await;

        sleep(Duration::from_millis(50)).await;
        assert_eq!(server.registry.len(), 1);

        drop(replica);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(server.registry.len(), 0);
    }

    #[tokio::test]
    async fn test_replica_inbound_session_applies_writes_silently() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut primary_side = TcpStream::connect(addr).await.unwrap();
        let (replica_side, peer) = listener.accept().await.unwrap();

        let storage = Arc::new(KvStore::new());
        let command_handler = CommandHandler::new(Arc::clone(&storage), Role::Replica, "");
        let session = ConnectionHandler::inbound_from_primary(
            replica_side,
            peer,
            BytesMut::new(),
            command_handler,
            Arc::new(ReplicaRegistry::new()),
            Arc::new(ConnectionStats::new()),
        );
        tokio::spawn(session.run());

        // Snapshot, then a replicated write.
        primary_side.write_all(b"$5\r\nhello").await.unwrap();
        primary_side
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap();

        sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.get(&Bytes::from("key")), Some(Bytes::from("value")));

        // Nothing came back on the wire.
        let mut buf = [0u8; 64];
        let read = timeout(Duration::from_millis(100), primary_side.read(&mut buf)).await;
        assert!(read.is_err(), "expected no reply bytes, got {:?}", read);
    }

    #[tokio::test]
    async fn test_replicated_set_becomes_visible_on_replica() {
        let server = create_test_server().await;

        // Bring up a replica of the test server.
        let primary_addr = crate::config::PrimaryAddr {
            host: server.addr.ip().to_string(),
            port: server.addr.port(),
        };
        let link = replication::establish(&primary_addr, 0).await.unwrap();

        let replica_storage = Arc::new(KvStore::new());
        let command_handler =
            CommandHandler::new(Arc::clone(&replica_storage), Role::Replica, "");
        tokio::spawn(handle_primary_link(
            link,
            command_handler,
            Arc::new(ReplicaRegistry::new()),
            Arc::new(ConnectionStats::new()),
        ));

        sleep(Duration::from_millis(50)).await;

        // Write on the primary...
        let mut client = TcpStream::connect(server.addr).await.unwrap();
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap();
        let reply = read_exact_len(&mut client, 5).await;
        assert_eq!(&reply, b"+OK\r\n");

        // ...becomes visible on the replica after a bounded wait.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(
            replica_storage.get(&Bytes::from("key")),
            Some(Bytes::from("value"))
        );
        assert_eq!(server.storage.get(&Bytes::from("key")), Some(Bytes::from("value")));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = create_test_server().await;

        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(server.addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            server.stats.connections_accepted.load(Ordering::Relaxed),
            1
        );
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let _ = read_exact_len(&mut client, 7).await;

        sleep(Duration::from_millis(50)).await;
        assert!(server.stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(server.stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(server.stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
