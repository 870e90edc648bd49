//! Command Engine
//!
//! This module executes decoded commands against the store and decides
//! everything else that must happen around them: whether a response is
//! written at all, whether a propagation frame fans out to attached
//! replicas, and whether the delivering connection must be reclassified
//! as a replica sink.
//!
//! ## Supported Commands
//!
//! - `PING` - liveness probe
//! - `ECHO message` - echo back a message
//! - `SET key value [PX milliseconds]` - set a key, optional expiry
//! - `GET key` - get a key's value
//! - `DEL key [key ...]` - delete keys, returns how many existed
//! - `INFO [replication]` - replication role and identifiers
//! - `REPLCONF ...` - replica capability exchange during handshake
//! - `PSYNC ? -1` - full resync request from a replica
//! - `FULLRESYNC id offset` - synthesized from the primary's reply line
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │   Command ──▶ dispatch() ──▶ cmd_*() ──▶ Execution          │
//! │                                 │                           │
//! │                                 ▼                           │
//! │                              KvStore                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`Execution`] outcome keeps the engine free of any socket
//! handling: the connection session interprets it (write response, send
//! the snapshot, broadcast the propagation frame, hand the socket to the
//! replica registry).
//!
//! ## Session origin
//!
//! Commands carry their origin: a regular client, or the inbound
//! connection from the primary on a replica. The latter NEVER gets a
//! reply; anything written there would corrupt the primary's outbound
//! stream. Errors on that path are logged and discarded.

use crate::config::Role;
use crate::protocol::{Command, RespValue};
use crate::replication::{parse_fullresync, PrimaryLinkState};
use crate::storage::KvStore;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The canonical empty-database snapshot a primary transmits right after
/// its FULLRESYNC reply: a fixed 88-byte image of an empty database,
/// framed as a bulk string without trailing CRLF.
pub const EMPTY_SNAPSHOT: &[u8] =
    b"REDIS0011\xfa\x09redis-ver\x057.2.0\xfa\x0aredis-bits\xc0\x40\
      \xfa\x05ctime\xc2\x6d\x08\xbc\x65\xfa\x08used-mem\xc2\xb0\xc4\x10\x00\
      \xfa\x08aof-base\xc0\x00\xff\xf0\x6e\x3b\xfe\xc0\xff\x5a\xa2";

/// How the engine classifies the session that delivered a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// A regular client connection.
    Client,
    /// A replica's inbound connection from its primary. Replies are
    /// suppressed on this path.
    ReplicaInbound,
}

/// Everything the session must do after the engine ran one command.
#[derive(Debug, Default)]
pub struct Execution {
    /// Reply to write to the peer, if any. `None` means suppressed.
    pub response: Option<RespValue>,
    /// A second payload written right after the response (the snapshot
    /// following a FULLRESYNC reply).
    pub follow_up: Option<RespValue>,
    /// The delivering connection must become a replica sink.
    pub attach_replica: bool,
    /// Propagation frame to broadcast to attached replicas.
    pub propagate: Option<RespValue>,
}

impl Execution {
    fn reply(response: RespValue) -> Self {
        Self {
            response: Some(response),
            ..Default::default()
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

/// Executes commands against the store.
///
/// Cheap to clone; one handle is shared across all connection tasks.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// The shared key-value store
    storage: Arc<KvStore>,
    /// Process role, fixed at startup
    role: Role,
    /// This primary's replication identifier (40 alphanumeric chars)
    repl_id: String,
    /// Latest FULLRESYNC announced by the primary (replica side)
    primary_link: Arc<PrimaryLinkState>,
}

impl CommandHandler {
    /// Creates a handler over `storage` with the given role and
    /// replication identifier.
    pub fn new(storage: Arc<KvStore>, role: Role, repl_id: impl Into<String>) -> Self {
        Self {
            storage,
            role,
            repl_id: repl_id.into(),
            primary_link: Arc::new(PrimaryLinkState::default()),
        }
    }

    /// Shares an externally owned primary-link state (replica side).
    pub fn with_primary_link(mut self, link: Arc<PrimaryLinkState>) -> Self {
        self.primary_link = link;
        self
    }

    /// The shared store this handler executes against.
    pub fn storage(&self) -> &Arc<KvStore> {
        &self.storage
    }

    /// Executes one command and returns what the session must do.
    ///
    /// Argument counts are validated before any side effect. On the
    /// inbound-from-primary path every reply is suppressed; errors there
    /// are logged and discarded.
    pub fn execute(&self, cmd: &Command, origin: SessionKind) -> Execution {
        let mut exec = self.dispatch(cmd);
        exec.propagate = self.propagation_frame(cmd, &exec);

        if origin == SessionKind::ReplicaInbound {
            if let Some(RespValue::Error(reason)) = &exec.response {
                warn!(
                    command = %cmd.name,
                    reason = %reason,
                    "Discarding error for replicated command"
                );
            }
            exec.response = None;
            exec.follow_up = None;
        }

        exec
    }

    fn dispatch(&self, cmd: &Command) -> Execution {
        match cmd.name.as_str() {
            "PING" => self.cmd_ping(cmd),
            "ECHO" => self.cmd_echo(cmd),
            "SET" => self.cmd_set(cmd),
            "GET" => self.cmd_get(cmd),
            "DEL" => self.cmd_del(cmd),
            "INFO" => self.cmd_info(cmd),
            "REPLCONF" => self.cmd_replconf(cmd),
            "PSYNC" => self.cmd_psync(cmd),
            "FULLRESYNC" => self.cmd_fullresync(cmd),
            _ => Execution::reply(RespValue::error(format!(
                "ERR Unknown command: {}",
                cmd.name
            ))),
        }
    }

    /// Write commands executed on a primary fan out to attached
    /// replicas, re-encoded as a RESP command array.
    ///
    /// [`Command::is_write`] decides which commands qualify; a command
    /// that was rejected never propagates.
    fn propagation_frame(&self, cmd: &Command, exec: &Execution) -> Option<RespValue> {
        let rejected = exec.response.as_ref().is_some_and(RespValue::is_error);
        (self.role == Role::Primary && cmd.is_write() && !rejected).then(|| cmd.to_frame())
    }

    /// PING
    fn cmd_ping(&self, cmd: &Command) -> Execution {
        if !cmd.args.is_empty() {
            return Execution::reply(wrong_args("PING"));
        }
        Execution::reply(RespValue::pong())
    }

    /// ECHO message
    fn cmd_echo(&self, cmd: &Command) -> Execution {
        if cmd.args.len() != 1 {
            return Execution::reply(wrong_args("ECHO"));
        }
        Execution::reply(RespValue::bulk_string(cmd.args[0].clone()))
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, cmd: &Command) -> Execution {
        let args = &cmd.args;
        if args.len() < 2 {
            return Execution::reply(wrong_args("SET"));
        }

        let ttl = match args.len() {
            2 => None,
            4 => {
                let option = match std::str::from_utf8(&args[2]) {
                    Ok(s) => s,
                    Err(_) => return Execution::reply(RespValue::error("ERR syntax error")),
                };
                if !option.eq_ignore_ascii_case("px") {
                    return Execution::reply(RespValue::error("ERR syntax error"));
                }
                let millis = std::str::from_utf8(&args[3])
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok());
                match millis {
                    Some(ms) => Some(Duration::from_millis(ms)),
                    None => {
                        return Execution::reply(RespValue::error(
                            "ERR invalid expire time in 'SET' command",
                        ))
                    }
                }
            }
            _ => return Execution::reply(RespValue::error("ERR syntax error")),
        };

        let key = args[0].clone();
        let value = args[1].clone();
        match ttl {
            Some(ttl) => self.storage.set_with_ttl(key, value, ttl),
            None => self.storage.set(key, value),
        }

        Execution::reply(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, cmd: &Command) -> Execution {
        if cmd.args.len() != 1 {
            return Execution::reply(wrong_args("GET"));
        }

        match self.storage.get(&cmd.args[0]) {
            Some(value) => Execution::reply(RespValue::bulk_string(value)),
            None => Execution::reply(RespValue::null()),
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&self, cmd: &Command) -> Execution {
        if cmd.args.is_empty() {
            return Execution::reply(wrong_args("DEL"));
        }

        let deleted = self.storage.delete_many(&cmd.args);
        Execution::reply(RespValue::integer(deleted as i64))
    }

    /// INFO [replication]
    fn cmd_info(&self, cmd: &Command) -> Execution {
        if cmd.args.len() > 1 {
            return Execution::reply(wrong_args("INFO"));
        }
        if let Some(section) = cmd.args.first() {
            let known = std::str::from_utf8(section)
                .map(|s| s.eq_ignore_ascii_case("replication"))
                .unwrap_or(false);
            if !known {
                return Execution::reply(RespValue::error("ERR unsupported INFO section"));
            }
        }

        let mut lines = vec![
            "#Replication".to_string(),
            format!("role:{}", self.role.as_info_str()),
        ];
        if self.role == Role::Primary {
            lines.push(format!("master_replid:{}", self.repl_id));
            lines.push("master_repl_offset:0".to_string());
        }

        Execution::reply(RespValue::bulk_string(Bytes::from(lines.join("\r\n"))))
    }

    /// REPLCONF listening-port <port> | REPLCONF capa psync2
    fn cmd_replconf(&self, cmd: &Command) -> Execution {
        if cmd.args.len() != 2 {
            return Execution::reply(wrong_args("REPLCONF"));
        }

        let subcommand = match std::str::from_utf8(&cmd.args[0]) {
            Ok(s) => s,
            Err(_) => {
                return Execution::reply(RespValue::error("ERR unsupported REPLCONF option"))
            }
        };

        if subcommand.eq_ignore_ascii_case("listening-port") {
            debug!(port = %String::from_utf8_lossy(&cmd.args[1]), "Replica announced listening port");
            return Execution::reply(RespValue::ok());
        }

        let capa_psync2 = subcommand.eq_ignore_ascii_case("capa")
            && std::str::from_utf8(&cmd.args[1])
                .map(|s| s.eq_ignore_ascii_case("psync2"))
                .unwrap_or(false);
        if capa_psync2 {
            return Execution::reply(RespValue::ok());
        }

        Execution::reply(RespValue::error("ERR unsupported REPLCONF option"))
    }

    /// PSYNC ? -1
    ///
    /// Replies FULLRESYNC with this primary's replication id, queues the
    /// snapshot as a follow-up payload, and asks the session to attach
    /// itself to the replica registry.
    fn cmd_psync(&self, cmd: &Command) -> Execution {
        if self.role != Role::Primary {
            return Execution::reply(RespValue::error("ERR PSYNC can only be served by a primary"));
        }
        if cmd.args.len() != 2 {
            return Execution::reply(wrong_args("PSYNC"));
        }
        if cmd.args[0].as_ref() != b"?" || cmd.args[1].as_ref() != b"-1" {
            return Execution::reply(RespValue::error(
                "ERR PSYNC only supports a full resync ('? -1')",
            ));
        }

        Execution {
            response: Some(RespValue::simple_string(format!(
                "FULLRESYNC {} 0",
                self.repl_id
            ))),
            follow_up: Some(RespValue::snapshot(Bytes::from_static(EMPTY_SNAPSHOT))),
            attach_replica: true,
            propagate: None,
        }
    }

    /// FULLRESYNC <repl-id> <offset>
    ///
    /// Synthesized by the decoder from the primary's inline reply.
    /// Records what the primary announced; otherwise a no-op.
    fn cmd_fullresync(&self, cmd: &Command) -> Execution {
        match parse_fullresync(cmd) {
            Some(sync) => {
                debug!(
                    repl_id = %sync.repl_id,
                    offset = sync.offset,
                    "Primary announced full resync"
                );
                self.primary_link.record(sync);
                Execution::silent()
            }
            None => Execution::reply(RespValue::error("ERR invalid FULLRESYNC arguments")),
        }
    }
}

fn wrong_args(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}
