//! Server Configuration
//!
//! The role split is decided entirely by configuration: a process given
//! `--replicaof "<host> <port>"` runs as a replica of that primary,
//! otherwise it runs as a primary. The role is fixed for the process
//! lifetime.

use thiserror::Error;

/// The default port emberkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Errors produced while building a [`ServerConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// --replicaof value not in "<host> <port>" form
    #[error("invalid replicaof address: {0}")]
    InvalidReplicaOf(String),
}

/// The process role, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Serves clients and fans writes out to attached replicas.
    Primary,
    /// Dials a primary at startup and applies its write stream.
    Replica,
}

impl Role {
    /// The role name as reported by INFO (the wire format keeps the
    /// historical master/slave vocabulary).
    pub fn as_info_str(&self) -> &'static str {
        match self {
            Role::Primary => "master",
            Role::Replica => "slave",
        }
    }
}

/// Address of the primary a replica dials at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryAddr {
    pub host: String,
    pub port: u16,
}

impl PrimaryAddr {
    /// Parses the `--replicaof` value: host and port separated by a
    /// single space.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let mut parts = value.split(' ');
        let host = parts.next().filter(|h| !h.is_empty());
        let port = parts.next();

        match (host, port, parts.next()) {
            (Some(host), Some(port), None) => {
                let port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| ConfigError::InvalidReplicaOf(value.to_string()))?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            _ => Err(ConfigError::InvalidReplicaOf(value.to_string())),
        }
    }

    /// The dialable `host:port` address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Process-wide configuration supplied by the CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,
    /// When present, run as a replica of this primary
    pub replica_of: Option<PrimaryAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            replica_of: None,
        }
    }
}

impl ServerConfig {
    /// The role this configuration implies.
    pub fn role(&self) -> Role {
        if self.replica_of.is_some() {
            Role::Replica
        } else {
            Role::Primary
        }
    }

    /// The listen address.
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replicaof() {
        let addr = PrimaryAddr::parse("localhost 6379").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 6379);
        assert_eq!(addr.address(), "localhost:6379");
    }

    #[test]
    fn test_parse_replicaof_rejects_bad_forms() {
        assert!(PrimaryAddr::parse("localhost").is_err());
        assert!(PrimaryAddr::parse("localhost 6379 extra").is_err());
        assert!(PrimaryAddr::parse("localhost abc").is_err());
        assert!(PrimaryAddr::parse("localhost 0").is_err());
        assert!(PrimaryAddr::parse(" 6379").is_err());
        assert!(PrimaryAddr::parse("").is_err());
    }

    #[test]
    fn test_role_from_config() {
        let primary = ServerConfig::default();
        assert_eq!(primary.role(), Role::Primary);

        let replica = ServerConfig {
            port: 6380,
            replica_of: Some(PrimaryAddr::parse("127.0.0.1 6379").unwrap()),
        };
        assert_eq!(replica.role(), Role::Replica);
    }

    #[test]
    fn test_role_info_names() {
        assert_eq!(Role::Primary.as_info_str(), "master");
        assert_eq!(Role::Replica.as_info_str(), "slave");
    }
}
