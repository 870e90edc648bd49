//! emberkv - A Replicating In-Memory Key-Value Store
//!
//! This is the main entry point for the emberkv server. It parses the
//! CLI, sets up logging, generates the replication identifier, performs
//! the replica handshake when configured with `--replicaof`, and runs
//! the accept loop.

use emberkv::config::{PrimaryAddr, ServerConfig};
use emberkv::connection::{handle_connection, handle_primary_link, ConnectionStats};
use emberkv::replication::{PrimaryLinkState, ReplicaRegistry};
use emberkv::storage::{start_expiry_sweeper, KvStore};
use emberkv::CommandHandler;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Parse configuration from command-line arguments.
fn parse_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().ok().filter(|p| *p >= 1).unwrap_or_else(|| {
                        eprintln!("Error: port must be between 1 and 65535");
                        std::process::exit(1);
                    });
                    i += 2;
                } else {
                    eprintln!("Error: --port requires a value");
                    std::process::exit(1);
                }
            }
            "--replicaof" => {
                if i + 1 < args.len() {
                    match PrimaryAddr::parse(&args[i + 1]) {
                        Ok(addr) => config.replica_of = Some(addr),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            std::process::exit(1);
                        }
                    }
                    i += 2;
                } else {
                    eprintln!("Error: --replicaof requires a value");
                    std::process::exit(1);
                }
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("emberkv version {}", emberkv::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn print_help() {
    println!(
        r#"
emberkv - A Replicating In-Memory Key-Value Store

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -p, --port <PORT>            Port to listen on (default: 6379)
        --replicaof "<HOST> <PORT>"
                                 Run as a replica of the given primary
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    emberkv                             # Start a primary on port 6379
    emberkv --port 6380                 # Start a primary on port 6380
    emberkv --port 6380 --replicaof "localhost 6379"
                                        # Start a replica of localhost:6379

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> PING
    PONG
    127.0.0.1:6379> SET name ember
    OK
    127.0.0.1:6379> GET name
    "ember"
"#
    );
}

/// Generates the 40-character alphanumeric replication identifier a
/// primary reports in INFO and FULLRESYNC.
fn generate_repl_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(emberkv::REPL_ID_LEN)
        .map(char::from)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = parse_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let role = config.role();
    let repl_id = generate_repl_id();
    info!(
        version = emberkv::VERSION,
        role = role.as_info_str(),
        port = config.port,
        "Starting emberkv"
    );

    // Shared state: store, replica registry, primary-link bookkeeping.
    let storage = Arc::new(KvStore::new());
    let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
    let registry = Arc::new(ReplicaRegistry::new());
    let primary_link = Arc::new(PrimaryLinkState::default());
    let stats = Arc::new(ConnectionStats::new());

    let command_handler = CommandHandler::new(Arc::clone(&storage), role, repl_id)
        .with_primary_link(Arc::clone(&primary_link));

    // A replica dials its primary before accepting clients; a failed
    // handshake is fatal.
    if let Some(primary) = &config.replica_of {
        let link = emberkv::replication::establish(primary, config.port)
            .await
            .map_err(|e| anyhow::anyhow!("replica handshake with {} failed: {}", primary.address(), e))?;
        primary_link.record(link.sync.clone());

        let session_handler = command_handler.clone();
        let session_registry = Arc::clone(&registry);
        let session_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            handle_primary_link(link, session_handler, session_registry, session_stats).await;
        });
    }

    let listener = TcpListener::bind(config.bind_address())
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", config.bind_address(), e))?;
    info!(address = %config.bind_address(), "Listening for connections");

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, command_handler, registry, stats) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections.
async fn accept_loop(
    listener: TcpListener,
    command_handler: CommandHandler,
    registry: Arc<ReplicaRegistry>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let command_handler = command_handler.clone();
                let registry = Arc::clone(&registry);
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, command_handler, registry, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
