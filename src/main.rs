//! Kinnode device daemon — control-plane signaling client.
//!
//! Maintains one persistent WebSocket connection to the signaling server,
//! registers the device on startup, answers stream-availability requests,
//! routes WebRTC offers to the media layer, and heartbeats every 30s.
//!
//! Usage:
//!   kinnode-daemon [--config <path>] [--server <ws-url>] [--heartbeat-secs <n>]
//!
//! Config path resolution: `--config`, else `KINNODE_CONFIG_PATH`, else
//! `/etc/kinnode/config.json`. A missing or unparsable config is fatal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kinnode_daemon::connection::ConnectionManager;
use kinnode_daemon::device_config::DeviceConfig;
use kinnode_daemon::dispatch::Dispatcher;
use kinnode_daemon::metrics::ProcMetrics;
use kinnode_daemon::session::{DeviceSession, LogOnlyMedia, DEFAULT_HEARTBEAT_INTERVAL};
use kinnode_daemon::SIGNALING_SUBPROTOCOL;

// ── Constants ───────────────────────────────────────────────

/// Default signaling server URL.
const DEFAULT_SERVER_URL: &str = "ws://192.30.240.10:8080";

// ── CLI ─────────────────────────────────────────────────────

#[derive(Debug)]
struct Args {
    config_path: Option<PathBuf>,
    server_url: String,
    heartbeat_interval: Duration,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut server_url = None;
    let mut heartbeat_interval = None;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(match argv.get(i) {
                    Some(p) => PathBuf::from(p),
                    None => {
                        eprintln!("--config requires a path");
                        std::process::exit(1);
                    }
                });
            }
            "--server" => {
                i += 1;
                server_url = Some(match argv.get(i) {
                    Some(url) => url.to_string(),
                    None => {
                        eprintln!("--server requires a ws:// URL");
                        std::process::exit(1);
                    }
                });
            }
            "--heartbeat-secs" => {
                i += 1;
                heartbeat_interval = Some(match argv.get(i).and_then(|s| s.parse::<u64>().ok()) {
                    Some(secs) if secs > 0 => Duration::from_secs(secs),
                    _ => {
                        eprintln!("--heartbeat-secs requires a positive integer");
                        std::process::exit(1);
                    }
                });
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!(
                    "Usage: kinnode-daemon [--config <path>] [--server <ws-url>] [--heartbeat-secs <n>]"
                );
                std::process::exit(1);
            }
        }
        i += 1;
    }

    Args {
        config_path,
        server_url: server_url.unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
        heartbeat_interval: heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
    }
}

// ── Entry point ─────────────────────────────────────────────

fn main() {
    let args = parse_args();

    let config_path = args
        .config_path
        .unwrap_or_else(DeviceConfig::resolve_path);
    let config = match DeviceConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[config] fatal: {e}");
            std::process::exit(1);
        }
    };
    eprintln!("[config] loaded identity '{}'", config.device_id);

    let dispatcher = Arc::new(Dispatcher::new());
    let conn = match ConnectionManager::new(
        args.server_url.clone(),
        SIGNALING_SUBPROTOCOL,
        Arc::clone(&dispatcher),
    ) {
        Ok(conn) => Arc::new(conn),
        Err(e) => {
            eprintln!("[conn] fatal: {e}");
            std::process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("[main] interrupt received, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            eprintln!("[main] fatal: cannot install signal handler: {e}");
            std::process::exit(1);
        }
    }

    let mut session = DeviceSession::new(
        config,
        conn,
        dispatcher,
        Box::new(ProcMetrics),
        Box::new(LogOnlyMedia),
        shutdown,
    )
    .with_heartbeat_interval(args.heartbeat_interval);

    if !session.initialize() {
        eprintln!("[main] device initialization failed");
        std::process::exit(1);
    }

    session.run_loop();
}
