//! setu-plc - PLC signal exchange daemon
//!
//! ## Protocol architecture
//!
//! - **UDP request/reply (port 5555)**: controller reads and writes signals
//! - **UDP notifications (port 5556)**: change batches pushed to the
//!   configured controller address (fire-and-forget)
//! - **TCP lock-step (port 5555)**: synchronous request/reply for
//!   controllers that require strict alternation
//!
//! All three front-ends share one in-memory signal store; a dedicated
//! notifier thread keeps notification transmission off the request paths.

use setu_plc::config::Config;
use setu_plc::error::{Error, Result};
use setu_plc::memory::SignalStore;
use setu_plc::notify::ChangeNotifier;
use setu_plc::server::{LockstepServer, UdpNotifier, UdpResponder};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const DEFAULT_CONFIG_PATH: &str = "/etc/setu-plc.toml";

/// Parse config path from command line arguments.
///
/// Supports:
/// - `setu-plc <path>` (positional)
/// - `setu-plc --config <path>` (flag-based)
/// - `setu-plc -c <path>` (short flag)
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn load_config() -> Result<(Config, String)> {
    match parse_config_path() {
        // an explicitly given path must load
        Some(path) => {
            let config = Config::from_file(&path)?;
            Ok((config, format!("loaded config from {}", path)))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let config = Config::from_file(DEFAULT_CONFIG_PATH)?;
            Ok((config, format!("loaded config from {}", DEFAULT_CONFIG_PATH)))
        }
        None => Ok((
            Config::default(),
            format!("no config at {}, using defaults", DEFAULT_CONFIG_PATH),
        )),
    }
}

fn main() -> Result<()> {
    let (config, config_notice) = load_config()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("setu-plc v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("{}", config_notice);

    let (store, events) = SignalStore::new();
    let store = Arc::new(store);

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("error setting Ctrl-C handler: {}", e)))?;

    // Notification channel: bound to request_port + 1, pushing to the
    // configured controller address
    let controller = config.network.controller_addr()?;
    let notifier_sink = UdpNotifier::bind(&config.network.notification_addr(), controller)?;
    let notifier = ChangeNotifier::spawn(events, Box::new(notifier_sink), Arc::clone(&running))?;

    // UDP request/reply front-end
    let responder = UdpResponder::new(
        Arc::clone(&store),
        config.network.request_addr(),
        Arc::clone(&running),
    );
    let udp_handle = thread::Builder::new()
        .name("udp-responder".to_string())
        .spawn(move || responder.run())?;

    // Lock-step TCP front-end
    let lockstep = LockstepServer::new(
        Arc::clone(&store),
        config.network.lockstep_addr(),
        Arc::clone(&running),
    );
    let lockstep_handle = thread::Builder::new()
        .name("lockstep-server".to_string())
        .spawn(move || {
            if let Err(e) = lockstep.run() {
                log::error!("lock-step server error: {}", e);
            }
        })?;

    log::info!("setu-plc running. Press Ctrl-C to stop.");

    let _ = udp_handle.join();
    let _ = lockstep_handle.join();
    notifier.join();

    log::info!("setu-plc stopped");
    Ok(())
}
