pub mod models {
    pub mod device;
}

pub mod client;
pub mod config;
pub mod metrics {
    pub mod registry;
    pub mod server;
}
pub mod services {
    pub mod poller;
    pub mod session;
}

use crate::client::DeviceClient;
use crate::metrics::registry::Metrics;
use crate::metrics::server::MetricsServer;
use crate::services::poller;
use crate::services::session::DeviceSession;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

pub fn run(config_path: &Path) -> Result<(), String> {
    // 1) Load config
    info!("Loading configuration from {}", config_path.display());
    let cfg = config::read_config(config_path).map_err(|e| format!("failed to read config: {}", e))?;
    info!(
        "Configuration is loaded ({} device(s), port {})",
        cfg.devices.len(),
        cfg.port
    );

    // 2) Build the metric registry shared by all device loops
    let metrics = Arc::new(Metrics::new().map_err(|e| format!("failed to build metric registry: {}", e))?);

    // 3) Start the exposition endpoint
    info!("Starting http server on port {}", cfg.port);
    let server = MetricsServer::start(Arc::clone(&metrics), cfg.port)
        .map_err(|e| format!("failed to start http server on port {}: {}", cfg.port, e))?;
    info!("Successfully started http server on port {}", cfg.port);

    // 4) One poll loop per device
    let mut senders = Vec::new();
    let mut handles = Vec::new();
    for device in &cfg.devices {
        let mut client = match DeviceClient::new(
            &device.url,
            &device.sys_id,
            &device.password,
            Arc::clone(&metrics),
            device.report.http_client_latency,
        ) {
            Ok(client) => client,
            Err(err) => {
                warn!(
                    "Failed to create client for device {} @ {} caused by {}",
                    device.sys_id, device.url, err
                );
                continue;
            }
        };
        let mut session = DeviceSession::new(device.sys_id.clone(), device.report.clone(), Arc::clone(&metrics));
        let interval = device.delay;
        let (tx, rx) = mpsc::channel();
        senders.push(tx);
        handles.push(thread::spawn(move || {
            poller::run(&mut client, &mut session, interval, &rx);
        }));
    }

    // 5) Drain on the first signal, exit hard on the second
    if !handles.is_empty() {
        install_signal_handler(senders)?;
        for handle in handles {
            let _ = handle.join();
        }
    }

    info!("Stopping http server on port {}", cfg.port);
    server.shutdown();
    info!("Successfully stopped http server on port {}", cfg.port);
    Ok(())
}

fn install_signal_handler(senders: Vec<mpsc::Sender<()>>) -> Result<(), String> {
    let draining = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if !draining.swap(true, Ordering::SeqCst) {
            info!("Shutdown signal received, graceful shutdown initiated");
            for sender in &senders {
                let _ = sender.send(());
            }
        } else {
            info!("Second shutdown signal received, force shutdown initiated");
            std::process::exit(0);
        }
    })
    .map_err(|e| format!("failed to install signal handler: {}", e))
}

// Parses the configuration file path from command line options.
fn parse_args() -> Result<PathBuf, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut config_path: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--config") => {
                if config_path.is_some() {
                    return Err("`--config` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--config` requires a path argument".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--config=") => {
                if config_path.is_some() {
                    return Err("`--config` provided more than once".to_string());
                }
                let path_str = &s["--config=".len()..];
                if path_str.is_empty() {
                    return Err("`--config` requires a path argument".to_string());
                }
                config_path = Some(PathBuf::from(path_str));
            }
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    match config_path {
        Some(path) => Ok(path),
        None => {
            // default to a config.yml next to the executable
            let exe = std::env::current_exe().map_err(|e| format!("unable to locate executable: {}", e))?;
            Ok(exe
                .parent()
                .map(|dir| dir.join("config.yml"))
                .unwrap_or_else(|| PathBuf::from("config.yml")))
        }
    }
}

fn main() {
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    let config_path = match parse_args() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    info!(
        "thermo-metrics {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&config_path) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
