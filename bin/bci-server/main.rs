use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use log::{error, info, LevelFilter};

use bci_server::{load_config_or_default, AppConfig, Engine};

/// BCI EEG acquisition and classification server.
#[derive(Parser, Debug)]
#[command(name = "bci-server")]
#[command(about = "Networked EEG acquisition, marker timing, and a classifier state machine", long_about = None)]
struct Args {
    /// Path to a configuration file (TOML). Falls back to ./bci-server.toml,
    /// ./config.toml, or built-in defaults if not given.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override the configured TCP port.
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config_or_default(args.config.as_deref());

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let log_level = args.log_level.unwrap_or_else(|| config.logging.log_level.clone());
    initialize_logging(&log_level)?;
    log_startup_info(&config);

    let shutdown = setup_shutdown_handler();
    let engine = Engine::new(config);

    if let Err(e) = engine.run(shutdown) {
        error!("server error: {e}");
        return Err(e.into());
    }

    info!("stopped.");
    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    info!("K.U.Leuven-style BCI server");
    info!("listening on {}:{}", config.server.bind_addr, config.server.port);
    info!("default device: {}", config.device.default_device);
}

fn setup_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    ctrlc::set_handler(move || {
        info!("ctrl+c received, shutting down");
        shutdown_flag_clone.store(true, Ordering::SeqCst);
    })
    .expect("error setting ctrl+c handler");

    shutdown_flag
}

fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("warning: invalid log level '{log_level}', using 'info'");
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    Ok(())
}
