//! Process entry point (§6 CLI / process lifecycle): load config, install
//! tracing, bind listeners, and drive the core loop until it asks to stop.

mod config;
mod context;
mod dispatch;
mod error;
mod event_loop;
mod ids;
mod modes;
mod modules;
mod net;
mod restart;
mod router;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Config, LogFormat};
use context::Context;
use dispatch::commands::register_all;
use dispatch::CommandRegistry;
use event_loop::Signals;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "rustircd.toml".to_string());
    let config_path = PathBuf::from(config_path);

    let config = match Config::load_from_file(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    init_tracing(&config);

    match run_server(config, &config_path).await {
        Ok(event_loop::Outcome::Shutdown) => std::process::exit(EXIT_OK),
        Ok(event_loop::Outcome::Restart) => {
            let err = restart::reexec();
            error!(%err, "re-exec failed, exiting instead");
            std::process::exit(EXIT_FATAL);
        }
        Err(e) => {
            error!(error = %e, "fatal error, exiting");
            std::process::exit(EXIT_FATAL);
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }
}

async fn run_server(config: Config, config_path: &PathBuf) -> anyhow::Result<event_loop::Outcome> {
    let bind_addr = config.bind_addr()?;
    let config = Arc::new(config);

    let mut registry = CommandRegistry::new();
    register_all(&mut registry);

    let recvq_bytes = config.limits.recvq_bytes;
    let now = event_loop::unix_now();
    let mut ctx = Context::new(config, registry, now);

    let (core_tx, mut core_rx) = mpsc::unbounded_channel();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = net::listener::run(bind_addr, core_tx, recvq_bytes).await {
            error!(error = %e, "listener exited");
        }
    });

    let mut signals = Signals {
        sighup: signal(SignalKind::hangup())?,
        sigusr1: signal(SignalKind::user_defined1())?,
        sigterm: signal(SignalKind::terminate())?,
        sigint: signal(SignalKind::interrupt())?,
    };

    info!(%bind_addr, "rustircd starting");
    let outcome = event_loop::run(&mut ctx, &mut core_rx, &mut signals, config_path).await;

    restart::close_listeners_not_stdio(std::slice::from_ref(&listener_handle));

    Ok(outcome)
}
