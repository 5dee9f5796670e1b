//! `urbridge` – robot controller telemetry bridge.
//!
//! 1. Loads `~/.urbridge/config.toml` (or `--config <PATH>`), applying
//!    `URBRIDGE_*` overrides.
//! 2. Serves the HTTP control endpoints and the `/ws` state feed.
//! 3. On Ctrl-C, stops monitoring (closing the controller link) and exits.
//!
//! The controller side is the simulated controller from `urbridge-hal`.
//!
//! ```bash
//! urbridge --init            # write the default config, then exit
//! urbridge --start           # begin monitoring without waiting for POST /start
//! RUST_LOG=debug URBRIDGE_LOG_FORMAT=json urbridge
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use urbridge_cockpit::CockpitServer;
use urbridge_hal::SimConnector;
use urbridge_runtime::{LifecycleController, StartOutcome, StopOutcome, init_tracing};
use urbridge_types::BridgeError;

/// Bridge a robot controller's real-time channel to HTTP and WebSocket clients.
#[derive(Parser, Debug)]
#[command(name = "urbridge")]
#[command(version)]
#[command(long_about = None)]
struct Args {
    /// Configuration file. Defaults to ~/.urbridge/config.toml.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the default configuration if the file does not exist, then exit.
    #[arg(long)]
    init: bool,

    /// Start monitoring at boot instead of waiting for POST /start.
    #[arg(long)]
    start: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Before the Tokio runtime exists; see telemetry::init_tracing.
    let _guard = init_tracing("urbridge");

    print_banner();

    let path = args.config.clone().unwrap_or_else(config::config_path);
    if args.init {
        return init_config(&path);
    }

    let cfg = match config::resolve(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            error!(error = %e, path = %path.display(), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    println!("  Config: {}", path.display().to_string().bold());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, args.start)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "urbridge exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config, autostart: bool) -> Result<(), BridgeError> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown unavailable");
    }

    let lifecycle = Arc::new(LifecycleController::new(
        Arc::new(SimConnector::new()),
        cfg.monitor_config(),
    ));

    println!(
        "  Controller: {} (simulated, {} Hz)",
        format!("{}:{}", cfg.robot_host, cfg.robot_port).bold(),
        cfg.frequency_hz
    );
    println!(
        "  Listening:  {}  ws://localhost:{}/ws\n",
        format!("http://localhost:{}", cfg.http_port).bold().cyan(),
        cfg.http_port
    );

    if autostart {
        match lifecycle.start().await? {
            StartOutcome::Started => info!("monitoring started at boot"),
            StartOutcome::AlreadyRunning => {}
        }
    }

    let server = CockpitServer::new(Arc::clone(&lifecycle))
        .with_port(cfg.http_port)
        .with_send_timeout(cfg.ws_send_timeout());

    let served = tokio::select! {
        result = server.run() => result,
        _ = shutdown_rx.changed() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            Ok(())
        }
    };

    if let StopOutcome::Stopped(exit) = lifecycle.stop().await {
        info!(%exit, "monitoring stopped on shutdown");
        println!("{}", "  ✓ Controller link closed.".green());
    }
    served
}

fn init_config(path: &Path) -> ExitCode {
    if path.exists() {
        println!("  Config already present at {}", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save_to(&config::Config::default(), path) {
        Ok(()) => {
            println!("  {} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"             __         _     __          "#.bold().cyan());
    println!("{}", r#"  __  ______/ /_  _____(_)___/ /___ ____  "#.bold().cyan());
    println!("{}", r#" / / / / __/ __ \/ ___/ / __  / __ `/ _ \ "#.bold().cyan());
    println!("{}", r#"/ /_/ / / / /_/ / /  / / /_/ / /_/ /  __/ "#.bold().cyan());
    println!("{}", r#"\__,_/_/ /_.___/_/  /_/\__,_/\__, /\___/  "#.bold().cyan());
    println!("{}", r#"                            /____/        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "urbridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot controller telemetry bridge");
    println!();
}
