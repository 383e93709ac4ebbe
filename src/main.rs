use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use sluice::components::ComponentRegistry;
use sluice::config::ConfigLoader;
use sluice::core::Runtime;
use sluice::logging;

/// Sluice - a configuration-driven log flow processor
#[derive(Parser)]
#[command(name = "sluice")]
#[command(version)]
#[command(about = "Sluice: route, filter and reshape log streams from an INI file")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/pysyslog/main.ini")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// List available component types
    #[arg(short = 'L', long)]
    list_components: bool,
}

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments and bring up logging first; everything
    // after this reports through tracing.
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    if cli.list_components {
        for (kind, names) in ComponentRegistry::new().catalog() {
            println!("{kind}:");
            for name in names {
                println!("  - {name}");
            }
        }
        return ExitCode::SUCCESS;
    }

    // Load and validate configuration
    let config = match ConfigLoader::new().load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!("failed to load '{}': {error}", cli.config.display());
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    // Build all flows up front so a bad component name fails before
    // anything touches the network or the filesystem
    let mut runtime = match Runtime::new(config) {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("invalid configuration: {error:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match runtime.run(shutdown_signal()).await {
        Ok(code) => {
            tracing::info!("shutdown complete");
            ExitCode::from(code)
        }
        Err(error) => {
            tracing::error!("startup failed: {error:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Park until the process is asked to stop. Ctrl-C maps to the
/// conventional 130; SIGTERM is an orderly shutdown and exits 0.
async fn shutdown_signal() -> u8 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                tracing::warn!("cannot listen for SIGTERM: {error}");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("interrupt received, shutting down");
                return EXIT_INTERRUPTED;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                EXIT_INTERRUPTED
            }
            _ = sigterm.recv() => {
                tracing::info!("termination requested, shutting down");
                0
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, shutting down");
        EXIT_INTERRUPTED
    }
}
