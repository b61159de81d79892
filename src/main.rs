//! FLYWHEEL: supervised prediction-market scoring and sizing runtime.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! starts the supervisors in dependency order, and waits for either a
//! shutdown signal or a supervisor that has run out of restarts.

use anyhow::{Context, Result};
use tracing::{error, info};

use flywheel::config::AppConfig;
use flywheel::engine::SupervisorError;
use flywheel::supervisors;

const BANNER: &str = r#"
 _____ _  __   ____        ___   _ _____ _____ _
|  ___| | \ \ / /\ \      / / | | | ____| ____| |
| |_  | |  \ V /  \ \ /\ / /| |_| |  _| |  _| | |
|  _| | |___| |    \ V  V / |  _  | |___| |___| |___
|_|   |_____|_|     \_/\_/  |_| |_|_____|_____|_____|

  Supervised market scoring & position sizing
  v0.1.0
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("FLYWHEEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        config = %config_path,
        initial_balance = cfg.capital.initial_balance,
        currency = %cfg.agent.currency,
        max_restarts = cfg.runtime.max_restarts,
        "FLYWHEEL starting up"
    );

    let assembly = supervisors::assemble(&cfg).context("building supervisors")?;
    let orchestrator = assembly.orchestrator;

    if let Err(e) = orchestrator.start_all().await {
        error!(error = %e, "Startup failed, shutting down");
        orchestrator.stop_all().await;
        return Err(e.into());
    }

    info!(supervisors = ?orchestrator.names(), "Running. Press Ctrl+C to stop.");

    let failure: Option<SupervisorError> = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received.");
            None
        }
        failure = orchestrator.next_failure() => failure,
    };

    orchestrator.stop_all().await;
    for status in orchestrator.status() {
        info!(
            supervisor = %status.name,
            state = %status.state,
            restarts = status.restarts,
            "Final state"
        );
    }

    match failure {
        Some(e) => {
            error!(error = %e, "FLYWHEEL stopped after an unrecoverable supervisor failure");
            Err(e.into())
        }
        None => {
            info!("FLYWHEEL shut down cleanly.");
            Ok(())
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flywheel=info"));

    let json_logging = std::env::var("FLYWHEEL_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
