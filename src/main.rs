//! # kp-loader
//!
//! Runs one loader cycle: picks a worker by weight, calls the movie API and
//! stores the result in SQLite.
//!
//! Usage:
//!   kp-loader                              # One cycle with data/settings.toml
//!   kp-loader --config /etc/kp/loader.toml # Custom settings file
//!   kp-loader --init-only                  # Create tables and exit

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use kp_loader::{
    api::ApiHandler,
    catalog::Catalog,
    runner::{worker_dispatcher, PollingLoop},
    settings::AppSettings,
    CancellationToken, ConnectionPool, Database, DispatcherBuilder, LoaderError, ResilientClient,
};
use tracing_subscriber::EnvFilter;

/// Time a cancelled cycle gets to unwind before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "kp-loader", version, about = "Load movie metadata into SQLite")]
struct Cli {
    /// Settings file
    #[arg(short, long, default_value = "data/settings.toml")]
    config: PathBuf,

    /// Create the database tables and exit
    #[arg(long)]
    init_only: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "kp_loader=debug"
    } else {
        "kp_loader=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let pool = ConnectionPool::new();
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let cycle = run(&cli, &pool, cancel.clone());
    tokio::pin!(cycle);
    let finished = tokio::select! {
        result = &mut cycle => Some(result),
        _ = cancel.cancelled() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => match tokio::time::timeout(SHUTDOWN_GRACE, &mut cycle).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(grace = ?SHUTDOWN_GRACE, "cycle did not stop in time");
                Err(LoaderError::Cancelled.into())
            }
        },
    };
    pool.dispose_all();

    match result {
        Ok(done) => {
            tracing::info!(done, "loader finished");
            ExitCode::SUCCESS
        }
        Err(err) if is_cancelled(&err) => {
            tracing::warn!("loader cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(err) => {
            tracing::error!("loader failed: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: &Cli, pool: &ConnectionPool, cancel: CancellationToken) -> Result<bool> {
    let settings = AppSettings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let db = Database::open(&settings.db_path)
        .with_context(|| format!("opening database {}", settings.db_path.display()))?;
    let catalog = Catalog::new(db)?;
    catalog.initialize().context("initializing catalog")?;
    if cli.init_only {
        tracing::info!(db = %settings.db_path.display(), "database initialized");
        return Ok(true);
    }

    settings.validate()?;
    let client = ResilientClient::new(pool, &settings.client_options(), cancel.clone())?;
    let api = ApiHandler::new(client);
    let dispatcher = worker_dispatcher(
        DispatcherBuilder::new(),
        &api,
        &catalog,
        &settings.probabilities,
        &settings.search,
    )
    .context("configuring workers")?;

    let done = PollingLoop::new(dispatcher).run_once(&cancel).await?;
    let metadata = catalog.refresh_metadata()?;
    tracing::debug!(movies = metadata.movie_count, "metadata refreshed");
    Ok(done)
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<LoaderError>()
        .is_some_and(LoaderError::is_cancelled)
}

/// Cancels `token` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
    token.cancel();
}
