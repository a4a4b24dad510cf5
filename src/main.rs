// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use l4proxy::cfg::{logger, Cli};
use l4proxy::daemon::{self, PidFile};
use l4proxy::lookup::{redirect::RedirectLookup, LookupRegistry, OrigDestLookup};
use l4proxy::listener;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config().context("loading configuration")?;

    if config.daemon.daemonize {
        daemon::daemonize().context("daemonizing")?;
    }

    // Deliberately held for the rest of `main`: its `Drop` impl is not what
    // releases the lock (the process exiting closes the fd, which releases
    // it), but keeping it alive documents that the lock is load-bearing for
    // the whole process lifetime.
    let _pidfile = match &config.daemon.pidfile {
        Some(path) => Some(PidFile::acquire(std::path::Path::new(path)).context("pidfile")?),
        None => None,
    };

    let _logger_guard = logger::init(&config.log);

    let registry = LookupRegistry::new();
    let lookup: Arc<dyn OrigDestLookup> = Arc::new(RedirectLookup);
    registry
        .register(l4proxy::lookup::redirect::NAME, lookup)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("registering lookup backend")?;
    let active = registry
        .switchto(&config.upstream.backend)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("selecting lookup backend")?;
    info!(backend = %active.name(), "lookup backend selected");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(config, active))
}

async fn run(config: l4proxy::cfg::Config, lookup: Arc<dyn OrigDestLookup>) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "failed to install signal handler");
            return;
        }
        info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    listener::serve(config.listen, lookup, config.buffer_capacity, shutdown)
        .await
        .context("accept loop")
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.map_err(Into::into)
}
