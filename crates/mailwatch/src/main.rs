//! `mailwatch` - Gmail sender watcher with Telegram notifications
//!
//! `mailwatch run` polls every configured mailbox until interrupted;
//! `mailwatch authorize <account>` provisions an account's credential
//! through the browser-based OAuth grant.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod authorize;
mod cli;

use std::future::Future;

use anyhow::{Context, Result};
use clap::Parser;
use mailwatch_core::{Config, Supervisor};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailwatch=info,mailwatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Command::Run => run(config).await,
        Command::Authorize { account, no_browser } => {
            authorize::authorize(&config, &account, !no_browser).await
        }
    }
}

/// Runs every poller until Ctrl-C or SIGTERM.
async fn run(config: Config) -> Result<()> {
    info!(accounts = config.accounts.len(), senders = config.senders.len(), "Starting mailwatch");
    if config.senders.is_empty() {
        warn!("No senders configured; nothing will be relayed");
    }

    let deps = config.poller_deps().context("building clients")?;
    let supervisor = Supervisor::new(config.supervisor_config(), deps);

    let exits = supervisor.run_until(shutdown_signal()).await;

    let failed = exits.iter().filter(|exit| exit.result.is_err()).count();
    info!(stopped = exits.len(), failed, "mailwatch stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM. The SIGTERM handler is
/// installed before this returns.
fn shutdown_signal() -> impl Future<Output = ()> {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| warn!(error = %e, "Cannot listen for SIGTERM"))
        .ok();

    async move {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match terminate {
                Some(mut signal) => {
                    signal.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = interrupt => info!("Received Ctrl-C"),
            () = terminate => info!("Received SIGTERM"),
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn sigterm_resolves_shutdown() {
        let shutdown = shutdown_signal();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .unwrap();
    }
}
