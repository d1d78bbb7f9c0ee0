//! mdstream
//!
//! Authenticates against the token endpoint, discovers streaming endpoints,
//! and keeps one (or a hot-standby pair of) market data sessions alive while
//! the access token is renewed.

mod args;
mod printer;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mdstream_platform::{EndpointResolver, TokenManager};
use mdstream_services::{SessionOrchestrator, WebSocketSpawner};
use mdstream_session::update_channel;

use crate::args::{Args, ConfigError};

/// Exit code for terminal authentication, discovery or session failures
const EXIT_FAILURE: u8 = 1;

/// Exit code for invalid configuration
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mdstream=debug")))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let plan = args.plan()?;
    info!(
        "Starting mdstream ({} grant for {})",
        plan.credential.grant_kind(),
        plan.credential.principal()
    );

    let tokens = TokenManager::new(plan.token, plan.credential).context("Failed to set up token manager")?;
    let resolver = EndpointResolver::new(plan.resolver).context("Failed to set up endpoint resolver")?;

    let (updates_tx, updates_rx) = update_channel();
    let printer = tokio::spawn(printer::print_updates(updates_rx));
    let spawner = WebSocketSpawner::new(plan.session, updates_tx);

    let mut orchestrator = SessionOrchestrator::new(plan.orchestrator, tokens, resolver, spawner);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; shutting down");
            on_signal.cancel();
        }
    });

    let result = match orchestrator.start().await {
        Ok(()) => orchestrator.run(cancel).await,
        Err(e) => {
            orchestrator.shutdown().await;
            Err(e)
        }
    };

    // Dropping the orchestrator releases the last update sender
    drop(orchestrator);
    let _ = printer.await;

    result.context("Session orchestration stopped")
}
