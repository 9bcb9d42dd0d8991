// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use quillsync::auth::DevTokenVerifier;
use quillsync::cli::Cli;
use quillsync::config::AppConfig;
use quillsync::hub::SessionHub;
use quillsync::logging;
use quillsync::pipeline::EditPipeline;
use quillsync::server::{self, AppState};
use quillsync::store::SqliteStore;
use tokio::signal;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();
    let config = AppConfig::from_env()
        .context("failed to load configuration from environment")?
        .merge_cli(cli.listen_addr, cli.sqlite_path, cli.debug);

    logging::initialize(config.log_level);

    debug!(listen_addr = %config.listen_addr, sqlite_path = %config.sqlite_path, "starting quillsyncd");

    let store = Arc::new(
        SqliteStore::open(&config.sqlite_path)
            .with_context(|| format!("failed to open sqlite database at {}", config.sqlite_path))?,
    );
    let hub = SessionHub::new();
    let pipeline = Arc::new(EditPipeline::new(store.clone(), hub.clone()));
    let state = AppState {
        store,
        hub,
        pipeline,
        auth: Arc::new(DevTokenVerifier),
    };

    let router = server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "quillsyncd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("server loop exited with an error")?;

    Ok(())
}

async fn wait_for_shutdown() {
    let mut signal_terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("should have been able to create terminate signal stream");
    tokio::select! {
        _ = signal::ctrl_c() => {
            debug!("got SIGINT (Ctrl+C), shutting down");
        }
        _ = signal_terminate.recv() => {
            debug!("got SIGTERM, shutting down");
        }
    }
}
