// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command-line arguments for the `quillsyncd` binary. Values given here
//! override the `QUILLSYNC_*` environment variables read by
//! [`crate::config::AppConfig::from_env`].

use clap::Parser;

#[derive(Parser)]
#[command(version, about = "Collaboration core server for real-time document editing", long_about = None)]
pub struct Cli {
    /// Address to listen on, e.g. `127.0.0.1:8080`.
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Path to the SQLite database file.
    #[arg(long)]
    pub sqlite_path: Option<String>,

    /// Shorthand for `QUILLSYNC_LOG_LEVEL=debug`.
    #[arg(long)]
    pub debug: bool,
}

#[test]
fn verify() {
    use clap::CommandFactory as _;
    Cli::command().debug_assert();
}
