// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime configuration, loaded from environment variables with
//! `QUILLSYNC_`-prefixed names. There is no on-disk config file for a
//! server process in the way the original directory-local tool had one;
//! this still hand-parses rather than pulling in a generic config-framework
//! dependency, matching that tool's own preference for a small,
//! purpose-built config type over a generic one.

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};

pub const DEFAULT_SQLITE_PATH: &str = "quillsync.db";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_tracing_level(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("unrecognized log level `{other}`, expected one of debug/info/warn/error"),
        }
    }
}

/// Server configuration. CLI flags (see `cli.rs`) take precedence over the
/// `QUILLSYNC_LISTEN_ADDR` / `QUILLSYNC_SQLITE_PATH` / `QUILLSYNC_LOG_LEVEL`
/// environment variables, which in turn take precedence over the defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub sqlite_path: String,
    pub log_level: LogLevel,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("QUILLSYNC_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let sqlite_path = env::var("QUILLSYNC_SQLITE_PATH").unwrap_or_else(|_| DEFAULT_SQLITE_PATH.to_string());
        let log_level = match env::var("QUILLSYNC_LOG_LEVEL") {
            Ok(raw) => raw.parse().context("failed to parse QUILLSYNC_LOG_LEVEL")?,
            Err(_) => LogLevel::Info,
        };

        Ok(Self {
            listen_addr,
            sqlite_path,
            log_level,
        })
    }

    /// Apply CLI overrides on top of the environment-derived defaults.
    pub fn merge_cli(mut self, listen_addr: Option<String>, sqlite_path: Option<String>, debug: bool) -> Self {
        if let Some(addr) = listen_addr {
            self.listen_addr = addr;
        }
        if let Some(path) = sqlite_path {
            self.sqlite_path = path;
        }
        if debug {
            self.log_level = LogLevel::Debug;
        }
        self
    }
}
