// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing subscriber initialization.

use tracing_subscriber::{fmt, FmtSubscriber};

use crate::config::LogLevel;

pub fn initialize(level: LogLevel) {
    let timer = time::format_description::parse("[hour]:[minute]:[second]")
        .expect("could not create time format description");
    let time_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = fmt::time::OffsetTime::new(time_offset, timer);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level.as_tracing_level())
        .with_thread_ids(true)
        .with_timer(timer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default log subscriber failed");
}
