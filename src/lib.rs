// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The server-side collaboration core for a real-time document editor.
//!
//! Four components, leaves-first: [`ot`] transforms an incoming edit
//! against history it missed; [`store`] persists a document's
//! `(content, version)` pair and its operation log behind a per-document
//! critical section; [`pipeline`] drives one inbound edit through
//! version-check, transform, apply, persist and acknowledgment; [`hub`]
//! multiplexes committed operations out to every other subscriber of a
//! document. [`server`] is the only module that knows about WebSocket
//! framing; everything below it is transport-agnostic.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod model;
pub mod ot;
pub mod pipeline;
pub mod server;
pub mod store;
