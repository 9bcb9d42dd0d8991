// SPDX-FileCopyrightText: 2026 Quillsync Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token verification. The core never issues or stores credentials; it only
//! asks a [`TokenVerifier`] whether an opaque bearer token names a user.

use async_trait::async_trait;

use crate::model::UserId;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve an opaque token to a [`UserId`], or `None` if it does not
    /// name anyone. Never returns an error: an unverifiable token is
    /// indistinguishable from an absent one as far as the caller is
    /// concerned.
    async fn verify_token(&self, token: &str) -> Option<UserId>;
}

/// Treats the token itself as the user id, as long as it's non-empty.
/// Stands in for a real identity provider in development and in tests;
/// never wired up when `QUILLSYNC_LISTEN_ADDR` points at anything but
/// localhost.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevTokenVerifier;

#[async_trait]
impl TokenVerifier for DevTokenVerifier {
    async fn verify_token(&self, token: &str) -> Option<UserId> {
        if token.is_empty() {
            None
        } else {
            Some(UserId::from(token))
        }
    }
}
