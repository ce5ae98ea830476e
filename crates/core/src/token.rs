// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure credential-blob inspection and the refresh-token exchange.
//!
//! [`validate`] never fails: malformed blobs and blobs without an expiry
//! both come back as an all-false/None status, so callers branch on the
//! fields instead of catching errors. [`refresh`] likewise reports its
//! outcome as data; the orchestrator decides what a failure means.

use serde::Serialize;

use crate::config::Endpoints;
use crate::oauth::{TokenResponse, CLIENT_ID};
use crate::store::{epoch_millis, Credential};

/// Lead time before expiry that counts as "near expiry" for proactive
/// refresh (5 minutes).
pub const NEAR_EXPIRY_MINUTES: i64 = 5;

/// Result of inspecting a credential blob for expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub is_valid: bool,
    pub is_expired: bool,
    /// Expiry as epoch milliseconds, when the blob carries one.
    pub expires_at: Option<u64>,
    /// Signed distance to expiry, rounded up; a live token always
    /// reports at least one minute, and the count is negative once
    /// expired.
    pub minutes_until_expiry: Option<i64>,
}

/// Inspect a blob. Malformed JSON, admin keys, and blobs without an
/// expiry all yield the default (all-false/None) status.
pub fn validate(blob: &str) -> TokenStatus {
    let Ok(credential) = Credential::parse(blob) else {
        return TokenStatus::default();
    };
    let Credential::OAuth { expires_at: Some(expires_at), .. } = credential else {
        return TokenStatus::default();
    };

    let now = epoch_millis();
    let is_expired = expires_at <= now;
    // Ceiling division: a token with seconds left is still a one-minute
    // token, never a zero-minute one.
    let minutes = (expires_at as i64 - now as i64 + 59_999).div_euclid(60_000);
    TokenStatus {
        is_valid: !is_expired,
        is_expired,
        expires_at: Some(expires_at),
        minutes_until_expiry: Some(minutes),
    }
}

/// Outcome of a refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new credential blob with a fresh token pair.
    Refreshed { credentials: String },
    /// Why the refresh did not happen or did not succeed.
    Failed { error: String },
}

/// Exchange the blob's refresh token for a fresh pair.
///
/// A blob without a refresh token fails immediately with no network
/// call. Failures are never retried here.
pub async fn refresh(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    blob: &str,
) -> RefreshOutcome {
    let refresh_token = match Credential::parse(blob) {
        Ok(Credential::OAuth { refresh_token, .. }) if !refresh_token.is_empty() => refresh_token,
        Ok(_) => return RefreshOutcome::Failed { error: "No refresh token".to_owned() },
        Err(e) => return RefreshOutcome::Failed { error: e.to_string() },
    };

    let resp = match http
        .post(&endpoints.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", CLIENT_ID),
        ])
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            return RefreshOutcome::Failed { error: format!("refresh request failed: {e}") }
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return RefreshOutcome::Failed { error: format!("refresh failed ({status}): {body}") };
    }

    let token: TokenResponse = match resp.json().await {
        Ok(token) => token,
        Err(e) => {
            return RefreshOutcome::Failed { error: format!("malformed refresh response: {e}") }
        }
    };

    let expires_at = (token.expires_in > 0).then(|| epoch_millis() + token.expires_in * 1000);
    let credential = Credential::OAuth {
        access_token: token.access_token,
        // The endpoint may rotate the refresh token; keep the old one if
        // it does not.
        refresh_token: token.refresh_token.unwrap_or(refresh_token),
        expires_at,
    };
    match credential.to_blob() {
        Ok(credentials) => RefreshOutcome::Refreshed { credentials },
        Err(e) => RefreshOutcome::Failed { error: e.to_string() },
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
