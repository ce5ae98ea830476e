// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote usage fetchers for OAuth and admin accounts.
//!
//! Both endpoints are external collaborators; this module only shapes
//! requests and lifts responses into [`UsageData`]. The retry decision on
//! a 401 belongs to the orchestrator, so unauthorized responses are kept
//! distinct from every other failure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Endpoints;
use crate::error::Error;
use crate::store::AccountType;

/// Version header required by the admin API.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A single rate-limit window from the OAuth usage endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    #[serde(default)]
    pub utilization: f64,
    #[serde(default)]
    pub resets_at: Option<String>,
}

/// Aggregated usage for one account.
///
/// Known windows are lifted into fields; the untouched response body is
/// kept in `raw` so callers can reach fields added server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageData {
    #[serde(default)]
    pub five_hour: Option<UsageWindow>,
    #[serde(default)]
    pub seven_day: Option<UsageWindow>,
    #[serde(default)]
    pub seven_day_opus: Option<UsageWindow>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl UsageData {
    fn from_raw(raw: serde_json::Value) -> Self {
        let window = |key: &str| {
            raw.get(key)
                .filter(|v| !v.is_null())
                .and_then(|v| serde_json::from_value(v.clone()).ok())
        };
        Self {
            five_hour: window("five_hour"),
            seven_day: window("seven_day"),
            seven_day_opus: window("seven_day_opus"),
            raw,
        }
    }
}

/// Failure fetching usage. `Unauthorized` drives the orchestrator's
/// single refresh-and-retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    Unauthorized(String),
    Other(String),
}

impl UsageError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(message) => write!(f, "unauthorized: {message}"),
            Self::Other(message) => f.write_str(message),
        }
    }
}

/// Per-account usage result. Failures annotate; they never propagate.
#[derive(Debug, Clone, Serialize)]
pub struct AccountUsage {
    pub name: String,
    pub account_type: AccountType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fetch usage for an OAuth bearer token.
pub async fn fetch_oauth_usage(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    access_token: &str,
    beta: &str,
) -> Result<UsageData, UsageError> {
    let resp = http
        .get(&endpoints.usage_url)
        .bearer_auth(access_token)
        .header("anthropic-beta", beta)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| UsageError::Other(format!("usage request failed: {e}")))?;

    let raw = read_usage_response(resp).await?;
    Ok(UsageData::from_raw(raw))
}

/// Fetch the most recent usage-report bucket for an admin API key.
pub async fn fetch_admin_usage(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    api_key: &str,
) -> Result<UsageData, UsageError> {
    let starting_at =
        (chrono::Utc::now() - chrono::Duration::days(1)).format("%Y-%m-%dT%H:00:00Z").to_string();
    let resp = http
        .get(&endpoints.admin_usage_url)
        .query(&[("starting_at", starting_at.as_str()), ("limit", "1")])
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| UsageError::Other(format!("admin usage request failed: {e}")))?;

    let raw = read_usage_response(resp).await?;
    Ok(UsageData { raw, ..UsageData::default() })
}

/// Validate an admin key with one probing call. Used before persisting.
pub async fn probe_admin_key(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    api_key: &str,
) -> Result<(), Error> {
    match fetch_admin_usage(http, endpoints, api_key).await {
        Ok(_) => Ok(()),
        Err(UsageError::Unauthorized(message)) => Err(Error::auth_status(message, 401)),
        Err(UsageError::Other(message)) => Err(Error::auth(message)),
    }
}

async fn read_usage_response(resp: reqwest::Response) -> Result<serde_json::Value, UsageError> {
    let status = resp.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        let body = resp.text().await.unwrap_or_default();
        return Err(UsageError::Unauthorized(body));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UsageError::Other(format!("usage fetch failed ({status}): {body}")));
    }
    resp.json()
        .await
        .map_err(|e| UsageError::Other(format!("malformed usage response: {e}")))
}

#[cfg(test)]
#[path = "usage_tests.rs"]
mod tests;
