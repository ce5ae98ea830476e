// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end credential scenarios.
//!
//! Runs a fake provider (token, api-key upgrade, usage, and admin-report
//! endpoints) on a loopback port and builds [`Client`]s pointed at it,
//! with a temp-dir store and a stubbed secret store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use keyrack::crypto::CryptoBox;
use keyrack::secrets::SecretStore;
use keyrack::store::AccountStore;
use keyrack::{Client, ClientConfig, Endpoints};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Behavior switches for [`FakeProvider`].
pub struct FakeProviderConfig {
    /// Authorization code the token endpoint exchanges; others get 400.
    pub exchange_code: String,
    /// Long-lived key returned by the upgrade endpoint; `None` refuses.
    pub grant_api_key: Option<String>,
    /// Whether refresh grants succeed.
    pub refresh_ok: bool,
    /// Bearer tokens the usage endpoint accepts.
    pub accept_tokens: Vec<String>,
    /// Whether the admin report endpoint accepts any key.
    pub probe_ok: bool,
}

impl Default for FakeProviderConfig {
    fn default() -> Self {
        Self {
            exchange_code: "e2e-code".to_owned(),
            grant_api_key: None,
            refresh_ok: true,
            accept_tokens: vec![],
            probe_ok: true,
        }
    }
}

/// Counting fake of every remote endpoint the client talks to.
pub struct FakeProvider {
    config: FakeProviderConfig,
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    pub upgrades: AtomicUsize,
    pub usage_calls: AtomicUsize,
    pub report_calls: AtomicUsize,
    /// Bearer tokens seen by the usage endpoint, in call order.
    pub seen_bearers: Mutex<Vec<String>>,
}

impl FakeProvider {
    /// Start the fake and return it with endpoints aimed at it.
    pub async fn start(config: FakeProviderConfig) -> anyhow::Result<(Arc<Self>, Endpoints)> {
        ensure_crypto();
        let provider = Arc::new(Self {
            config,
            exchanges: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            upgrades: AtomicUsize::new(0),
            usage_calls: AtomicUsize::new(0),
            report_calls: AtomicUsize::new(0),
            seen_bearers: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/v1/oauth/token", post(handle_token))
            .route("/api/oauth/claude_cli/create_api_key", post(handle_upgrade))
            .route("/api/oauth/usage", get(handle_usage))
            .route("/v1/organizations/usage_report/messages", get(handle_report))
            .with_state(Arc::clone(&provider));
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let endpoints = Endpoints {
            authorize_url: "https://auth.invalid/oauth/authorize".to_owned(),
            token_url: format!("http://{addr}/v1/oauth/token"),
            usage_url: format!("http://{addr}/api/oauth/usage"),
            create_api_key_url: format!("http://{addr}/api/oauth/claude_cli/create_api_key"),
            admin_usage_url: format!("http://{addr}/v1/organizations/usage_report/messages"),
        };
        Ok((provider, endpoints))
    }

    /// Bearer tokens the usage endpoint has seen so far.
    pub fn bearers(&self) -> Vec<String> {
        self.seen_bearers.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

async fn handle_token(
    State(provider): State<Arc<FakeProvider>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let is_json = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        // Authorization-code exchange.
        provider.exchanges.fetch_add(1, Ordering::SeqCst);
        let value: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => return (StatusCode::BAD_REQUEST, "bad json").into_response(),
        };
        let code_ok = value.get("code").and_then(|v| v.as_str())
            == Some(provider.config.exchange_code.as_str());
        let grant_ok = value.get("grant_type").and_then(|v| v.as_str())
            == Some("authorization_code");
        if !code_ok || !grant_ok {
            return (StatusCode::BAD_REQUEST, "invalid_grant").into_response();
        }
        return Json(serde_json::json!({
            "access_token": "exchanged-access",
            "refresh_token": "exchanged-refresh",
            "expires_in": 3600,
        }))
        .into_response();
    }

    // Form-encoded refresh grant.
    provider.refreshes.fetch_add(1, Ordering::SeqCst);
    if provider.config.refresh_ok {
        Json(serde_json::json!({
            "access_token": "refreshed-access",
            "refresh_token": "refreshed-rotated",
            "expires_in": 3600,
        }))
        .into_response()
    } else {
        (StatusCode::BAD_REQUEST, "invalid_grant").into_response()
    }
}

async fn handle_upgrade(State(provider): State<Arc<FakeProvider>>) -> axum::response::Response {
    provider.upgrades.fetch_add(1, Ordering::SeqCst);
    match &provider.config.grant_api_key {
        Some(key) => Json(serde_json::json!({"raw_key": key})).into_response(),
        None => (StatusCode::FORBIDDEN, "upgrade not permitted").into_response(),
    }
}

async fn handle_usage(
    State(provider): State<Arc<FakeProvider>>,
    headers: HeaderMap,
) -> axum::response::Response {
    provider.usage_calls.fetch_add(1, Ordering::SeqCst);
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned();
    let accepted = provider.config.accept_tokens.iter().any(|t| *t == bearer);
    provider
        .seen_bearers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(bearer);
    if accepted {
        Json(serde_json::json!({
            "five_hour": {"utilization": 33.0, "resets_at": "2026-08-29T18:00:00Z"},
            "seven_day": {"utilization": 61.5},
        }))
        .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "invalid bearer").into_response()
    }
}

async fn handle_report(State(provider): State<Arc<FakeProvider>>) -> axum::response::Response {
    provider.report_calls.fetch_add(1, Ordering::SeqCst);
    if provider.config.probe_ok {
        Json(serde_json::json!({"data": [{"results": []}]})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "invalid key").into_response()
    }
}

/// Secret store stub returning a fixed payload.
pub struct StaticSecret(pub Option<String>);

impl SecretStore for StaticSecret {
    fn read(&self) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

/// Build a client over a temp-dir store aimed at `endpoints`. The temp
/// dir must outlive the client.
pub fn test_client(
    endpoints: Endpoints,
    secret: Option<String>,
) -> anyhow::Result<(Client, tempfile::TempDir)> {
    ensure_crypto();
    let dir = tempfile::tempdir()?;
    let config = ClientConfig {
        storage_path: Some(dir.path().join("accounts.enc")),
        endpoints,
        ..Default::default()
    };
    let crypto = CryptoBox::with_machine_id("keyrack-specs")?;
    let store = AccountStore::new(config.storage_path(), crypto);
    let client =
        Client::with_parts(config, store, reqwest::Client::new(), Box::new(StaticSecret(secret)));
    Ok((client, dir))
}

/// Extract and percent-decode a query parameter from a URL.
pub fn query_param(url: &str, key: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| percent_decode(v))
    })
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &value[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
