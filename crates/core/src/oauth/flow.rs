// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot browser authorization flow.
//!
//! State machine: `Init -> ListenerBound -> AwaitingCallback ->
//! {Validated -> Exchanging -> Done} | Error | TimedOut`. The local
//! listener and the deadline timer are mutually exclusive terminal
//! triggers; a taken settlement sender is the idempotence guard, so
//! whichever fires second is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::Endpoints;
use crate::error::Error;
use crate::oauth::pkce::{self, PkceSession};
use crate::oauth::{TokenResponse, CLIENT_ID};
use crate::store::{epoch_millis, Credential};

const SUCCESS_PAGE: &str = "<html><body><h1>Login complete</h1>\
<p>You can close this tab and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Login failed</h1>\
<p>Close this tab and retry from the terminal.</p></body></html>";

/// Browser-open side effect. Injectable so tests never spawn a browser.
pub type Opener = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Options for [`authorize`].
pub struct AuthorizeOptions {
    /// Deadline for the whole flow, callback wait included.
    pub timeout: Duration,
    /// When true, a failed long-lived key upgrade fails the flow instead
    /// of falling back to the short-lived token pair.
    pub require_long_lived: bool,
    /// Replacement for the default platform browser opener.
    pub opener: Option<Opener>,
}

impl Default for AuthorizeOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(300), require_long_lived: false, opener: None }
    }
}

impl std::fmt::Debug for AuthorizeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeOptions")
            .field("timeout", &self.timeout)
            .field("require_long_lived", &self.require_long_lived)
            .field("opener", &self.opener.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Shared state between the flow future and the callback handler.
struct FlowShared {
    expected_state: String,
    /// One-shot settlement guard: taken exactly once, by the first
    /// terminal trigger (valid/invalid callback or deadline).
    settle: Mutex<Option<oneshot::Sender<Result<String, String>>>>,
    shutdown: CancellationToken,
}

impl FlowShared {
    fn take_settler(&self) -> Option<oneshot::Sender<Result<String, String>>> {
        self.settle.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }
}

/// Run the full authorization exchange and return a credential blob.
///
/// Binds an ephemeral loopback listener, opens the authorization URL in
/// the browser, waits for exactly one `/callback` hit (or the deadline),
/// then exchanges the code for tokens. No step is retried internally.
pub async fn authorize(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    options: AuthorizeOptions,
) -> Result<String, Error> {
    // Init -> ListenerBound
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| Error::auth(format!("callback listener bind failed: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::auth(format!("callback listener address: {e}")))?
        .port();
    let redirect_uri = format!("http://localhost:{port}/callback");

    let session = PkceSession::generate();
    let auth_url = pkce::authorize_url(&endpoints.authorize_url, &redirect_uri, &session);

    let (tx, rx) = oneshot::channel();
    let shared = Arc::new(FlowShared {
        expected_state: session.state.clone(),
        settle: Mutex::new(Some(tx)),
        shutdown: CancellationToken::new(),
    });

    let shutdown = shared.shutdown.clone();
    let router = callback_router(Arc::clone(&shared));
    let mut server = tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });

    if let Err(e) = open_url(&options, &auth_url) {
        // The flow can still complete if the user reaches the URL some
        // other way; otherwise the deadline fires.
        tracing::warn!(err = %e, "failed to open browser for authorization");
    }

    // AwaitingCallback -> settled | TimedOut
    let settled = tokio::time::timeout(options.timeout, rx).await;
    let result = match settled {
        Err(_) => {
            // Deadline first: disarm the handler so a late callback is a
            // no-op, then tear the listener down.
            drop(shared.take_settler());
            Err(Error::auth("authorization timed out"))
        }
        Ok(Err(_)) => Err(Error::auth("authorization flow aborted")),
        Ok(Ok(Err(message))) => Err(Error::auth(message)),
        Ok(Ok(Ok(code))) => {
            // Validated -> Exchanging -> Done
            exchange_and_build(http, endpoints, &options, &code, &session, &redirect_uri).await
        }
    };

    shared.shutdown.cancel();
    // Graceful shutdown already let the final response flush; anything
    // still holding a socket past this point gets cut off.
    if tokio::time::timeout(Duration::from_secs(2), &mut server).await.is_err() {
        server.abort();
    }

    result
}

/// Exchange the authorization code, then optionally upgrade to a
/// long-lived API key.
async fn exchange_and_build(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    options: &AuthorizeOptions,
    code: &str,
    session: &PkceSession,
    redirect_uri: &str,
) -> Result<String, Error> {
    let token = exchange_code(http, endpoints, code, session, redirect_uri).await?;

    match upgrade_to_api_key(http, endpoints, &token.access_token).await {
        Ok(api_key) => {
            // Long-lived keys carry no refresh token and no expiry.
            return Credential::OAuth {
                access_token: api_key,
                refresh_token: String::new(),
                expires_at: None,
            }
            .to_blob();
        }
        Err(e) if options.require_long_lived => return Err(e),
        Err(e) => {
            tracing::debug!(err = %e, "long-lived key upgrade failed, keeping short-lived pair");
        }
    }

    let expires_at =
        (token.expires_in > 0).then(|| epoch_millis() + token.expires_in * 1000);
    Credential::OAuth {
        access_token: token.access_token,
        refresh_token: token.refresh_token.unwrap_or_default(),
        expires_at,
    }
    .to_blob()
}

/// POST the code + verifier to the token endpoint (JSON body, matching
/// the Claude Code exchange).
async fn exchange_code(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    code: &str,
    session: &PkceSession,
    redirect_uri: &str,
) -> Result<TokenResponse, Error> {
    let body = serde_json::json!({
        "grant_type": "authorization_code",
        "client_id": CLIENT_ID,
        "code": code,
        "redirect_uri": redirect_uri,
        "code_verifier": session.code_verifier,
        "state": session.state,
    });

    let resp = http
        .post(&endpoints.token_url)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::auth(format!("token exchange request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::auth_status(format!("token exchange failed: {body}"), status.as_u16()));
    }
    resp.json::<TokenResponse>()
        .await
        .map_err(|e| Error::auth(format!("malformed token response: {e}")))
}

/// Trade a fresh access token for a long-lived API key.
async fn upgrade_to_api_key(
    http: &reqwest::Client,
    endpoints: &Endpoints,
    access_token: &str,
) -> Result<String, Error> {
    let resp = http
        .post(&endpoints.create_api_key_url)
        .bearer_auth(access_token)
        .header("x-app", "cli")
        .json(&serde_json::json!({}))
        .send()
        .await
        .map_err(|e| Error::auth(format!("create_api_key request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::auth_status(format!("create_api_key failed: {body}"), status.as_u16()));
    }
    let value: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| Error::auth(format!("malformed create_api_key response: {e}")))?;
    value
        .get("raw_key")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::auth("create_api_key response missing raw_key"))
}

fn callback_router(shared: Arc<FlowShared>) -> Router {
    Router::new()
        .route("/callback", get(handle_callback))
        .fallback(|| async { (StatusCode::NOT_FOUND, Html("not found".to_owned())) })
        .with_state(shared)
}

/// Terminal callback handler. Settles the flow at most once; every later
/// request gets a failure page and changes nothing.
async fn handle_callback(
    State(shared): State<Arc<FlowShared>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    let Some(settler) = shared.take_settler() else {
        return (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE.to_owned()));
    };

    let outcome = if let Some(error) = params.get("error") {
        Err(format!("authorization denied: {error}"))
    } else if params.get("state") != Some(&shared.expected_state) {
        Err("state mismatch".to_owned())
    } else if let Some(code) = params.get("code") {
        Ok(code.clone())
    } else {
        Err("missing code".to_owned())
    };

    let response = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE.to_owned())),
        Err(_) => (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE.to_owned())),
    };

    let _ = settler.send(outcome);
    shared.shutdown.cancel();
    response
}

fn open_url(options: &AuthorizeOptions, url: &str) -> anyhow::Result<()> {
    match &options.opener {
        Some(opener) => opener(url),
        None => open_in_browser(url),
    }
}

fn open_in_browser(url: &str) -> anyhow::Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    };
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    command.spawn()?;
    Ok(())
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
