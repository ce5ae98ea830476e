// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PKCE (RFC 7636) session material and authorization URL construction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::oauth::{CLIENT_ID, SCOPES};

/// One in-flight authorization attempt's secrets. Lives only for the
/// duration of the flow; never persisted.
#[derive(Debug, Clone)]
pub struct PkceSession {
    /// 32 random bytes, base64url-encoded (43 chars).
    pub code_verifier: String,
    /// `base64url(sha256(code_verifier))`, S256 method.
    pub code_challenge: String,
    /// CSRF state token, independent of the verifier.
    pub state: String,
}

impl PkceSession {
    pub fn generate() -> Self {
        let code_verifier = random_token();
        let code_challenge = challenge_for(&code_verifier);
        Self { code_verifier, code_challenge, state: random_token() }
    }
}

/// Compute the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the browser authorization URL.
///
/// Parameter order follows the Claude Code CLI (`code=true` first).
pub fn authorize_url(authorize_endpoint: &str, redirect_uri: &str, session: &PkceSession) -> String {
    let params = [
        ("code", "true"),
        ("client_id", CLIENT_ID),
        ("response_type", "code"),
        ("redirect_uri", redirect_uri),
        ("scope", SCOPES),
        ("code_challenge", &session.code_challenge),
        ("code_challenge_method", "S256"),
        ("state", &session.state),
    ];
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{authorize_endpoint}?{query}")
}

/// Minimal percent-encoding of query values (RFC 3986 unreserved set).
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
#[path = "pkce_tests.rs"]
mod tests;
