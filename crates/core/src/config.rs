// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration: storage location, API headers, endpoints.
//!
//! Everything is an explicit constructor option with a documented default;
//! there is no module-level mutable state.

use std::path::PathBuf;

/// Platform selector for the secret-store collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Darwin,
    Linux,
    Windows,
}

impl Platform {
    /// Detect the platform the process is running on.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Self::Darwin,
            "windows" => Self::Windows,
            _ => Self::Linux,
        }
    }
}

/// Remote endpoints used by the OAuth flow and usage fetchers.
///
/// Overridable so tests can point every call at a local fake server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Browser authorization URL.
    pub authorize_url: String,
    /// Token endpoint (code exchange and refresh).
    pub token_url: String,
    /// OAuth usage endpoint.
    pub usage_url: String,
    /// Long-lived API key upgrade endpoint.
    pub create_api_key_url: String,
    /// Admin usage-report endpoint.
    pub admin_usage_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://claude.ai/oauth/authorize".to_owned(),
            token_url: "https://console.anthropic.com/v1/oauth/token".to_owned(),
            usage_url: "https://api.anthropic.com/api/oauth/usage".to_owned(),
            create_api_key_url: "https://api.anthropic.com/api/oauth/claude_cli/create_api_key"
                .to_owned(),
            admin_usage_url: "https://api.anthropic.com/v1/organizations/usage_report/messages"
                .to_owned(),
        }
    }
}

/// Configuration for [`crate::client::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the encrypted account store. Defaults to
    /// `accounts.enc` under [`state_dir`].
    pub storage_path: Option<PathBuf>,
    /// Value sent as the `anthropic-beta` header on OAuth API calls.
    pub anthropic_beta: String,
    /// Secret-store platform override. Defaults to the detected platform.
    pub platform: Option<Platform>,
    /// Remote endpoint overrides.
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            anthropic_beta: "oauth-2025-04-20".to_owned(),
            platform: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl ClientConfig {
    pub fn storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| state_dir().join("accounts.enc"))
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }
}

/// Resolve the state directory for keyrack data.
///
/// Checks `KEYRACK_STATE_DIR`, then `$XDG_STATE_HOME/keyrack`,
/// then `$HOME/.local/state/keyrack`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KEYRACK_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("keyrack");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/keyrack");
    }
    PathBuf::from(".keyrack")
}
