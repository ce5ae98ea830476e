// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret-store collaborator: reads Claude Code's locally saved login.
//!
//! One capability (`read`), implemented per platform. The core never
//! branches on the OS itself; it asks [`platform_store`] for the right
//! variant and treats the result as an opaque external input. A missing
//! secret is `Ok(None)`, not an error.

use std::path::PathBuf;
use std::process::Command;

use crate::config::Platform;
use crate::store::Credential;

/// Keychain / secret-service entry written by Claude Code.
const SERVICE_NAME: &str = "Claude Code-credentials";

/// Read capability over the platform secret store.
pub trait SecretStore: Send + Sync {
    /// Returns the raw credential JSON, or `None` when nothing is stored.
    fn read(&self) -> anyhow::Result<Option<String>>;
}

/// Select the secret-store variant for a platform.
pub fn platform_store(platform: Platform) -> Box<dyn SecretStore> {
    match platform {
        Platform::Darwin => Box::new(DarwinKeychain),
        Platform::Linux => Box::new(LinuxSecretService { fallback: credentials_file() }),
        Platform::Windows => Box::new(CredentialsFile { path: credentials_file() }),
    }
}

/// Credential imported from the secret store, normalized from the
/// `claudeAiOauth` payload shape.
#[derive(Debug, Clone)]
pub struct ImportedCredential {
    /// Serialized [`Credential`] blob.
    pub credentials: String,
    pub email: Option<String>,
}

/// Normalize a raw secret-store payload into a credential blob.
///
/// Accepts either the `{"claudeAiOauth": {...}}` wrapper Claude Code
/// writes or an already-bare credential object.
pub fn normalize(raw: &str) -> anyhow::Result<ImportedCredential> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let oauth = value.get("claudeAiOauth").unwrap_or(&value);

    let access_token = oauth
        .get("accessToken")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("secret store payload has no accessToken"))?;
    let refresh_token =
        oauth.get("refreshToken").and_then(serde_json::Value::as_str).unwrap_or_default();
    let expires_at = oauth.get("expiresAt").and_then(serde_json::Value::as_u64);
    let email = oauth
        .get("email")
        .or_else(|| oauth.get("account").and_then(|a| a.get("email")))
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);

    let blob = Credential::OAuth {
        access_token: access_token.to_owned(),
        refresh_token: refresh_token.to_owned(),
        expires_at,
    }
    .to_blob()?;
    Ok(ImportedCredential { credentials: blob, email })
}

/// macOS: `security find-generic-password -s <service> -w`.
struct DarwinKeychain;

impl SecretStore for DarwinKeychain {
    fn read(&self) -> anyhow::Result<Option<String>> {
        run_lookup("security", &["find-generic-password", "-s", SERVICE_NAME, "-w"])
    }
}

/// Linux: secret-service via `secret-tool`, falling back to the
/// credentials file for headless hosts.
struct LinuxSecretService {
    fallback: PathBuf,
}

impl SecretStore for LinuxSecretService {
    fn read(&self) -> anyhow::Result<Option<String>> {
        if let Some(secret) = run_lookup("secret-tool", &["lookup", "service", SERVICE_NAME])? {
            return Ok(Some(secret));
        }
        read_file(&self.fallback)
    }
}

/// Windows (and file-only setups): plain credentials-file read.
struct CredentialsFile {
    path: PathBuf,
}

impl SecretStore for CredentialsFile {
    fn read(&self) -> anyhow::Result<Option<String>> {
        read_file(&self.path)
    }
}

fn credentials_file() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home).join(".claude/.credentials.json")
}

fn run_lookup(program: &str, args: &[&str]) -> anyhow::Result<Option<String>> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        // Tool not installed counts as "nothing stored".
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(anyhow::anyhow!("{program} failed to run: {e}")),
    };
    if !output.status.success() {
        return Ok(None);
    }
    let secret = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    Ok(if secret.is_empty() { None } else { Some(secret) })
}

fn read_file(path: &std::path::Path) -> anyhow::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("read {}: {e}", path.display())),
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
