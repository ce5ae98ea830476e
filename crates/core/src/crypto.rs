// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-keyed sealed box for the account store.
//!
//! The AES-256-GCM key is re-derived on every construction from a stable
//! machine identifier, so no key material is ever written to disk. Moving
//! the store file to another machine makes it undecryptable by design.

use std::num::NonZeroU32;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::Rng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Application name mixed into the key derivation input.
const APP_NAME: &str = "keyrack";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Authenticated encryption bound to the local machine identity.
pub struct CryptoBox {
    key: LessSafeKey,
}

impl CryptoBox {
    /// Build a box keyed from the detected machine identifier.
    pub fn new() -> Result<Self, Error> {
        Self::with_machine_id(&machine_id())
    }

    /// Build a box keyed from an explicit identifier. Same identifier,
    /// same key; this is what makes the derivation reproducible.
    pub fn with_machine_id(id: &str) -> Result<Self, Error> {
        let key_bytes = derive_key(id);
        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| Error::storage("key derivation produced unusable key"))?;
        Ok(Self { key: LessSafeKey::new(unbound) })
    }

    /// Encrypt `plaintext` into a base64 envelope:
    /// `base64(nonce(12) || tag(16) || ciphertext)`.
    ///
    /// A fresh random nonce is drawn per call; GCM nonce reuse under a
    /// fixed key would be catastrophic.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);

        let mut in_out = plaintext.to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| Error::storage("encryption failed"))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + TAG_LEN + in_out.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(tag.as_ref());
        envelope.extend_from_slice(&in_out);
        Ok(B64.encode(envelope))
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails closed: any tamper, truncation, or non-envelope input yields
    /// an error, never partial plaintext.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, Error> {
        let raw = B64
            .decode(envelope.trim())
            .map_err(|e| Error::storage(format!("malformed envelope: {e}")))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::storage("envelope too short"));
        }

        let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        // ring verifies the tag appended after the ciphertext, so rebuild
        // the buffer in that order from the envelope's tag-first layout.
        let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| Error::storage("malformed envelope nonce"))?;
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::storage("decryption failed (tampered or foreign envelope)"))?;
        Ok(plaintext.to_vec())
    }
}

/// PBKDF2-HMAC-SHA256 over `machineId + app name`, salted with
/// `sha256(machineId)`. Deterministic for a given machine.
fn derive_key(machine_id: &str) -> [u8; KEY_LEN] {
    let salt = Sha256::digest(machine_id.as_bytes());
    let secret = format!("{machine_id}{APP_NAME}");
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN);
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, iterations, &salt, secret.as_bytes(), &mut key);
    key
}

/// Stable machine identifier with a hostname-shaped fallback.
fn machine_id() -> String {
    platform_machine_id().unwrap_or_else(fallback_machine_id)
}

#[cfg(target_os = "linux")]
fn platform_machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_owned());
            }
        }
    }
    None
}

#[cfg(target_os = "macos")]
fn platform_machine_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().find(|l| l.contains("IOPlatformUUID"))?;
    let uuid = line.split('"').nth(3)?;
    if uuid.is_empty() {
        None
    } else {
        Some(uuid.to_owned())
    }
}

#[cfg(target_os = "windows")]
fn platform_machine_id() -> Option<String> {
    let output = std::process::Command::new("reg")
        .args(["query", r"HKLM\SOFTWARE\Microsoft\Cryptography", "/v", "MachineGuid"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().find(|l| l.contains("MachineGuid"))?;
    line.split_whitespace().last().map(str::to_owned)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_machine_id() -> Option<String> {
    None
}

fn fallback_machine_id() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "keyrack-host".to_owned())
}

#[cfg(test)]
#[path = "crypto_tests.rs"]
mod tests;
