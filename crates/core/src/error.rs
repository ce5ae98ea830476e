// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds surfaced by the keyrack public API.

use std::fmt;

/// Errors surfaced by account management and credential operations.
///
/// Usage-fetch paths do not raise these per account; failures there are
/// folded into the per-account result (see [`crate::usage::AccountUsage`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// OAuth flow, admin-probe, or API auth failure. Carries the HTTP
    /// status where one is known.
    Authentication { message: String, status: Option<u16> },
    /// Store read/write/decrypt failure.
    Storage(String),
    /// Lookup miss by account name.
    AccountNotFound(String),
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), status: None }
    }

    pub fn auth_status(message: impl Into<String>, status: u16) -> Self {
        Self::Authentication { message: message.into(), status: Some(status) }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication { message, status: Some(code) } => {
                write!(f, "authentication failed ({code}): {message}")
            }
            Self::Authentication { message, status: None } => {
                write!(f, "authentication failed: {message}")
            }
            Self::Storage(message) => write!(f, "storage error: {message}"),
            Self::AccountNotFound(name) => write!(f, "account not found: {name}"),
        }
    }
}

impl std::error::Error for Error {}
