// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyrack: encrypted multi-account credential store for the Claude API.
//!
//! Accounts are named credential blobs (OAuth token pairs or admin API
//! keys) kept in one AES-256-GCM-encrypted file whose key derives from a
//! machine identifier. [`client::Client`] is the entry point; everything
//! below it (browser flow, token lifecycle, usage fetchers) is reachable
//! for callers that want the pieces individually.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod oauth;
pub mod secrets;
pub mod store;
pub mod token;
pub mod usage;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::Client;
pub use config::{ClientConfig, Endpoints, Platform};
pub use error::Error;
pub use oauth::flow::AuthorizeOptions;
pub use store::{Account, AccountType, AccountsData, Credential};
pub use token::TokenStatus;
pub use usage::{AccountUsage, UsageData};
