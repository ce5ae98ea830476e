// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account orchestrator tying the flow, store, and usage modules
//! together.
//!
//! Management calls (`authenticate`, `save_*`, `delete_account`, ...)
//! surface errors. The usage path never does: token trouble is recovered
//! into a per-account `error` annotation so one bad account cannot sink
//! a fan-out over all of them.

use futures_util::future::join_all;

use crate::config::ClientConfig;
use crate::crypto::CryptoBox;
use crate::error::Error;
use crate::oauth::flow::{self, AuthorizeOptions};
use crate::secrets::{self, SecretStore};
use crate::store::{Account, AccountStore, AccountType, AccountsData, Credential, ADMIN_KEY_PREFIX};
use crate::token::{self, RefreshOutcome, NEAR_EXPIRY_MINUTES};
use crate::usage::{self, AccountUsage, UsageData};

/// High-level entry point over a single encrypted account store.
pub struct Client {
    store: AccountStore,
    http: reqwest::Client,
    config: ClientConfig,
    secrets: Box<dyn SecretStore>,
}

impl Client {
    /// Build a client with the platform defaults for the machine key,
    /// secret store, and storage path.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let crypto = CryptoBox::new()?;
        let store = AccountStore::new(config.storage_path(), crypto);
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::storage(format!("http client init failed: {e}")))?;
        let secrets = secrets::platform_store(config.platform());
        Ok(Self::with_parts(config, store, http, secrets))
    }

    /// Assemble a client from explicit collaborators.
    pub fn with_parts(
        config: ClientConfig,
        store: AccountStore,
        http: reqwest::Client,
        secrets: Box<dyn SecretStore>,
    ) -> Self {
        Self { store, http, config, secrets }
    }

    /// Full stored state: accounts plus the active-account pointer.
    pub fn list_accounts(&self) -> Result<AccountsData, Error> {
        self.store.load()
    }

    /// Run the browser authorization flow and store the result under
    /// `name`.
    pub async fn authenticate(
        &self,
        name: &str,
        options: AuthorizeOptions,
    ) -> Result<Account, Error> {
        let blob = flow::authorize(&self.http, &self.config.endpoints, options).await?;
        self.store.save_account(name, &blob, None, Some(AccountType::Oauth))?;
        self.saved(name)
    }

    /// Store a credential blob under `name`. With no blob, import from
    /// the platform secret store; an empty secret store is an
    /// authentication error.
    pub async fn save_account(
        &self,
        name: &str,
        credentials: Option<&str>,
    ) -> Result<Account, Error> {
        let (blob, email) = match credentials {
            Some(blob) => (blob.to_owned(), None),
            None => {
                let raw = self
                    .secrets
                    .read()
                    .map_err(|e| Error::auth(format!("secret store read failed: {e}")))?
                    .ok_or_else(|| Error::auth("no credentials found in the secret store"))?;
                let imported = secrets::normalize(&raw)
                    .map_err(|e| Error::auth(format!("unrecognized secret store payload: {e}")))?;
                (imported.credentials, imported.email)
            }
        };
        // Reject junk before it reaches the store.
        let account_type = Credential::parse(&blob)?.infer_type();
        self.store.save_account(name, &blob, email.as_deref(), Some(account_type))?;
        self.saved(name)
    }

    /// Validate and store an admin API key. The prefix check happens
    /// locally; a failing remote probe aborts the save.
    pub async fn save_admin_account(&self, name: &str, api_key: &str) -> Result<Account, Error> {
        if !api_key.starts_with(ADMIN_KEY_PREFIX) {
            return Err(Error::auth(format!(
                "admin API keys must start with {ADMIN_KEY_PREFIX}"
            )));
        }
        usage::probe_admin_key(&self.http, &self.config.endpoints, api_key).await?;

        let blob = Credential::Admin { api_key: api_key.to_owned() }.to_blob()?;
        self.store.save_account(name, &blob, None, Some(AccountType::Admin))?;
        self.saved(name)
    }

    pub fn switch_account(&self, name: &str) -> Result<(), Error> {
        self.store.set_active_account(Some(name))
    }

    /// Returns `false` on a miss rather than erroring.
    pub fn delete_account(&self, name: &str) -> Result<bool, Error> {
        self.store.delete_account(name)
    }

    /// Returns `false` when `old` is absent; a taken `new` name errors.
    pub fn rename_account(&self, old: &str, new: &str) -> Result<bool, Error> {
        self.store.rename_account(old, new)
    }

    /// Re-run the browser authorization flow for an existing OAuth
    /// account, replacing its credentials.
    pub async fn refresh_account(
        &self,
        name: &str,
        options: AuthorizeOptions,
    ) -> Result<Account, Error> {
        let account = self.saved(name)?;
        if account.account_type == AccountType::Admin {
            return Err(Error::auth("admin accounts cannot be re-authorized"));
        }
        self.authenticate(name, options).await
    }

    /// Fetch usage for one account. Token trouble comes back as the
    /// result's `error` field; only a missing account or a broken store
    /// is an `Err`.
    pub async fn get_account_usage(&self, name: &str) -> Result<AccountUsage, Error> {
        let account = self.saved(name)?;
        Ok(self.usage_for(&account).await)
    }

    /// Fetch usage for every stored account concurrently. One result per
    /// account, in stored order; failures never cross accounts.
    pub async fn get_all_accounts_usage(&self) -> Result<Vec<AccountUsage>, Error> {
        let data = self.store.load()?;
        let fetches = data.accounts.iter().map(|account| self.usage_for(account));
        Ok(join_all(fetches).await)
    }

    async fn usage_for(&self, account: &Account) -> AccountUsage {
        let outcome = match account.account_type {
            AccountType::Admin => self.admin_usage(account).await,
            AccountType::Oauth => self.oauth_usage(account).await,
        };
        let (usage, error) = match outcome {
            Ok(usage) => (Some(usage), None),
            Err(error) => (None, Some(error)),
        };
        AccountUsage {
            name: account.name.clone(),
            account_type: account.account_type,
            email: account.email.clone(),
            usage,
            error,
        }
    }

    async fn admin_usage(&self, account: &Account) -> Result<UsageData, String> {
        let credential = Credential::parse(&account.credentials).map_err(|e| e.to_string())?;
        usage::fetch_admin_usage(&self.http, &self.config.endpoints, credential.secret())
            .await
            .map_err(|e| e.to_string())
    }

    /// Per-account usage state machine.
    ///
    /// Expired blobs must refresh before the usage call and fail the
    /// account if they cannot. Near-expiry blobs refresh best-effort and
    /// continue either way. A 401 from the usage endpoint earns exactly
    /// one refresh-and-retry.
    async fn oauth_usage(&self, account: &Account) -> Result<UsageData, String> {
        let mut blob = account.credentials.clone();

        let status = token::validate(&blob);
        if status.is_expired {
            match self.refresh_and_persist(&account.name, &blob).await {
                Ok(refreshed) => blob = refreshed,
                Err(_) => return Err("Token expired — refresh failed".to_owned()),
            }
        } else if status.minutes_until_expiry.is_some_and(|m| m < NEAR_EXPIRY_MINUTES) {
            if let Ok(refreshed) = self.refresh_and_persist(&account.name, &blob).await {
                blob = refreshed;
            }
        }

        match self.fetch_oauth_usage(&blob).await {
            Err(err) if err.is_unauthorized() => {
                let refreshed = self
                    .refresh_and_persist(&account.name, &blob)
                    .await
                    .map_err(|e| format!("unauthorized and refresh failed: {e}"))?;
                self.fetch_oauth_usage(&refreshed).await.map_err(|e| e.to_string())
            }
            other => other.map_err(|e| e.to_string()),
        }
    }

    async fn fetch_oauth_usage(&self, blob: &str) -> Result<UsageData, usage::UsageError> {
        let credential =
            Credential::parse(blob).map_err(|e| usage::UsageError::Other(e.to_string()))?;
        usage::fetch_oauth_usage(
            &self.http,
            &self.config.endpoints,
            credential.secret(),
            &self.config.anthropic_beta,
        )
        .await
    }

    /// Refresh a blob and write the replacement back. A refresh that
    /// succeeds but fails to persist still returns the new blob; the
    /// stale file only costs a repeat refresh next run.
    async fn refresh_and_persist(&self, name: &str, blob: &str) -> Result<String, String> {
        match token::refresh(&self.http, &self.config.endpoints, blob).await {
            RefreshOutcome::Refreshed { credentials } => {
                if let Err(e) = self.store.save_account(name, &credentials, None, None) {
                    tracing::warn!(account = name, err = %e, "failed to persist refreshed credentials");
                }
                Ok(credentials)
            }
            RefreshOutcome::Failed { error } => {
                tracing::debug!(account = name, error, "token refresh failed");
                Err(error)
            }
        }
    }

    fn saved(&self, name: &str) -> Result<Account, Error> {
        let data = self.store.load()?;
        data.get(name).cloned().ok_or_else(|| Error::AccountNotFound(name.to_owned()))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
