// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encrypted account store: one file, one document, rewritten whole on
//! every mutation.
//!
//! The document is serialized JSON sealed by [`CryptoBox`]. A missing
//! file is the only silently absorbed failure (fresh empty state);
//! anything else surfaces as [`Error::Storage`]. Mutations are
//! read-modify-write under an in-process lock; cross-process writers are
//! not coordinated.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoBox;
use crate::error::Error;

/// Prefix identifying organization admin API keys.
pub const ADMIN_KEY_PREFIX: &str = "sk-ant-admin";

/// A stored credential. The wire form is a compact camelCase JSON object
/// whose variant is inferred by shape: an `apiKey` field means admin, an
/// `accessToken` field means OAuth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    #[serde(rename_all = "camelCase")]
    OAuth {
        access_token: String,
        #[serde(default)]
        refresh_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Admin { api_key: String },
}

impl Credential {
    /// Parse a credential blob.
    pub fn parse(blob: &str) -> Result<Self, Error> {
        serde_json::from_str(blob)
            .map_err(|e| Error::storage(format!("malformed credential blob: {e}")))
    }

    /// Serialize to the compact blob form.
    pub fn to_blob(&self) -> Result<String, Error> {
        serde_json::to_string(self)
            .map_err(|e| Error::storage(format!("credential serialization failed: {e}")))
    }

    /// Infer the account type when no stored metadata says otherwise.
    ///
    /// Admin keys saved by older versions look like OAuth blobs with an
    /// empty refresh token; the key prefix disambiguates them.
    pub fn infer_type(&self) -> AccountType {
        match self {
            Self::Admin { .. } => AccountType::Admin,
            Self::OAuth { access_token, .. } if access_token.starts_with(ADMIN_KEY_PREFIX) => {
                AccountType::Admin
            }
            Self::OAuth { .. } => AccountType::Oauth,
        }
    }

    /// The token sent as the bearer/key on usage calls.
    pub fn secret(&self) -> &str {
        match self {
            Self::OAuth { access_token, .. } => access_token,
            Self::Admin { api_key } => api_key,
        }
    }
}

/// Kind of credential an account holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Oauth,
    Admin,
}

/// A named account and its serialized credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique, case-sensitive display name. The only stable identifier.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub account_type: AccountType,
    /// Serialized [`Credential`] blob.
    pub credentials: String,
    /// Epoch milliseconds of the last save.
    pub saved_at: u64,
}

/// The entire persisted state. Account order is insertion order and is
/// display order only; nothing keys off position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsData {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_account: Option<String>,
}

impl AccountsData {
    pub fn get(&self, name: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.name == name)
    }
}

/// Persistence for [`AccountsData`], encrypted at rest.
pub struct AccountStore {
    path: PathBuf,
    crypto: CryptoBox,
    /// Serializes read-modify-write cycles within this process. Writers in
    /// other processes still race last-writer-wins on the whole file.
    write_lock: Mutex<()>,
}

impl AccountStore {
    pub fn new(path: PathBuf, crypto: CryptoBox) -> Self {
        Self { path, crypto, write_lock: Mutex::new(()) }
    }

    /// Load and decrypt the full document. A missing file yields fresh
    /// empty state.
    pub fn load(&self) -> Result<AccountsData, Error> {
        let envelope = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AccountsData::default());
            }
            Err(e) => return Err(Error::storage(format!("read {}: {e}", self.path.display()))),
        };
        let plaintext = self.crypto.decrypt(&envelope)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| Error::storage(format!("malformed account store: {e}")))
    }

    /// Upsert an account by name.
    ///
    /// An existing entry is replaced in place (position preserved). Email
    /// and account type recorded earlier are kept unless re-supplied.
    pub fn save_account(
        &self,
        name: &str,
        credentials: &str,
        email: Option<&str>,
        account_type: Option<AccountType>,
    ) -> Result<(), Error> {
        let _guard = self.lock();
        let mut data = self.load()?;
        let saved_at = epoch_millis();

        if let Some(existing) = data.accounts.iter_mut().find(|a| a.name == name) {
            existing.credentials = credentials.to_owned();
            existing.saved_at = saved_at;
            if let Some(email) = email {
                existing.email = Some(email.to_owned());
            }
            if let Some(account_type) = account_type {
                existing.account_type = account_type;
            }
        } else {
            let account_type = account_type
                .map_or_else(|| Credential::parse(credentials).map(|c| c.infer_type()), Ok)?;
            data.accounts.push(Account {
                name: name.to_owned(),
                email: email.map(str::to_owned),
                account_type,
                credentials: credentials.to_owned(),
                saved_at,
            });
        }

        self.write(&data)
    }

    /// Remove an account by name. Returns `false` on a miss. Clears the
    /// active pointer when it referenced the removed account.
    pub fn delete_account(&self, name: &str) -> Result<bool, Error> {
        let _guard = self.lock();
        let mut data = self.load()?;
        let before = data.accounts.len();
        data.accounts.retain(|a| a.name != name);
        if data.accounts.len() == before {
            return Ok(false);
        }
        if data.active_account.as_deref() == Some(name) {
            data.active_account = None;
        }
        self.write(&data)?;
        Ok(true)
    }

    /// Rename an account. Returns `false` when `old` is absent; fails when
    /// `new` already exists. The active pointer follows the rename.
    pub fn rename_account(&self, old: &str, new: &str) -> Result<bool, Error> {
        let _guard = self.lock();
        let mut data = self.load()?;
        if data.get(old).is_none() {
            return Ok(false);
        }
        if old != new && data.get(new).is_some() {
            return Err(Error::storage(format!("account already exists: {new}")));
        }
        if let Some(account) = data.accounts.iter_mut().find(|a| a.name == old) {
            account.name = new.to_owned();
        }
        if data.active_account.as_deref() == Some(old) {
            data.active_account = Some(new.to_owned());
        }
        self.write(&data)?;
        Ok(true)
    }

    /// Set (or clear) the active account. The name must exist.
    pub fn set_active_account(&self, name: Option<&str>) -> Result<(), Error> {
        let _guard = self.lock();
        let mut data = self.load()?;
        if let Some(name) = name {
            if data.get(name).is_none() {
                return Err(Error::AccountNotFound(name.to_owned()));
            }
            data.active_account = Some(name.to_owned());
        } else {
            data.active_account = None;
        }
        self.write(&data)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // A poisoned lock only means another writer panicked mid-cycle;
        // the on-disk document is still a complete snapshot.
        self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Encrypt and atomically replace the store file.
    fn write(&self, data: &AccountsData) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::storage(format!("create {}: {e}", parent.display())))?;
            }
        }

        let plaintext = serde_json::to_vec(data)
            .map_err(|e| Error::storage(format!("account store serialization failed: {e}")))?;
        let envelope = self.crypto.encrypt(&plaintext)?;

        // Unique temp name so racing writers from other processes never
        // interleave partial contents; rename makes the swap atomic.
        let suffix: u32 = rand::rng().random();
        let tmp_name = format!(
            "{}.{}.{suffix:08x}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
        );
        let tmp_path = self.path.with_file_name(tmp_name);

        std::fs::write(&tmp_path, &envelope)
            .map_err(|e| Error::storage(format!("write {}: {e}", tmp_path.display())))?;
        restrict_permissions(&tmp_path);
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| Error::storage(format!("rename to {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) {}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
