//! Recovery accounts and their vaults.
//!
//! An account is addressed by email and owns a stack of vaults; only
//! the most recent vault is live. A vault stores opaque encrypted
//! items addressed by content hash and is opened through one of its
//! authentication methods. Key rotation pushes a fresh vault carrying
//! re-encrypted items; older vaults stay readable for audit but accept
//! no new material.

use velum_core::crypto::HashDigest;
use velum_core::id::{AccountVaultId, EmailAddress};
use velum_core::time::Timestamp;
use velum_store::{AccountEntry, AuthMethodEntry, OrgState, VaultEntry, VaultItem};

use crate::auth::AnonymousContext;

/// Failure creating an account.
#[derive(Debug, thiserror::Error)]
pub enum CreateAccountError {
    #[error("an account already exists for this email")]
    AccountAlreadyExists,
}

/// Failure of an account-authenticated operation.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("account not found")]
    AccountNotFound,
    #[error("unknown or disabled authentication method")]
    BadAuthenticationInfo,
    #[error("an item with this fingerprint already holds different data")]
    ItemFingerprintMismatch,
    #[error("authentication method already exists")]
    AuthMethodAlreadyExists,
    #[error("authentication method not found")]
    AuthMethodNotFound,
    #[error("cannot disable the last enabled authentication method")]
    LastAuthMethod,
}

/// One row of a vault item listing.
#[derive(Debug, Clone)]
pub struct VaultItemRow {
    pub fingerprint: HashDigest,
    pub data: Vec<u8>,
}

/// The account component.
pub struct AccountComponent;

impl AccountComponent {
    pub fn new() -> Self {
        Self
    }

    /// Create an account with its first vault and auth method.
    pub fn create(
        &self,
        ctx: &AnonymousContext,
        email: EmailAddress,
        auth_method_id: HashDigest,
        vault_key_access: Vec<u8>,
    ) -> Result<AccountVaultId, CreateAccountError> {
        let now = Timestamp::now();
        ctx.organization.with(|state| {
            if state.accounts.contains_key(&email) {
                return Err(CreateAccountError::AccountAlreadyExists);
            }
            let vault = new_vault(now, auth_method_id, vault_key_access);
            let vault_id = vault.id;
            state
                .accounts
                .insert(email, AccountEntry { vaults: vec![vault] });
            Ok(vault_id)
        })
    }

    /// Upload an item into the current vault.
    ///
    /// Idempotent when the same bytes are uploaded twice under the
    /// same fingerprint.
    pub fn vault_item_upload(
        &self,
        ctx: &AnonymousContext,
        email: &EmailAddress,
        auth_method_id: &HashDigest,
        data: Vec<u8>,
    ) -> Result<HashDigest, AccountError> {
        let fingerprint = HashDigest::from_data(&data);
        let now = Timestamp::now();
        ctx.organization.with(|state| {
            let vault = open_vault_mut(state, email, auth_method_id)?;
            if let Some(existing) = vault.items.get(&fingerprint) {
                if existing.data != data {
                    return Err(AccountError::ItemFingerprintMismatch);
                }
                return Ok(fingerprint);
            }
            vault.items.insert(
                fingerprint,
                VaultItem {
                    data,
                    created_on: now,
                },
            );
            Ok(fingerprint)
        })
    }

    /// List the current vault's items, fingerprint order.
    pub fn vault_item_list(
        &self,
        ctx: &AnonymousContext,
        email: &EmailAddress,
        auth_method_id: &HashDigest,
    ) -> Result<(AccountVaultId, Vec<VaultItemRow>), AccountError> {
        ctx.organization.with(|state| {
            let vault = open_vault(state, email, auth_method_id)?;
            let rows = vault
                .items
                .iter()
                .map(|(fingerprint, item)| VaultItemRow {
                    fingerprint: *fingerprint,
                    data: item.data.clone(),
                })
                .collect();
            Ok((vault.id, rows))
        })
    }

    /// Register a new way to open the current vault.
    pub fn auth_method_create(
        &self,
        ctx: &AnonymousContext,
        email: &EmailAddress,
        auth_method_id: &HashDigest,
        new_auth_method_id: HashDigest,
        vault_key_access: Vec<u8>,
    ) -> Result<(), AccountError> {
        let now = Timestamp::now();
        ctx.organization.with(|state| {
            let vault = open_vault_mut(state, email, auth_method_id)?;
            if vault.auth_methods.contains_key(&new_auth_method_id) {
                return Err(AccountError::AuthMethodAlreadyExists);
            }
            vault.auth_methods.insert(
                new_auth_method_id,
                AuthMethodEntry {
                    created_on: now,
                    vault_key_access,
                    disabled_on: None,
                },
            );
            Ok(())
        })
    }

    /// Disable an auth method. The last enabled one cannot go.
    pub fn auth_method_disable(
        &self,
        ctx: &AnonymousContext,
        email: &EmailAddress,
        auth_method_id: &HashDigest,
        target: &HashDigest,
    ) -> Result<(), AccountError> {
        let now = Timestamp::now();
        ctx.organization.with(|state| {
            let vault = open_vault_mut(state, email, auth_method_id)?;
            let enabled = vault
                .auth_methods
                .values()
                .filter(|m| m.disabled_on.is_none())
                .count();
            let method = vault
                .auth_methods
                .get_mut(target)
                .ok_or(AccountError::AuthMethodNotFound)?;
            if method.disabled_on.is_some() {
                return Err(AccountError::AuthMethodNotFound);
            }
            if enabled <= 1 {
                return Err(AccountError::LastAuthMethod);
            }
            method.disabled_on = Some(now);
            Ok(())
        })
    }

    /// Rotate the vault key: push a fresh vault with one auth method
    /// and the re-encrypted items. Fingerprints are recomputed from
    /// the migrated bytes.
    pub fn vault_key_rotation(
        &self,
        ctx: &AnonymousContext,
        email: &EmailAddress,
        auth_method_id: &HashDigest,
        new_auth_method_id: HashDigest,
        vault_key_access: Vec<u8>,
        items: Vec<Vec<u8>>,
    ) -> Result<AccountVaultId, AccountError> {
        let now = Timestamp::now();
        ctx.organization.with(|state| {
            // Authenticate against the current vault first
            open_vault(state, email, auth_method_id)?;

            let mut vault = new_vault(now, new_auth_method_id, vault_key_access);
            for data in items {
                let fingerprint = HashDigest::from_data(&data);
                vault.items.insert(
                    fingerprint,
                    VaultItem {
                        data,
                        created_on: now,
                    },
                );
            }
            let vault_id = vault.id;
            let account = state
                .accounts
                .get_mut(email)
                .ok_or(AccountError::AccountNotFound)?;
            account.vaults.push(vault);
            Ok(vault_id)
        })
    }
}

impl Default for AccountComponent {
    fn default() -> Self {
        Self::new()
    }
}

fn new_vault(now: Timestamp, auth_method_id: HashDigest, vault_key_access: Vec<u8>) -> VaultEntry {
    let mut auth_methods = std::collections::HashMap::new();
    auth_methods.insert(
        auth_method_id,
        AuthMethodEntry {
            created_on: now,
            vault_key_access,
            disabled_on: None,
        },
    );
    VaultEntry {
        id: AccountVaultId::new(),
        created_on: now,
        auth_methods,
        items: std::collections::BTreeMap::new(),
    }
}

fn open_vault<'a>(
    state: &'a OrgState,
    email: &EmailAddress,
    auth_method_id: &HashDigest,
) -> Result<&'a VaultEntry, AccountError> {
    let account = state
        .accounts
        .get(email)
        .ok_or(AccountError::AccountNotFound)?;
    let vault = account
        .current_vault()
        .ok_or(AccountError::AccountNotFound)?;
    match vault.auth_methods.get(auth_method_id) {
        Some(method) if method.disabled_on.is_none() => Ok(vault),
        _ => Err(AccountError::BadAuthenticationInfo),
    }
}

fn open_vault_mut<'a>(
    state: &'a mut OrgState,
    email: &EmailAddress,
    auth_method_id: &HashDigest,
) -> Result<&'a mut VaultEntry, AccountError> {
    let account = state
        .accounts
        .get_mut(email)
        .ok_or(AccountError::AccountNotFound)?;
    let vault = account
        .current_vault_mut()
        .ok_or(AccountError::AccountNotFound)?;
    match vault.auth_methods.get(auth_method_id) {
        Some(method) if method.disabled_on.is_none() => Ok(vault),
        _ => Err(AccountError::BadAuthenticationInfo),
    }
}
