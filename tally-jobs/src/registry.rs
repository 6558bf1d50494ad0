//! Account registry collaborator.
//!
//! Supplies the accounts the daily job computes metrics for. Read-only.

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{AccountId, TallyResult};
use tally_storage::constants::USERS_COLLECTION;
use tally_storage::DocumentStore;

use crate::constants::ACCOUNT_EMAIL_FIELD;

/// Enumerates registered accounts.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    async fn accounts(&self) -> TallyResult<Vec<AccountId>>;
}

/// Fixed list of accounts.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountRegistry {
    accounts: Vec<AccountId>,
}

impl StaticAccountRegistry {
    pub fn new<I, A>(accounts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AccountId>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AccountRegistry for StaticAccountRegistry {
    async fn accounts(&self) -> TallyResult<Vec<AccountId>> {
        Ok(self.accounts.clone())
    }
}

/// Accounts read from the `users` collection, one per `email` field.
///
/// Users without an email are skipped; duplicates are collapsed.
pub struct StoreAccountRegistry<S: DocumentStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DocumentStore + ?Sized> StoreAccountRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: DocumentStore + ?Sized> AccountRegistry for StoreAccountRegistry<S> {
    async fn accounts(&self) -> TallyResult<Vec<AccountId>> {
        let users = self.store.query(USERS_COLLECTION, &[]).await?;
        let mut accounts: Vec<AccountId> = users
            .iter()
            .filter_map(|user| user.get_str(ACCOUNT_EMAIL_FIELD))
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .collect();
        accounts.sort();
        accounts.dedup();
        Ok(accounts)
    }
}
