//! InMemoryAccountDirectory - 開発用のアカウント解決
//!
//! 本番ではアプリ側のアカウント管理が AccountResolver を実装します。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Account, AccountId, SyncError};
use crate::ports::AccountResolver;

#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountDirectory {
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let accounts = accounts.into_iter().map(|a| (a.id, a)).collect();
        Self {
            accounts: Arc::new(RwLock::new(accounts)),
        }
    }

    pub async fn insert(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// 削除済みアカウントのジョブは恒久失敗になる
    pub async fn remove(&self, id: AccountId) -> Option<Account> {
        self.accounts.write().await.remove(&id)
    }
}

#[async_trait]
impl AccountResolver for InMemoryAccountDirectory {
    async fn resolve(&self, id: AccountId) -> Result<Option<Account>, SyncError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_accounts_only() {
        let account = Account::new(AccountId::generate(), "imap", "Work", "me@example.com");
        let directory = InMemoryAccountDirectory::with_accounts([account.clone()]);

        assert_eq!(directory.resolve(account.id).await.unwrap(), Some(account.clone()));
        assert_eq!(directory.resolve(AccountId::generate()).await.unwrap(), None);

        directory.remove(account.id).await;
        assert_eq!(directory.resolve(account.id).await.unwrap(), None);
    }
}
