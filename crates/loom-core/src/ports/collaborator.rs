//! Collaborator ports - 外部同期処理とアカウント解決
//!
//! スケジューラはプロトコル（IMAP / CalDAV など）を知りません。
//! 成功・一時失敗・恒久失敗と件数だけを受け取ります。

use async_trait::async_trait;

use crate::domain::{Account, AccountId, SyncError, SyncReport};

/// ドメインごとの同期処理
///
/// # 冪等性
/// - 実行は at-least-once（クラッシュ後に再実行されうる）
/// - 実装側で冪等にすること
#[async_trait]
pub trait SyncCollaborator: Send + Sync {
    async fn sync(
        &self,
        account: &Account,
        payload: &serde_json::Value,
    ) -> Result<SyncReport, SyncError>;
}

/// アカウントの読み取り専用解決
///
/// - `Ok(None)`: アカウントが存在しない
/// - `Err(_)`: 解決自体に失敗した（一時的とみなす）
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve(&self, id: AccountId) -> Result<Option<Account>, SyncError>;
}
