//! Errors - 同期エラーの分類
//!
//! コラボレータ（IMAP/CalDAV などのアダプタ）は失敗を
//! Transient / Permanent に分類して返します。スケジューラは分類だけを見て
//! リトライするか dead-letter にするかを決めます。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ErrorKind は実行エラーの運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 一時的なエラー（タイムアウト、レート制限、5xx など）。バックオフ付きでリトライ。
    Transient,
    /// 恒久的なエラー（認証情報不正、payload 不正、リソースなし）。即 dead-letter。
    Permanent,
}

/// A classified failure reported by a domain collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} sync error: {message}")]
pub struct SyncError {
    kind: ErrorKind,
    message: String,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}
