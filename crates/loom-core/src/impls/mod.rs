//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **SqliteJobStore**: 永続的な JobStore（本番用）
//! - **InMemoryAccountDirectory**: 開発用の AccountResolver
//!
//! プロセス内の JobStore（InMemoryJobStore）は `queue` にあります。

pub mod account_directory;
pub mod sqlite_store;

pub use self::account_directory::InMemoryAccountDirectory;
pub use self::sqlite_store::{SqliteJobStore, SqliteStoreOptions};
