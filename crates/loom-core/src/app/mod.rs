//! App - アプリケーション層
//!
//! ports を組み合わせてスケジューラを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: スケジューラの構築とワイヤリング
//! - **Scheduler**: enqueue / 実行 / 運用操作の入口
//! - **Dispatcher**: 1 回の実行ループ（claim→execute→decide→complete）

pub mod builder;
pub(crate) mod dispatcher;
pub mod scheduler;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::scheduler::Scheduler;
