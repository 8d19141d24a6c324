//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（SQLite、プロトコルアダプタ、アカウント管理）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - JobStore が source of truth（正本）
//! - 時刻と ID は差し替え可能（テストの決定性）

pub mod clock;
pub mod collaborator;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::collaborator::{AccountResolver, SyncCollaborator};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
