//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

/// IdGenerator はジョブ ID を生成
///
/// # ULID の特性
/// - 時刻でソート可能
/// - 調整なしで生成可能
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// UlidGenerator は Clock の時刻で ULID を生成
///
/// 同一ミリ秒内では単調増加する（ulid::Generator）。
/// これにより id 順が enqueue 順と一致する。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
    generator: Mutex<ulid::Generator>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            generator: Mutex::new(ulid::Generator::new()),
        }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_job_id(&self) -> JobId {
        let at = SystemTime::from(self.clock.now());
        let mut generator = self.generator.lock().unwrap_or_else(PoisonError::into_inner);
        let ulid = generator
            .generate_from_datetime(at)
            .unwrap_or_else(|_| Ulid::from_datetime(at));
        JobId::from_ulid(ulid)
    }
}
