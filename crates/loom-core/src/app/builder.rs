//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # 方針
//! - Builder パターン（Store や Clock はすべて明示的に渡す。シングルトンなし）
//! - 起動時検証（Fail-fast 設計）
//! - 明確なエラーメッセージ

use std::sync::Arc;

use crate::app::dispatcher::Dispatcher;
use crate::app::Scheduler;
use crate::config::{ConfigError, SchedulerConfig};
use crate::domain::{Decider, DefaultDecider, SyncDomain};
use crate::ports::{AccountResolver, Clock, IdGenerator, JobStore, SyncCollaborator, SystemClock, UlidGenerator};
use crate::queue::{Governor, JitterSource, ThreadRngJitter};
use crate::runtime::{CollaboratorRegistry, JobExecutor, RegistryError};

/// SchedulerBuilder は Scheduler を構築
///
/// # 使用例
/// ```ignore
/// let scheduler = Scheduler::builder()
///     .store(Arc::new(store))
///     .accounts(Arc::new(directory))
///     .register(SyncDomain::Email, Arc::new(MailSync))?
///     .expect_domains(&SyncDomain::ALL)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_domains() で期待されるドメインを登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct SchedulerBuilder {
    store: Option<Arc<dyn JobStore>>,
    accounts: Option<Arc<dyn AccountResolver>>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    ids: Option<Arc<dyn IdGenerator>>,
    decider: Option<Arc<dyn Decider>>,
    governor: Option<Governor>,
    registry: CollaboratorRegistry,
    config: SchedulerConfig,
    expected_domains: Option<Vec<SyncDomain>>,
}

/// BuildError はスケジューラ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no job store configured")]
    MissingStore,

    #[error("no account resolver configured")]
    MissingAccounts,

    #[error("Missing collaborators: {0:?}. These domains were expected but not registered.")]
    MissingCollaborators(Vec<SyncDomain>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            accounts: None,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(ThreadRngJitter),
            ids: None,
            decider: None,
            governor: None,
            registry: CollaboratorRegistry::new(),
            config: SchedulerConfig::default(),
            expected_domains: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn accounts(mut self, accounts: Arc<dyn AccountResolver>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 既定は ThreadRngJitter。テストでは NoJitter / SeededJitter
    pub fn jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 既定は config の backoff から作る DefaultDecider
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// 既存の Governor を共有する（複数スケジューラで同じ上限を守る）
    pub fn governor(mut self, governor: Governor) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Collaborator を登録
    pub fn register(
        mut self,
        domain: SyncDomain,
        collaborator: Arc<dyn SyncCollaborator>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(domain, collaborator)?;
        Ok(self)
    }

    /// 期待されるドメインのリストを設定
    pub fn expect_domains(mut self, domains: &[SyncDomain]) -> Self {
        self.expected_domains = Some(domains.to_vec());
        self
    }

    /// # 検証
    /// - config.validate()
    /// - store / accounts が設定されているか
    /// - expect_domains() のドメインがすべて登録されているか
    pub fn build(self) -> Result<Scheduler, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let accounts = self.accounts.ok_or(BuildError::MissingAccounts)?;

        if let Some(expected) = &self.expected_domains {
            let registered = self.registry.domains();
            let missing: Vec<SyncDomain> = expected
                .iter()
                .filter(|d| !registered.contains(d))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingCollaborators(missing));
            }
        }

        let clock = self.clock;
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(self.config.retry_policy(), self.jitter))
        });
        let governor = self
            .governor
            .unwrap_or_else(|| Governor::new(self.config.concurrency, self.config.fairness));
        let executor = JobExecutor::new(
            Arc::new(self.registry),
            Arc::clone(&accounts),
            self.config.job_timeout(),
        );

        let dispatcher = Dispatcher {
            store: Arc::clone(&store),
            governor,
            executor: Arc::new(executor),
            decider,
            clock: Arc::clone(&clock),
            candidate_window: self.config.candidate_window,
        };

        Ok(Scheduler {
            store,
            accounts,
            clock,
            ids,
            config: self.config,
            dispatcher,
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
