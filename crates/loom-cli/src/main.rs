use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use loom_core::impls::{InMemoryAccountDirectory, SqliteJobStore};
use loom_core::ports::SyncCollaborator;
use loom_core::{Account, AccountId, Scheduler, SchedulerConfig, SyncDomain, SyncError, SyncReport, SyncRunSummary};

const DEFAULT_DATABASE: &str = "loom.db";

#[derive(Debug, Parser)]
#[command(name = "loom", version, about = "Durable sync-job scheduler")]
struct Cli {
    /// SQLite database file (`loom.db` for operator commands; the demo
    /// uses a throwaway database unless this is set)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// TOML config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Queue jobs for a few simulated accounts and run until drained
    Demo {
        #[arg(long, default_value_t = 3)]
        accounts: usize,

        /// Every Nth collaborator call fails transiently (0 disables)
        #[arg(long, default_value_t = 4)]
        fail_every: usize,

        #[arg(long, default_value_t = 20)]
        max_runs: usize,
    },
    /// Print job counts by status
    Status,
    /// List dead-lettered jobs, newest first
    DeadLetters {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Return interrupted running jobs to the queue
    Recover,
    /// Delete succeeded jobs older than the retention
    Purge {
        #[arg(long, default_value_t = 7 * 24 * 3600)]
        older_than_secs: u64,
    },
}

#[derive(Debug, Default, Deserialize)]
struct DemoPayload {
    #[serde(default)]
    poison: bool,
}

/// 決まった間隔で一時的に失敗する Collaborator
///
/// payload の `"poison": true` は恒久的な失敗になる。
struct SimulatedCollaborator {
    domain: SyncDomain,
    fail_every: usize,
    calls: AtomicUsize,
}

impl SimulatedCollaborator {
    fn new(domain: SyncDomain, fail_every: usize) -> Self {
        Self {
            domain,
            fail_every,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SyncCollaborator for SimulatedCollaborator {
    async fn sync(&self, account: &Account, payload: &serde_json::Value) -> Result<SyncReport, SyncError> {
        let payload: DemoPayload = serde_json::from_value(payload.clone())
            .map_err(|e| SyncError::permanent(format!("bad payload: {e}")))?;
        if payload.poison {
            return Err(SyncError::permanent(format!(
                "{} rejected credentials for {}",
                account.provider, account.email_address
            )));
        }

        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        sleep(Duration::from_millis(50)).await;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(SyncError::transient(format!("{} server busy (call {n})", self.domain)));
        }

        let items = match self.domain {
            SyncDomain::Email => 10 + n % 7,
            SyncDomain::Calendar => 2 + n % 3,
            SyncDomain::Tasks => 1 + n % 2,
        };
        Ok(SyncReport::new(items))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => SchedulerConfig::default(),
    };
    // デモは毎回新しいアカウントを作るので、既定では使い捨ての DB にする
    let scratch = match (&cli.command, &cli.database) {
        (Command::Demo { .. }, None) => Some(tempfile::tempdir().context("failed to create demo directory")?),
        _ => None,
    };
    let database = database_path(cli.database.as_deref(), scratch.as_ref().map(|dir| dir.path()));
    let store = open_store(&database).await?;

    match cli.command {
        Command::Demo {
            accounts,
            fail_every,
            max_runs,
        } => {
            // 設定ファイルがなければ、デモが数秒で終わるよう短いバックオフにする
            let mut config = config;
            if cli.config.is_none() {
                config.backoff.base_delay_ms = 200;
                config.backoff.max_delay_ms = 2_000;
            }
            demo(store, config, accounts, fail_every, max_runs).await?;
        }
        Command::Status => {
            let scheduler = operator(store, config)?;
            print_json(&scheduler.queue_counts().await?)?;
        }
        Command::DeadLetters { limit } => {
            let scheduler = operator(store, config)?;
            print_json(&scheduler.dead_letters(limit).await?)?;
        }
        Command::Recover => {
            let scheduler = operator(store, config)?;
            let recovered = scheduler.recover_stale_jobs().await?;
            print_json(&recovered)?;
        }
        Command::Purge { older_than_secs } => {
            let scheduler = operator(store, config)?;
            let purged = scheduler
                .purge_succeeded(Duration::from_secs(older_than_secs))
                .await?;
            print_json(&serde_json::json!({ "purged": purged }))?;
        }
    }
    Ok(())
}

/// `--database` wins, then the demo's scratch directory, then `loom.db`.
fn database_path(explicit: Option<&Path>, scratch: Option<&Path>) -> PathBuf {
    match (explicit, scratch) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(dir)) => dir.join("loom-demo.db"),
        (None, None) => PathBuf::from(DEFAULT_DATABASE),
    }
}

async fn open_store(path: &Path) -> Result<SqliteJobStore> {
    info!(database = %path.display(), "opening job store");
    SqliteJobStore::connect(path)
        .await
        .with_context(|| format!("failed to open database: {}", path.display()))
}

fn init_logging(json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to initialise JSON logging")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("failed to initialise logging")?;
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 運用コマンド用（Collaborator は不要）
fn operator(store: SqliteJobStore, config: SchedulerConfig) -> Result<Scheduler> {
    Ok(Scheduler::builder()
        .store(Arc::new(store))
        .accounts(Arc::new(InMemoryAccountDirectory::new()))
        .config(config)
        .build()?)
}

async fn demo(
    store: SqliteJobStore,
    config: SchedulerConfig,
    accounts: usize,
    fail_every: usize,
    max_runs: usize,
) -> Result<()> {
    // (A) アカウントを用意
    let people: Vec<Account> = (0..accounts)
        .map(|i| {
            Account::new(
                AccountId::generate(),
                if i % 2 == 0 { "imap" } else { "exchange" },
                format!("Demo {i}"),
                format!("demo{i}@example.com"),
            )
        })
        .collect();
    let directory = InMemoryAccountDirectory::with_accounts(people.clone());

    // (B) ドメインごとに Collaborator を登録
    let mut builder = Scheduler::builder()
        .store(Arc::new(store))
        .accounts(Arc::new(directory))
        .config(config)
        .expect_domains(&SyncDomain::ALL);
    for domain in SyncDomain::ALL {
        builder = builder.register(domain, Arc::new(SimulatedCollaborator::new(domain, fail_every)))?;
    }
    let scheduler = builder.build()?;

    // (C) 全アカウント × 全ドメインを投入。最後のアカウントの tasks は必ず失敗する
    for (i, account) in people.iter().enumerate() {
        for domain in SyncDomain::ALL {
            let poison = i + 1 == people.len() && domain == SyncDomain::Tasks;
            scheduler
                .queue_job(account.id, domain, serde_json::json!({ "poison": poison }), 0)
                .await?;
        }
    }
    info!(jobs = people.len() * SyncDomain::ALL.len(), "demo jobs queued");

    // (D) 空になるまで実行（リトライ待ちの間はスリープ）
    let mut total = SyncRunSummary::default();
    for run in 1..=max_runs {
        let summary = scheduler.run_queue().await?;
        total.merge(&summary);
        if !summary.is_empty() {
            print_json(&serde_json::json!({ "run": run, "summary": summary }))?;
        }
        if scheduler.queue_counts().await?.is_drained() {
            break;
        }
        sleep(Duration::from_millis(250)).await;
    }

    print_json(&serde_json::json!({
        "total": total,
        "counts": scheduler.queue_counts().await?,
        "dead_letters": scheduler.dead_letters(10).await?,
    }))?;
    Ok(())
}
