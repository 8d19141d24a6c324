use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{instrument, warn};

use crate::domain::{Account, ExecutionOutcome, SyncDomain};
use crate::ports::{AccountResolver, SyncCollaborator};
use crate::queue::SyncJob;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate collaborator for domain={0}")]
    DuplicateCollaborator(SyncDomain),
}

/// Registry of collaborators (domain -> collaborator).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared behind an `Arc`).
/// Keyed by the closed `SyncDomain` enum, so there is no string lookup.
#[derive(Default, Clone)]
pub struct CollaboratorRegistry {
    collaborators: HashMap<SyncDomain, Arc<dyn SyncCollaborator>>,
}

impl CollaboratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        domain: SyncDomain,
        collaborator: Arc<dyn SyncCollaborator>,
    ) -> Result<(), RegistryError> {
        if self.collaborators.contains_key(&domain) {
            return Err(RegistryError::DuplicateCollaborator(domain));
        }
        self.collaborators.insert(domain, collaborator);
        Ok(())
    }

    pub fn get(&self, domain: SyncDomain) -> Option<&Arc<dyn SyncCollaborator>> {
        self.collaborators.get(&domain)
    }

    /// Registered domains in declaration order.
    pub fn domains(&self) -> Vec<SyncDomain> {
        SyncDomain::ALL
            .into_iter()
            .filter(|d| self.collaborators.contains_key(d))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.collaborators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }
}

impl std::fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}

/// Runs one attempt of a claimed job and classifies the result.
///
/// Never returns an error: every failure mode maps to an outcome, and the
/// decider turns that into a transition.
pub struct JobExecutor {
    registry: Arc<CollaboratorRegistry>,
    accounts: Arc<dyn AccountResolver>,
    timeout: Duration,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<CollaboratorRegistry>,
        accounts: Arc<dyn AccountResolver>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            accounts,
            timeout,
        }
    }

    pub fn registry(&self) -> &CollaboratorRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute one attempt.
    ///
    /// - no collaborator for the domain -> permanent
    /// - account gone -> permanent, resolver failure -> transient
    /// - collaborator error -> its own classification
    /// - panic or timeout -> transient
    ///
    /// The timeout bounds the whole attempt: account lookup and collaborator
    /// call share one deadline.
    #[instrument(
        skip(self, job),
        fields(job_id = %job.id, account_id = %job.account_id, domain = %job.domain, attempt = job.attempt_count + 1)
    )]
    pub async fn execute(&self, job: &SyncJob) -> ExecutionOutcome {
        // One deadline for the whole attempt, lookup included.
        let deadline = Instant::now() + self.timeout;
        let Some(collaborator) = self.registry.get(job.domain).cloned() else {
            return ExecutionOutcome::permanent(format!(
                "no collaborator registered for domain {}",
                job.domain
            ));
        };

        let account = match self.resolve_account(job, deadline).await {
            Ok(account) => account,
            Err(outcome) => return outcome,
        };

        let payload = job.payload.clone();
        let mut handle = tokio::spawn(async move { collaborator.sync(&account, &payload).await });

        match timeout_at(deadline, &mut handle).await {
            Ok(Ok(result)) => ExecutionOutcome::from(result),
            Ok(Err(join_error)) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                warn!(%message, "collaborator panicked");
                ExecutionOutcome::transient(format!("collaborator panicked: {message}"))
            }
            Ok(Err(join_error)) => {
                ExecutionOutcome::transient(format!("collaborator task cancelled: {join_error}"))
            }
            Err(_) => {
                handle.abort();
                warn!(timeout_ms = self.timeout.as_millis() as u64, "attempt timed out");
                ExecutionOutcome::transient(format!(
                    "attempt timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }

    async fn resolve_account(&self, job: &SyncJob, deadline: Instant) -> Result<Account, ExecutionOutcome> {
        match timeout_at(deadline, self.accounts.resolve(job.account_id)).await {
            Ok(Ok(Some(account))) => Ok(account),
            Ok(Ok(None)) => Err(ExecutionOutcome::permanent(format!(
                "account {} no longer exists",
                job.account_id
            ))),
            Ok(Err(err)) => Err(ExecutionOutcome::transient(format!(
                "account lookup failed: {}",
                err.message()
            ))),
            Err(_) => Err(ExecutionOutcome::transient("account lookup timed out")),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
