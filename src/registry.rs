//! In-memory scan task tracking.
//!
//! Each submitted scan becomes a task that starts `pending` and moves once to
//! `completed` or `failed`. The work runs on a spawned tokio task; callers poll
//! with [`TaskRegistry::get`].
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{EngineConfig, ValidatedCommand};
use crate::error::{ScanError, ValidationError};
use crate::executor::ScanRunner;
use crate::report;
use crate::types::{ScanReport, TaskSnapshot, TaskStatus};
use crate::validate::DEFAULT_FLAGS;

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Upper bound on scanner processes running at once; `None` is unbounded.
    pub max_concurrent_scans: Option<usize>,
    /// Finished tasks older than this are dropped; `None` keeps them forever.
    pub task_ttl: Option<Duration>,
}

#[derive(Debug)]
struct ScanTask {
    id: String,
    status: TaskStatus,
    target: String,
    flags: String,
    created_at: String,
    finished_at: Option<String>,
    finished: Option<Instant>,
    result: Option<ScanReport>,
    error: Option<String>,
    warning: Option<String>,
}

/// Successful pipeline output: the report plus any stderr warning.
type Outcome = Result<(ScanReport, Option<String>), ScanError>;

impl ScanTask {
    fn pending(id: String, target: &str, flags: &str) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            target: target.to_string(),
            flags: flags.to_string(),
            created_at: now_rfc3339(),
            finished_at: None,
            finished: None,
            result: None,
            error: None,
            warning: None,
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            target: self.target.clone(),
            flags: self.flags.clone(),
            created_at: self.created_at.clone(),
            finished_at: self.finished_at.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
            warning: self.warning.clone(),
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        match outcome {
            Ok((report, warning)) => {
                self.status = TaskStatus::Completed;
                self.result = Some(report);
                self.warning = warning;
            }
            Err(e) => {
                self.status = TaskStatus::Failed;
                self.error = Some(e.to_string());
            }
        }
        self.finished_at = Some(now_rfc3339());
        self.finished = Some(Instant::now());
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.finished.is_some_and(|at| at.elapsed() >= ttl)
    }
}

/// Owns every scan task and drives each one to its terminal state.
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, ScanTask>>>,
    runner: Arc<dyn ScanRunner>,
    engine: EngineConfig,
    permits: Option<Arc<Semaphore>>,
    task_ttl: Option<Duration>,
}

impl TaskRegistry {
    pub fn new(engine: EngineConfig, runner: Arc<dyn ScanRunner>, config: RegistryConfig) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            runner,
            engine,
            permits: config
                .max_concurrent_scans
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
            task_ttl: config.task_ttl,
        }
    }

    /// Validate the request and start a scan without waiting for it.
    ///
    /// Invalid input is rejected here and never reaches the scanner. `None`
    /// flags fall back to [`DEFAULT_FLAGS`].
    pub async fn submit(&self, target: &str, flags: Option<&str>) -> Result<String, ValidationError> {
        let flags = flags.unwrap_or(DEFAULT_FLAGS);
        let command = ValidatedCommand::new(&self.engine, target, flags)?;

        self.purge_expired().await;

        let task_id = Uuid::new_v4().to_string();
        self.tasks
            .write()
            .await
            .insert(task_id.clone(), ScanTask::pending(task_id.clone(), target, flags));
        info!(task_id = %task_id, scan_target = target, flags, "scan submitted");

        let registry = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let worker = registry.clone();
            let handle = tokio::spawn(async move { worker.execute(command).await });
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ScanError::Aborted(e.to_string())),
            };
            registry.complete(&id, outcome).await;
        });

        Ok(task_id)
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks.read().await.get(task_id).map(ScanTask::snapshot)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Drop finished tasks older than the configured TTL. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let Some(ttl) = self.task_ttl else {
            return 0;
        };
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| !task.expired(ttl));
        let removed = before - tasks.len();
        if removed > 0 {
            info!("evicted {removed} expired scan tasks");
        }
        removed
    }

    async fn execute(&self, command: ValidatedCommand) -> Outcome {
        // Held until the scanner exits.
        let _permit = match &self.permits {
            Some(sem) => sem.acquire().await.ok(),
            None => None,
        };
        debug!(command = %command.display_line(), "launching scanner");
        let raw = self.runner.run(&command).await?;
        let scan = report::parse(&raw.stdout)?;
        let summary = report::summarize(&scan);
        Ok((ScanReport { summary, scan }, raw.warning))
    }

    async fn complete(&self, task_id: &str, outcome: Outcome) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            warn!(task_id, "finished scan has no registry entry");
            return;
        };
        if task.status.is_terminal() {
            warn!(task_id, "ignoring second completion for scan task");
            return;
        }
        match &outcome {
            Ok(_) => info!(task_id, "scan completed"),
            Err(e) => warn!(task_id, "scan failed: {e}"),
        }
        task.finish(outcome);
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;

    #[test]
    fn finish_records_failure() {
        let mut task = ScanTask::pending("t1".into(), "10.0.0.1", "-F");
        let err = ScanError::Execution(ExecutionError::Timeout(Duration::from_secs(1)));
        task.finish(Err(err));
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.error.unwrap().contains("timed out"));
        assert!(snap.finished_at.is_some());
        assert!(snap.result.is_none());
    }

    #[tokio::test]
    async fn pending_tasks_never_expire() {
        let task = ScanTask::pending("t2".into(), "10.0.0.1", "-F");
        assert!(!task.expired(Duration::ZERO));
    }
}
