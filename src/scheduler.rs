//! Background component that fires [`WorkflowService::run`] at configured
//! times.
//!
//! Built on `tokio-cron-scheduler` for all three trigger kinds — `Cron`
//! drives its native cron parser, `Interval`/`Date` ride its repeated/
//! one-shot scheduling — confirmed as the idiomatic choice by the pack's
//! `mondalsuman-boternity` manifest, which lists the crate explicitly for
//! "cron scheduling for workflow triggers". `croner` is used directly only
//! to compute a job's next fire time for [`list`](Scheduler::list), since
//! `tokio_cron_scheduler::JobScheduler` doesn't expose that itself.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio::sync::{RwLock, Semaphore};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::driver::DriverKind;
use crate::error::SchedulerError;
use crate::service::WorkflowService;

/// When a [`Job`] fires. A standard 5-or-6-field cron expression, a fixed
/// repeat interval, or a one-shot absolute time.
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(String),
    Interval(Duration),
    Date(DateTime<Utc>),
}

/// A scheduled run request: which workflow, which credential/browser to run
/// it with, and when.
#[derive(Debug, Clone)]
pub struct Job {
    pub workflow_name: String,
    pub credential_name: Option<String>,
    pub browser_type: DriverKind,
    pub trigger: Trigger,
}

/// Read-only projection of a scheduled job, returned by [`Scheduler::list`].
#[derive(Debug, Clone)]
pub struct JobView {
    pub id: Uuid,
    pub workflow_name: String,
    pub trigger: Trigger,
    pub next_fire: Option<DateTime<Utc>>,
}

struct JobEntry {
    job: Job,
    cancel: CancellationToken,
    tcs_id: Uuid,
}

type FireFn = Box<dyn FnMut(Uuid, JobScheduler) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Triggers [`WorkflowService::run`] on cron/interval/date schedules.
///
/// Jobs are held in an in-memory `HashMap` guarded by an `RwLock`, mirroring
/// the teacher's `SessionManager` in `unified_kernel/session_manager.rs`; a
/// persistent job store is an explicit non-goal (schedules do not survive a
/// process restart). `max_instances = 1`/`coalesce = false` per job is
/// enforced by a per-job `AtomicBool`: a fire that finds the flag already
/// set is skipped and logged, never queued. The `worker_pool_size`
/// `Semaphore` bounds how many job bodies may run concurrently across *all*
/// jobs, independent of the per-job flag.
pub struct Scheduler {
    service: Arc<WorkflowService>,
    cron: JobScheduler,
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    worker_pool: Arc<Semaphore>,
}

impl Scheduler {
    pub async fn new(service: Arc<WorkflowService>, worker_pool_size: usize) -> Result<Self, SchedulerError> {
        let cron = JobScheduler::new().await.map_err(|err| SchedulerError::Backend(err.to_string()))?;
        cron.start().await.map_err(|err| SchedulerError::Backend(err.to_string()))?;
        Ok(Self {
            service,
            cron,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            worker_pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        })
    }

    /// Register `job` and start it ticking. Returns the id used to
    /// [`list`](Scheduler::list) or [`cancel`](Scheduler::cancel) it later.
    pub async fn schedule(&self, job: Job) -> Result<Uuid, SchedulerError> {
        let id = Uuid::new_v4();
        let running = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let fire = self.make_fire(job.clone(), running, cancel.clone());

        let cron_job = match &job.trigger {
            Trigger::Cron(expression) => {
                CronJob::new_async(expression.as_str(), fire).map_err(|err| SchedulerError::InvalidTrigger(err.to_string()))?
            }
            Trigger::Interval(period) => {
                CronJob::new_repeated_async(*period, fire).map_err(|err| SchedulerError::InvalidTrigger(err.to_string()))?
            }
            Trigger::Date(at) => {
                let delay = (*at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                CronJob::new_one_shot_async(delay, fire).map_err(|err| SchedulerError::InvalidTrigger(err.to_string()))?
            }
        };

        let tcs_id = self.cron.add(cron_job).await.map_err(|err| SchedulerError::Backend(err.to_string()))?;
        self.jobs.write().await.insert(id, JobEntry { job, cancel, tcs_id });
        Ok(id)
    }

    /// Builds the closure `tokio-cron-scheduler` calls on every fire: checks
    /// the running flag, takes a worker-pool permit, runs the workflow, and
    /// always clears the flag afterward — including on the "already running,
    /// skip this fire" path, since that path never sets it in the first
    /// place.
    fn make_fire(&self, job: Job, running: Arc<AtomicBool>, cancel: CancellationToken) -> FireFn {
        let service = self.service.clone();
        let pool = self.worker_pool.clone();
        Box::new(move |_uuid, _scheduler| {
            let service = service.clone();
            let pool = pool.clone();
            let running = running.clone();
            let cancel = cancel.clone();
            let workflow_name = job.workflow_name.clone();
            let credential_name = job.credential_name.clone();
            let browser_type = job.browser_type;
            Box::pin(async move {
                if running.swap(true, Ordering::SeqCst) {
                    tracing::warn!(workflow = %workflow_name, "skipping fire: previous run still in progress");
                    return;
                }
                let permit = pool.acquire().await;
                if let Ok(_permit) = permit {
                    let _ = service.run(&workflow_name, credential_name.as_deref(), browser_type, cancel, None).await;
                }
                running.store(false, Ordering::SeqCst);
            })
        })
    }

    /// Snapshot of every job currently scheduled.
    pub async fn list(&self) -> Vec<JobView> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|(id, entry)| JobView {
                id: *id,
                workflow_name: entry.job.workflow_name.clone(),
                trigger: entry.job.trigger.clone(),
                next_fire: next_fire_time(&entry.job.trigger),
            })
            .collect()
    }

    /// Remove `id`'s schedule so it never fires again. A fire already in
    /// flight is not interrupted by this call — only a separate cancellation
    /// of the job's own token (not exposed here) stops a running
    /// invocation, per the job/run cancellation split.
    pub async fn cancel(&self, id: Uuid) -> Result<(), SchedulerError> {
        let entry = self.jobs.write().await.remove(&id).ok_or(SchedulerError::JobNotFound(id))?;
        entry.cancel.cancel();
        self.cron.remove(&entry.tcs_id).await.map_err(|err| SchedulerError::Backend(err.to_string()))
    }

    /// Stop the underlying scheduler. No job fires after this returns.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.cron.shutdown().await.map_err(|err| SchedulerError::Backend(err.to_string()))
    }
}

fn next_fire_time(trigger: &Trigger) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Cron(expression) => Cron::new(expression).parse().ok().and_then(|cron| cron.find_next_occurrence(&Utc::now(), false).ok()),
        Trigger::Interval(_) => None,
        Trigger::Date(at) => Some(*at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordHashMethod;
    use crate::credential::CredentialStore;
    use crate::driver::MockDriverFactory;
    use crate::repository::file::FileRepository;
    use serde_json::json;

    async fn service() -> (Arc<WorkflowService>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(FileRepository::new(
            tmp.path().join("workflows"),
            tmp.path().join("templates"),
            tmp.path().join("credentials.json"),
            tmp.path().join("execution_logs"),
        ));
        let credentials = Arc::new(CredentialStore::new(repo.clone(), PasswordHashMethod::Argon2));
        let service = Arc::new(WorkflowService::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            repo,
            credentials,
            Arc::new(MockDriverFactory),
            1000,
        ));
        service
            .create_workflow("greet", vec![json!({"type": "navigate", "name": "go", "url": "https://example.com"})])
            .await
            .unwrap();
        (service, tmp)
    }

    #[tokio::test]
    async fn schedule_then_list_reports_the_job() {
        let (service, _tmp) = service().await;
        let scheduler = Scheduler::new(service, 5).await.unwrap();
        let id = scheduler
            .schedule(Job {
                workflow_name: "greet".to_string(),
                credential_name: None,
                browser_type: DriverKind::Mock,
                trigger: Trigger::Interval(Duration::from_secs(3600)),
            })
            .await
            .unwrap();

        let jobs = scheduler.list().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].workflow_name, "greet");
    }

    #[tokio::test]
    async fn cancel_removes_the_job_from_the_listing() {
        let (service, _tmp) = service().await;
        let scheduler = Scheduler::new(service, 5).await.unwrap();
        let id = scheduler
            .schedule(Job {
                workflow_name: "greet".to_string(),
                credential_name: None,
                browser_type: DriverKind::Mock,
                trigger: Trigger::Interval(Duration::from_secs(3600)),
            })
            .await
            .unwrap();

        scheduler.cancel(id).await.unwrap();
        assert!(scheduler.list().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_on_unknown_id_reports_job_not_found() {
        let (service, _tmp) = service().await;
        let scheduler = Scheduler::new(service, 5).await.unwrap();
        let result = scheduler.cancel(Uuid::new_v4()).await;
        assert!(matches!(result, Err(SchedulerError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected_at_schedule_time() {
        let (service, _tmp) = service().await;
        let scheduler = Scheduler::new(service, 5).await.unwrap();
        let result = scheduler
            .schedule(Job {
                workflow_name: "greet".to_string(),
                credential_name: None,
                browser_type: DriverKind::Mock,
                trigger: Trigger::Cron("not a cron expression".to_string()),
            })
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidTrigger(_))));
    }
}
