//! Orchestrates a single workflow run end to end, and exposes the CRUD
//! surface the CLI (and, eventually, a GUI shell) talks to instead of
//! touching the repositories directly.
//!
//! `run` never returns an `Err`: every failure — a missing workflow, a
//! driver that won't connect, an uncaught action error, a cancellation — is
//! captured into the returned [`ExecutionLog`] and persisted before this
//! function hands it back, matching how the interpreter itself never lets a
//! run failure escape as a propagated error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::action::{Action, ActionFactory};
use crate::credential::CredentialStore;
use crate::driver::{BrowserDriver, DriverFactory, DriverKind};
use crate::error::{CredentialError, RepositoryError};
use crate::interpreter::{Interpreter, ProgressEvent};
use crate::repository::{
    Credential, CredentialRepo, ExecutionLog, ExecutionLogRepo, ExecutionLogSummary, ExecutionOutcome, Template,
    TemplateRepo, Workflow, WorkflowMetadata, WorkflowRepo,
};

/// Releases a [`BrowserDriver`] exactly once. Rust has no `finally`, so a
/// `Drop` impl is the only thing that can guarantee the release still
/// happens if the run task is aborted or panics before reaching the normal
/// release point; the detached cleanup task it spawns is best-effort since
/// `Drop` itself cannot be `async`.
struct DriverGuard {
    driver: Arc<dyn BrowserDriver>,
    released: bool,
}

impl DriverGuard {
    fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self { driver, released: false }
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.driver.shutdown().await {
            tracing::warn!(%err, "driver shutdown failed");
        }
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let driver = self.driver.clone();
        tokio::spawn(async move {
            if let Err(err) = driver.shutdown().await {
                tracing::warn!(%err, "driver shutdown failed during drop");
            }
        });
    }
}

pub struct WorkflowService {
    workflows: Arc<dyn WorkflowRepo>,
    templates: Arc<dyn TemplateRepo>,
    credential_repo: Arc<dyn CredentialRepo>,
    execution_logs: Arc<dyn ExecutionLogRepo>,
    credentials: Arc<CredentialStore>,
    driver_factory: Arc<dyn DriverFactory>,
    max_while_iterations: usize,
}

impl WorkflowService {
    pub fn new(
        workflows: Arc<dyn WorkflowRepo>,
        templates: Arc<dyn TemplateRepo>,
        credential_repo: Arc<dyn CredentialRepo>,
        execution_logs: Arc<dyn ExecutionLogRepo>,
        credentials: Arc<CredentialStore>,
        driver_factory: Arc<dyn DriverFactory>,
        max_while_iterations: usize,
    ) -> Self {
        Self {
            workflows,
            templates,
            credential_repo,
            execution_logs,
            credentials,
            driver_factory,
            max_while_iterations,
        }
    }

    /// Run `name` once. `credential_name` is accepted for parity with the
    /// CLI/scheduler surface (a scheduled job names the credential its
    /// workflow should use) but resolution happens per `Type[credential]`
    /// action via [`CredentialStore`], not up front — a workflow may
    /// reference more than one credential.
    pub async fn run(
        &self,
        name: &str,
        credential_name: Option<&str>,
        browser_type: DriverKind,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> ExecutionLog {
        self.run_with_input(name, credential_name, browser_type, cancel, progress, serde_json::Map::new()).await
    }

    /// Same as [`run`](Self::run), additionally seeding the run's root
    /// [`Context`](crate::context::Context) scope with `input` — the
    /// mechanism a `for_each` loop's `list_variable_name` (or any other
    /// variable a workflow expects a caller to supply) is populated by,
    /// since no leaf action itself introduces arbitrary data into context.
    pub async fn run_with_input(
        &self,
        name: &str,
        credential_name: Option<&str>,
        browser_type: DriverKind,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> ExecutionLog {
        let _ = credential_name;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("workflow_run", workflow = %name, run_id = %run_id);

        let log = self
            .run_inner(run_id, name, started_at, browser_type, cancel, progress, input)
            .instrument(span)
            .await;

        if let Err(err) = self.execution_logs.append(log.clone()).await {
            tracing::error!(%err, workflow = %name, "failed to persist execution log");
        }
        log
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_inner(
        &self,
        run_id: Uuid,
        name: &str,
        started_at: DateTime<Utc>,
        browser_type: DriverKind,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<ProgressEvent>>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> ExecutionLog {
        let workflow = match self.workflows.get(name).await {
            Ok(workflow) => workflow,
            Err(err) => return Self::failed_log(run_id, name, started_at, format!("failed to load workflow: {err}")),
        };

        let driver = match self.driver_factory.acquire(browser_type).await {
            Ok(driver) => driver,
            Err(err) => return Self::failed_log(run_id, name, started_at, format!("failed to acquire driver: {err}")),
        };
        let guard = DriverGuard::new(driver.clone());

        let mut interpreter = Interpreter::new(driver, self.templates.clone(), self.credentials.clone(), cancel, self.max_while_iterations);
        if let Some(sender) = progress {
            interpreter = interpreter.with_progress(sender);
        }

        let mut context = crate::context::Context::with_root(input);
        let outcome = interpreter.run(&workflow.actions, &mut context).await;
        guard.release().await;

        Self::log_from_outcome(run_id, name, started_at, outcome)
    }

    fn failed_log(id: Uuid, name: &str, started_at: DateTime<Utc>, message: String) -> ExecutionLog {
        ExecutionLog {
            id,
            workflow_name: name.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome: ExecutionOutcome::Failed,
            error_message: Some(message),
            action_log: Vec::new(),
        }
    }

    fn log_from_outcome(id: Uuid, name: &str, started_at: DateTime<Utc>, outcome: crate::interpreter::RunOutcome) -> ExecutionLog {
        let finished_at = Utc::now();
        let outcome_kind = match &outcome.error {
            None => ExecutionOutcome::Success,
            Some(crate::error::WorkflowError::Stopped) => ExecutionOutcome::Stopped,
            Some(crate::error::WorkflowError::Failed(_)) => ExecutionOutcome::Failed,
        };
        ExecutionLog {
            id,
            workflow_name: name.to_string(),
            started_at,
            finished_at,
            outcome: outcome_kind,
            error_message: outcome.error.map(|err| err.to_string()),
            action_log: outcome.action_log,
        }
    }

    // -- Workflow CRUD ---------------------------------------------------

    pub async fn create_workflow(&self, name: &str, actions: Vec<serde_json::Value>) -> Result<(), RepositoryError> {
        let actions = Self::build_actions(actions)?;
        self.workflows.create(name, actions).await
    }

    pub async fn update_workflow(&self, name: &str, actions: Vec<serde_json::Value>) -> Result<(), RepositoryError> {
        let actions = Self::build_actions(actions)?;
        self.workflows.update(name, actions).await
    }

    pub async fn get_workflow(&self, name: &str) -> Result<Workflow, RepositoryError> {
        self.workflows.get(name).await
    }

    pub async fn delete_workflow(&self, name: &str) -> Result<(), RepositoryError> {
        self.workflows.delete(name).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, RepositoryError> {
        self.workflows.list().await
    }

    // -- Template CRUD -----------------------------------------------------

    pub async fn create_template(&self, name: &str, actions: Vec<serde_json::Value>) -> Result<(), RepositoryError> {
        let actions = Self::build_actions(actions)?;
        self.templates.create(name, actions).await
    }

    pub async fn get_template(&self, name: &str) -> Result<Template, RepositoryError> {
        self.templates.get(name).await
    }

    pub async fn delete_template(&self, name: &str) -> Result<(), RepositoryError> {
        self.templates.delete(name).await
    }

    pub async fn list_templates(&self) -> Result<Vec<String>, RepositoryError> {
        self.templates.list().await
    }

    // -- Credential CRUD -----------------------------------------------------

    pub async fn create_credential(&self, name: &str, username: &str, password: &str) -> Result<(), CredentialError> {
        self.credentials.create(name, username, password).await
    }

    pub async fn delete_credential(&self, name: &str) -> Result<(), CredentialError> {
        self.credentials.delete(name).await
    }

    pub async fn list_credentials(&self) -> Result<Vec<String>, RepositoryError> {
        self.credential_repo.list().await
    }

    pub async fn get_credential(&self, name: &str) -> Result<Credential, RepositoryError> {
        self.credential_repo.get(name).await
    }

    // -- Execution history -----------------------------------------------------

    pub async fn get_execution_log(&self, id: Uuid) -> Result<ExecutionLog, RepositoryError> {
        self.execution_logs.get(id).await
    }

    pub async fn list_execution_logs(&self, workflow_name: &str, limit: usize) -> Result<Vec<ExecutionLogSummary>, RepositoryError> {
        self.execution_logs.list_for_workflow(workflow_name, limit).await
    }

    /// Every action in a workflow/template body must validate through
    /// [`ActionFactory`] before it's persisted — the repository layer never
    /// accepts raw JSON it hasn't round-tripped through construction.
    fn build_actions(raw: Vec<serde_json::Value>) -> Result<Vec<Action>, RepositoryError> {
        raw.iter()
            .map(ActionFactory::create)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| RepositoryError::Backend(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordHashMethod;
    use crate::driver::MockDriverFactory;
    use crate::repository::file::FileRepository;
    use serde_json::json;

    fn service() -> (WorkflowService, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(FileRepository::new(
            tmp.path().join("workflows"),
            tmp.path().join("templates"),
            tmp.path().join("credentials.json"),
            tmp.path().join("execution_logs"),
        ));
        let credentials = Arc::new(CredentialStore::new(repo.clone(), PasswordHashMethod::Argon2));
        let service = WorkflowService::new(repo.clone(), repo.clone(), repo.clone(), repo, credentials, Arc::new(MockDriverFactory), 1000);
        (service, tmp)
    }

    #[tokio::test]
    async fn run_persists_a_success_log_for_a_straight_line_workflow() {
        let (service, _tmp) = service();
        service
            .create_workflow(
                "greet",
                vec![json!({"type": "navigate", "name": "go", "url": "https://example.com"})],
            )
            .await
            .unwrap();

        let log = service.run("greet", None, DriverKind::Mock, CancellationToken::new(), None).await;
        assert_eq!(log.outcome, ExecutionOutcome::Success);
        assert_eq!(log.action_log.len(), 1);

        let persisted = service.list_execution_logs("greet", 10).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, log.id);
    }

    #[tokio::test]
    async fn run_against_missing_workflow_returns_failed_log_without_panicking() {
        let (service, _tmp) = service();
        let log = service.run("missing", None, DriverKind::Mock, CancellationToken::new(), None).await;
        assert_eq!(log.outcome, ExecutionOutcome::Failed);
        assert!(log.error_message.unwrap().contains("failed to load workflow"));
    }

    #[tokio::test]
    async fn run_reports_stopped_outcome_for_a_pre_cancelled_token() {
        let (service, _tmp) = service();
        service
            .create_workflow(
                "loopy",
                vec![json!({
                    "type": "loop",
                    "name": "l",
                    "loop_type": "count",
                    "count": 5,
                    "loop_actions": [{"type": "navigate", "name": "n", "url": "https://example.com"}],
                })],
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let log = service.run("loopy", None, DriverKind::Mock, cancel, None).await;
        assert_eq!(log.outcome, ExecutionOutcome::Stopped);
    }

    #[tokio::test]
    async fn create_workflow_rejects_actions_that_fail_validation() {
        let (service, _tmp) = service();
        let result = service.create_workflow("bad", vec![json!({"type": "navigate", "name": "n"})]).await;
        assert!(result.is_err());
    }
}
