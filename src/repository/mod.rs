//! Durable storage contracts for workflows, templates, credentials and
//! execution history. [`file::FileRepository`] and (behind `sql-backend`)
//! [`sql::SqlRepository`] both implement every trait here, so callers can
//! swap backends without touching the interpreter or service layer.

pub mod file;

#[cfg(feature = "sql-backend")]
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;
use crate::error::RepositoryError;

/// `Action` deliberately implements `Serialize` only (construction happens
/// through `ActionFactory`, never through serde deriving `Deserialize`), so
/// this type mirrors that: it's the shape returned to callers, not one a
/// backend can losslessly round-trip with a derived `Deserialize` impl.
/// Backends reconstruct actions from their stored JSON via `ActionFactory`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing-friendly projection of a [`Workflow`] — no action bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub action_count: usize,
}

impl From<&Workflow> for WorkflowMetadata {
    fn from(workflow: &Workflow) -> Self {
        WorkflowMetadata {
            name: workflow.name.clone(),
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
            action_count: workflow.actions.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Template {
    pub name: String,
    pub actions: Vec<Action>,
}

/// A stored credential. `password_hash` is opaque — never the plaintext
/// password, and never returned by an operation meant for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub action_name: String,
    pub action_type: String,
    pub succeeded: bool,
    pub message: Option<String>,
}

/// One completed (or cancelled) interpreter run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub error_message: Option<String>,
    pub action_log: Vec<ActionLogEntry>,
}

/// Listing-friendly projection of an [`ExecutionLog`] — no per-action detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogSummary {
    pub id: Uuid,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
}

impl From<&ExecutionLog> for ExecutionLogSummary {
    fn from(log: &ExecutionLog) -> Self {
        ExecutionLogSummary {
            id: log.id,
            workflow_name: log.workflow_name.clone(),
            started_at: log.started_at,
            finished_at: log.finished_at,
            outcome: log.outcome,
        }
    }
}

#[async_trait]
pub trait WorkflowRepo: Send + Sync {
    async fn create(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError>;
    async fn get(&self, name: &str) -> Result<Workflow, RepositoryError>;
    async fn update(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError>;
    async fn delete(&self, name: &str) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<WorkflowMetadata>, RepositoryError>;
    /// `{created_at, modified_at, size}` for a single workflow, without
    /// loading its full action body.
    async fn metadata(&self, name: &str) -> Result<WorkflowMetadata, RepositoryError>;
}

#[async_trait]
pub trait TemplateRepo: Send + Sync {
    async fn create(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError>;
    async fn get(&self, name: &str) -> Result<Template, RepositoryError>;
    async fn delete(&self, name: &str) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait CredentialRepo: Send + Sync {
    async fn create(&self, name: &str, username: &str, password_hash: &str) -> Result<(), RepositoryError>;
    async fn get(&self, name: &str) -> Result<Credential, RepositoryError>;
    async fn delete(&self, name: &str) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait ExecutionLogRepo: Send + Sync {
    async fn append(&self, log: ExecutionLog) -> Result<(), RepositoryError>;
    async fn get(&self, id: Uuid) -> Result<ExecutionLog, RepositoryError>;
    async fn list_for_workflow(&self, workflow_name: &str, limit: usize) -> Result<Vec<ExecutionLogSummary>, RepositoryError>;
}
