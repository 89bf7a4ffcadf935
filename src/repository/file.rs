//! File-backed repository. Every entity lives in its own JSON file, written
//! with a temp-file-plus-rename so a crash mid-write never leaves a
//! truncated file behind. Credentials share a single JSON map file guarded
//! by an in-process lock, since credential writes are rare and small.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::action::{Action, ActionFactory};
use crate::error::{RepositoryError, SerializationError};

use super::{
    ActionLogEntry, Credential, CredentialRepo, ExecutionLog, ExecutionLogRepo, ExecutionLogSummary, ExecutionOutcome,
    Template, TemplateRepo, Workflow, WorkflowMetadata, WorkflowRepo,
};

pub struct FileRepository {
    workflows_dir: PathBuf,
    templates_dir: PathBuf,
    credentials_path: PathBuf,
    execution_logs_dir: PathBuf,
    credentials_lock: RwLock<()>,
}

impl FileRepository {
    pub fn new(
        workflows_dir: impl Into<PathBuf>,
        templates_dir: impl Into<PathBuf>,
        credentials_path: impl Into<PathBuf>,
        execution_logs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
            templates_dir: templates_dir.into(),
            credentials_path: credentials_path.into(),
            execution_logs_dir: execution_logs_dir.into(),
            credentials_lock: RwLock::new(()),
        }
    }

    fn workflow_path(&self, name: &str) -> PathBuf {
        self.workflows_dir.join(format!("{name}.json"))
    }

    fn template_path(&self, name: &str) -> PathBuf {
        self.templates_dir.join(format!("{name}.json"))
    }

}

async fn write_json_atomic(dir: &Path, file_name: &str, bytes: Vec<u8>) -> Result<(), RepositoryError> {
    tokio::fs::create_dir_all(dir).await?;
    let dir = dir.to_path_buf();
    let file_name = file_name.to_string();
    tokio::task::spawn_blocking(move || -> Result<(), RepositoryError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(dir.join(&file_name))
            .map_err(|e| RepositoryError::Io(e.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| RepositoryError::Backend(e.to_string()))??;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RepositoryError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RepositoryError::NotFound(path.display().to_string())
        } else {
            RepositoryError::from(e)
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))
}

fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec_pretty(value).map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))
}

/// On-disk shape for a stored workflow: actions are kept as raw JSON so the
/// file never depends on `Action` deriving `Deserialize`.
#[derive(Serialize, Deserialize)]
struct WorkflowFile {
    name: String,
    actions: Vec<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn actions_to_json(actions: &[Action]) -> Vec<Value> {
    actions.iter().map(Action::to_value).collect()
}

fn actions_from_json(values: &[Value]) -> Result<Vec<Action>, RepositoryError> {
    values
        .iter()
        .map(|v| ActionFactory::create(v).map_err(|e| RepositoryError::Backend(e.to_string())))
        .collect()
}

#[async_trait]
impl WorkflowRepo for FileRepository {
    async fn create(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError> {
        let path = self.workflow_path(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RepositoryError::AlreadyExists(name.to_string()));
        }
        let now = Utc::now();
        let file = WorkflowFile {
            name: name.to_string(),
            actions: actions_to_json(&actions),
            created_at: now,
            updated_at: now,
        };
        write_json_atomic(&self.workflows_dir, &format!("{name}.json"), to_json_bytes(&file)?).await
    }

    async fn get(&self, name: &str) -> Result<Workflow, RepositoryError> {
        let file: WorkflowFile = read_json(&self.workflow_path(name)).await?;
        Ok(Workflow {
            name: file.name,
            actions: actions_from_json(&file.actions)?,
            created_at: file.created_at,
            updated_at: file.updated_at,
        })
    }

    async fn update(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError> {
        let existing: WorkflowFile = read_json(&self.workflow_path(name)).await?;
        let file = WorkflowFile {
            name: name.to_string(),
            actions: actions_to_json(&actions),
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        write_json_atomic(&self.workflows_dir, &format!("{name}.json"), to_json_bytes(&file)?).await
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let path = self.workflow_path(name);
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RepositoryError::NotFound(name.to_string())
            } else {
                RepositoryError::from(e)
            }
        })
    }

    async fn list(&self) -> Result<Vec<WorkflowMetadata>, RepositoryError> {
        list_json_dir::<WorkflowFile>(&self.workflows_dir)
            .await?
            .into_iter()
            .map(|file| {
                Ok(WorkflowMetadata {
                    name: file.name,
                    created_at: file.created_at,
                    updated_at: file.updated_at,
                    action_count: file.actions.len(),
                })
            })
            .collect()
    }

    async fn metadata(&self, name: &str) -> Result<WorkflowMetadata, RepositoryError> {
        let file: WorkflowFile = read_json(&self.workflow_path(name)).await?;
        Ok(WorkflowMetadata {
            name: file.name,
            created_at: file.created_at,
            updated_at: file.updated_at,
            action_count: file.actions.len(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct TemplateFile {
    name: String,
    actions: Vec<Value>,
}

#[async_trait]
impl TemplateRepo for FileRepository {
    async fn create(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError> {
        let path = self.template_path(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RepositoryError::AlreadyExists(name.to_string()));
        }
        let file = TemplateFile {
            name: name.to_string(),
            actions: actions_to_json(&actions),
        };
        write_json_atomic(&self.templates_dir, &format!("{name}.json"), to_json_bytes(&file)?).await
    }

    async fn get(&self, name: &str) -> Result<Template, RepositoryError> {
        let file: TemplateFile = read_json(&self.template_path(name)).await?;
        Ok(Template {
            name: file.name,
            actions: actions_from_json(&file.actions)?,
        })
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let path = self.template_path(name);
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RepositoryError::NotFound(name.to_string())
            } else {
                RepositoryError::from(e)
            }
        })
    }

    async fn list(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(list_json_dir::<TemplateFile>(&self.templates_dir)
            .await?
            .into_iter()
            .map(|file| file.name)
            .collect())
    }
}

async fn list_json_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, RepositoryError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        // One file per workflow/template; read them concurrently rather than
        // one await at a time.
        futures::future::try_join_all(paths.iter().map(|path| read_json::<T>(path))).await
    } else {
        Ok(Vec::new())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct CredentialStoreFile {
    credentials: HashMap<String, Credential>,
}

impl FileRepository {
    async fn load_credentials(&self) -> Result<CredentialStoreFile, RepositoryError> {
        if tokio::fs::try_exists(&self.credentials_path).await.unwrap_or(false) {
            read_json(&self.credentials_path).await
        } else {
            Ok(CredentialStoreFile::default())
        }
    }

    async fn save_credentials(&self, store: &CredentialStoreFile) -> Result<(), RepositoryError> {
        let dir = self
            .credentials_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self
            .credentials_path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("credentials.json")
            .to_string();
        write_json_atomic(&dir, &file_name, to_json_bytes(store)?).await
    }
}

#[async_trait]
impl CredentialRepo for FileRepository {
    async fn create(&self, name: &str, username: &str, password_hash: &str) -> Result<(), RepositoryError> {
        let _guard = self.credentials_lock.write().await;
        let mut store = self.load_credentials().await?;
        if store.credentials.contains_key(name) {
            return Err(RepositoryError::AlreadyExists(name.to_string()));
        }
        store.credentials.insert(
            name.to_string(),
            Credential {
                name: name.to_string(),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                created_at: Utc::now(),
            },
        );
        self.save_credentials(&store).await
    }

    async fn get(&self, name: &str) -> Result<Credential, RepositoryError> {
        let _guard = self.credentials_lock.read().await;
        let store = self.load_credentials().await?;
        store
            .credentials
            .get(name)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let _guard = self.credentials_lock.write().await;
        let mut store = self.load_credentials().await?;
        if store.credentials.remove(name).is_none() {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        self.save_credentials(&store).await
    }

    async fn list(&self) -> Result<Vec<String>, RepositoryError> {
        let _guard = self.credentials_lock.read().await;
        let store = self.load_credentials().await?;
        Ok(store.credentials.keys().cloned().collect())
    }
}

/// `SUCCESS`/`FAILED`/`STOPPED` — the token the log file name embeds.
fn outcome_token(outcome: ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Success => "SUCCESS",
        ExecutionOutcome::Failed => "FAILED",
        ExecutionOutcome::Stopped => "STOPPED",
    }
}

/// `exec_<workflow>_<YYYYMMDD_HHMMSS>_<STATUS>.json`. Carries no id, so
/// `get` finds a log by scanning and matching `id` rather than building this
/// path directly.
fn log_file_name(log: &ExecutionLog) -> String {
    format!(
        "exec_{}_{}_{}.json",
        log.workflow_name,
        log.started_at.format("%Y%m%d_%H%M%S"),
        outcome_token(log.outcome)
    )
}

#[async_trait]
impl ExecutionLogRepo for FileRepository {
    async fn append(&self, log: ExecutionLog) -> Result<(), RepositoryError> {
        let file_name = log_file_name(&log);
        write_json_atomic(&self.execution_logs_dir, &file_name, to_json_bytes(&log)?).await
    }

    async fn get(&self, id: Uuid) -> Result<ExecutionLog, RepositoryError> {
        list_json_dir::<ExecutionLog>(&self.execution_logs_dir)
            .await?
            .into_iter()
            .find(|log| log.id == id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list_for_workflow(&self, workflow_name: &str, limit: usize) -> Result<Vec<ExecutionLogSummary>, RepositoryError> {
        let mut logs = list_json_dir::<ExecutionLog>(&self.execution_logs_dir)
            .await?
            .into_iter()
            .filter(|log| log.workflow_name == workflow_name)
            .collect::<Vec<_>>();
        logs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        logs.truncate(limit);
        Ok(logs.iter().map(ExecutionLogSummary::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo(tmp: &tempfile::TempDir) -> FileRepository {
        FileRepository::new(
            tmp.path().join("workflows"),
            tmp.path().join("templates"),
            tmp.path().join("credentials.json"),
            tmp.path().join("execution_logs"),
        )
    }

    #[tokio::test]
    async fn workflow_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo(&tmp);
        let action = ActionFactory::create(&json!({"type": "navigate", "name": "go", "url": "https://example.com"})).unwrap();
        WorkflowRepo::create(&repo, "demo", vec![action.clone()]).await.unwrap();
        let loaded = WorkflowRepo::get(&repo, "demo").await.unwrap();
        assert_eq!(loaded.actions, vec![action]);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_workflow_name() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo(&tmp);
        WorkflowRepo::create(&repo, "demo", vec![]).await.unwrap();
        let err = WorkflowRepo::create(&repo, "demo", vec![]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn get_missing_workflow_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo(&tmp);
        let err = WorkflowRepo::get(&repo, "nope").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn credential_store_persists_across_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo(&tmp);
        CredentialRepo::create(&repo, "login", "alice", "hash:abc").await.unwrap();
        let cred = CredentialRepo::get(&repo, "login").await.unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password_hash, "hash:abc");
    }

    #[tokio::test]
    async fn execution_log_list_filters_by_workflow_and_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repo(&tmp);
        for i in 0..3 {
            let log = ExecutionLog {
                id: Uuid::new_v4(),
                workflow_name: "demo".to_string(),
                started_at: Utc::now() + chrono::Duration::seconds(i),
                finished_at: Utc::now(),
                outcome: ExecutionOutcome::Success,
                error_message: None,
                action_log: vec![],
            };
            ExecutionLogRepo::append(&repo, log).await.unwrap();
        }
        let summaries = ExecutionLogRepo::list_for_workflow(&repo, "demo", 2).await.unwrap();
        assert_eq!(summaries.len(), 2);
    }
}
