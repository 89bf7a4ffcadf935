//! SQLite-backed repository via `sqlx`. Schema is created on first
//! connection; every table stores its structured payload as a JSON text
//! column, which keeps the schema stable as the action model grows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::action::{Action, ActionFactory};
use crate::error::{RepositoryError, SerializationError};

use super::{
    ActionLogEntry, Credential, CredentialRepo, ExecutionLog, ExecutionLogRepo, ExecutionLogSummary, ExecutionOutcome,
    Template, TemplateRepo, Workflow, WorkflowMetadata, WorkflowRepo,
};

pub struct SqlRepository {
    pool: SqlitePool,
}

impl SqlRepository {
    pub async fn connect(db_path: &str) -> Result<Self, RepositoryError> {
        let url = format!("sqlite://{db_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                name TEXT PRIMARY KEY,
                actions_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS templates (
                name TEXT PRIMARY KEY,
                actions_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                name TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_logs (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                error_message TEXT,
                action_log_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;

        Ok(())
    }
}

fn actions_to_json_string(actions: &[Action]) -> Result<String, RepositoryError> {
    let values: Vec<Value> = actions.iter().map(Action::to_value).collect();
    serde_json::to_string(&values).map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))
}

fn actions_from_json_string(text: &str) -> Result<Vec<Action>, RepositoryError> {
    let values: Vec<Value> =
        serde_json::from_str(text).map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))?;
    values
        .iter()
        .map(|v| ActionFactory::create(v).map_err(|e| RepositoryError::Backend(e.to_string())))
        .collect()
}

#[async_trait]
impl WorkflowRepo for SqlRepository {
    async fn create(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError> {
        let actions_json = actions_to_json_string(&actions)?;
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO workflows (name, actions_json, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(&actions_json)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(RepositoryError::Backend(e.to_string())),
        }
    }

    async fn get(&self, name: &str) -> Result<Workflow, RepositoryError> {
        let row = sqlx::query("SELECT name, actions_json, created_at, updated_at FROM workflows WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;

        let actions_json: String = row.try_get("actions_json").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let created_at: String = row.try_get("created_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;

        Ok(Workflow {
            name: name.to_string(),
            actions: actions_from_json_string(&actions_json)?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }

    async fn update(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError> {
        let actions_json = actions_to_json_string(&actions)?;
        let result = sqlx::query("UPDATE workflows SET actions_json = ?, updated_at = ? WHERE name = ?")
            .bind(&actions_json)
            .bind(Utc::now().to_rfc3339())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowMetadata>, RepositoryError> {
        let rows = sqlx::query("SELECT name, actions_json, created_at, updated_at FROM workflows")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let name: String = row.try_get("name").map_err(|e| RepositoryError::Backend(e.to_string()))?;
                let actions_json: String = row.try_get("actions_json").map_err(|e| RepositoryError::Backend(e.to_string()))?;
                let created_at: String = row.try_get("created_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
                let updated_at: String = row.try_get("updated_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
                let action_count: Value = serde_json::from_str(&actions_json)
                    .map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))?;
                Ok(WorkflowMetadata {
                    name,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                    action_count: action_count.as_array().map(Vec::len).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn metadata(&self, name: &str) -> Result<WorkflowMetadata, RepositoryError> {
        let row = sqlx::query("SELECT actions_json, created_at, updated_at FROM workflows WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        let actions_json: String = row.try_get("actions_json").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let created_at: String = row.try_get("created_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let action_count: Value =
            serde_json::from_str(&actions_json).map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))?;
        Ok(WorkflowMetadata {
            name: name.to_string(),
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            action_count: action_count.as_array().map(Vec::len).unwrap_or(0),
        })
    }
}

#[async_trait]
impl TemplateRepo for SqlRepository {
    async fn create(&self, name: &str, actions: Vec<Action>) -> Result<(), RepositoryError> {
        let actions_json = actions_to_json_string(&actions)?;
        let result = sqlx::query("INSERT INTO templates (name, actions_json) VALUES (?, ?)")
            .bind(name)
            .bind(&actions_json)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(RepositoryError::Backend(e.to_string())),
        }
    }

    async fn get(&self, name: &str) -> Result<Template, RepositoryError> {
        let row = sqlx::query("SELECT actions_json FROM templates WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        let actions_json: String = row.try_get("actions_json").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(Template {
            name: name.to_string(),
            actions: actions_from_json_string(&actions_json)?,
        })
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM templates WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT name FROM templates")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| row.try_get("name").map_err(|e| RepositoryError::Backend(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl CredentialRepo for SqlRepository {
    async fn create(&self, name: &str, username: &str, password_hash: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("INSERT INTO credentials (name, username, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(username)
            .bind(password_hash)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(RepositoryError::Backend(e.to_string())),
        }
    }

    async fn get(&self, name: &str) -> Result<Credential, RepositoryError> {
        let row = sqlx::query("SELECT username, password_hash, created_at FROM credentials WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        let username: String = row.try_get("username").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let password_hash: String = row.try_get("password_hash").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        let created_at: String = row.try_get("created_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(Credential {
            name: name.to_string(),
            username,
            password_hash,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM credentials WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT name FROM credentials")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| row.try_get("name").map_err(|e| RepositoryError::Backend(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl ExecutionLogRepo for SqlRepository {
    async fn append(&self, log: ExecutionLog) -> Result<(), RepositoryError> {
        let action_log_json = serde_json::to_string(&log.action_log)
            .map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))?;
        sqlx::query(
            "INSERT INTO execution_logs (id, workflow_name, started_at, finished_at, outcome, error_message, action_log_json) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.id.to_string())
        .bind(&log.workflow_name)
        .bind(log.started_at.to_rfc3339())
        .bind(log.finished_at.to_rfc3339())
        .bind(outcome_as_str(log.outcome))
        .bind(&log.error_message)
        .bind(&action_log_json)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ExecutionLog, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, workflow_name, started_at, finished_at, outcome, error_message, action_log_json \
             FROM execution_logs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?
        .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        row_to_execution_log(row)
    }

    async fn list_for_workflow(&self, workflow_name: &str, limit: usize) -> Result<Vec<ExecutionLogSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, workflow_name, started_at, finished_at, outcome, error_message, action_log_json \
             FROM execution_logs WHERE workflow_name = ? ORDER BY started_at DESC LIMIT ?",
        )
        .bind(workflow_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Backend(e.to_string()))?;
        rows.into_iter()
            .map(|row| row_to_execution_log(row).map(|log| ExecutionLogSummary::from(&log)))
            .collect()
    }
}

fn outcome_as_str(outcome: ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Success => "success",
        ExecutionOutcome::Failed => "failed",
        ExecutionOutcome::Stopped => "stopped",
    }
}

fn outcome_from_str(s: &str) -> Result<ExecutionOutcome, RepositoryError> {
    match s {
        "success" => Ok(ExecutionOutcome::Success),
        "failed" => Ok(ExecutionOutcome::Failed),
        "stopped" => Ok(ExecutionOutcome::Stopped),
        other => Err(RepositoryError::Backend(format!("unknown outcome '{other}'"))),
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionFactory;
    use serde_json::json;

    async fn repo() -> (SqlRepository, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = SqlRepository::connect(&tmp.path().join("engine.db").display().to_string()).await.unwrap();
        (repo, tmp)
    }

    #[tokio::test]
    async fn workflow_round_trips_through_sqlite() {
        let (repo, _tmp) = repo().await;
        let action = ActionFactory::create(&json!({"type": "navigate", "name": "go", "url": "https://example.com"})).unwrap();
        WorkflowRepo::create(&repo, "demo", vec![action.clone()]).await.unwrap();
        let loaded = WorkflowRepo::get(&repo, "demo").await.unwrap();
        assert_eq!(loaded.actions, vec![action]);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_workflow_name() {
        let (repo, _tmp) = repo().await;
        WorkflowRepo::create(&repo, "demo", vec![]).await.unwrap();
        let err = WorkflowRepo::create(&repo, "demo", vec![]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn get_missing_workflow_is_not_found() {
        let (repo, _tmp) = repo().await;
        let err = WorkflowRepo::get(&repo, "nope").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn credential_store_persists_across_reads() {
        let (repo, _tmp) = repo().await;
        CredentialRepo::create(&repo, "login", "alice", "hash:abc").await.unwrap();
        let cred = CredentialRepo::get(&repo, "login").await.unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password_hash, "hash:abc");
    }

    #[tokio::test]
    async fn execution_log_list_filters_by_workflow_and_limit() {
        let (repo, _tmp) = repo().await;
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

fn row_to_execution_log(row: sqlx::sqlite::SqliteRow) -> Result<ExecutionLog, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let workflow_name: String = row.try_get("workflow_name").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let started_at: String = row.try_get("started_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let finished_at: String = row.try_get("finished_at").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let outcome: String = row.try_get("outcome").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let error_message: Option<String> = row.try_get("error_message").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let action_log_json: String = row.try_get("action_log_json").map_err(|e| RepositoryError::Backend(e.to_string()))?;
    let action_log: Vec<ActionLogEntry> =
        serde_json::from_str(&action_log_json).map_err(|e| RepositoryError::Serialization(SerializationError::Json(e)))?;

    Ok(ExecutionLog {
        id: Uuid::parse_str(&id).map_err(|e| RepositoryError::Backend(e.to_string()))?,
        workflow_name,
        started_at: parse_timestamp(&started_at)?,
        finished_at: parse_timestamp(&finished_at)?,
        outcome: outcome_from_str(&outcome)?,
        error_message,
        action_log,
    })
}
