//! Thin `clap`-based harness that exercises the engine from a shell:
//! `run`, `workflow list/create/delete`, `credential create`, and
//! `schedule add/list/cancel`. Grounded in the teacher's own
//! `clap::{Parser, Subcommand}` dispatch in `poc/src/main.rs` and
//! `src/bin/standalone.rs`'s `tracing_subscriber` setup; the core library
//! itself exposes no CLI of its own.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use workflow_engine::config::{RepositoryBackend, Settings};
use workflow_engine::credential::CredentialStore;
use workflow_engine::driver::{DriverFactory, DriverKind};
#[cfg(not(feature = "webdriver"))]
use workflow_engine::driver::MockDriverFactory;
#[cfg(feature = "webdriver")]
use workflow_engine::driver::ThirtyfourDriverFactory;
use workflow_engine::repository::file::FileRepository;
#[cfg(feature = "sql-backend")]
use workflow_engine::repository::sql::SqlRepository;
use workflow_engine::repository::{CredentialRepo, ExecutionLogRepo, TemplateRepo, WorkflowRepo};
use workflow_engine::scheduler::{Job, Scheduler, Trigger};
use workflow_engine::service::WorkflowService;

#[derive(Parser)]
#[command(name = "workflow-engine-cli")]
#[command(about = "Exercise the workflow execution engine from a shell")]
struct Cli {
    /// Path to the INI-style settings file. Falls back to built-in defaults
    /// if omitted.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a stored workflow once.
    Run {
        name: String,
        #[arg(long)]
        credential: Option<String>,
        /// Defaults to `[WebDriver] default_browser` from the loaded settings.
        #[arg(long)]
        browser: Option<String>,
        /// Path to a JSON object of input variables to seed the run's
        /// context with (e.g. a `for_each` loop's list variable).
        #[arg(long)]
        input: Option<String>,
    },
    /// Workflow storage operations.
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Credential storage operations.
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
    /// Scheduled-run operations.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List every stored workflow.
    List,
    /// Create a workflow from a JSON array of actions read from a file.
    Create {
        name: String,
        /// Path to a JSON file containing an array of action objects.
        actions_file: String,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    Create { name: String, username: String, password: String },
    List,
    Delete { name: String },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Schedule a workflow on a cron expression.
    Add {
        workflow: String,
        /// 5-or-6 field cron expression, e.g. "0 */15 * * * *".
        cron: String,
        #[arg(long)]
        credential: Option<String>,
        /// Defaults to `[WebDriver] default_browser` from the loaded settings.
        #[arg(long)]
        browser: Option<String>,
    },
    List,
    Cancel {
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    init_tracing(&settings);

    let workflows: Arc<dyn WorkflowRepo>;
    let templates: Arc<dyn TemplateRepo>;
    let credential_repo: Arc<dyn CredentialRepo>;
    let execution_logs: Arc<dyn ExecutionLogRepo>;

    match settings.repository.backend {
        RepositoryBackend::FileSystem => {
            let repo = Arc::new(FileRepository::new(
                settings.repository.workflows_path.clone(),
                settings.repository.templates_path.clone(),
                settings.repository.credentials_path.clone(),
                settings.repository.execution_logs_path.clone(),
            ));
            workflows = repo.clone();
            templates = repo.clone();
            credential_repo = repo.clone();
            execution_logs = repo;
        }
        RepositoryBackend::Database => {
            #[cfg(feature = "sql-backend")]
            {
                let repo = Arc::new(SqlRepository::connect(&settings.repository.db_path.display().to_string()).await?);
                workflows = repo.clone();
                templates = repo.clone();
                credential_repo = repo.clone();
                execution_logs = repo;
            }
            #[cfg(not(feature = "sql-backend"))]
            {
                anyhow::bail!("repository.type = database requires the `sql-backend` feature");
            }
        }
    }

    let credentials = Arc::new(CredentialStore::new(credential_repo.clone(), settings.security.password_hash_method.clone()));

    let driver_factory: Arc<dyn DriverFactory> = {
        #[cfg(feature = "webdriver")]
        {
            Arc::new(ThirtyfourDriverFactory {
                webdriver_url: settings.webdriver.url.clone(),
                connect_timeout: std::time::Duration::from_secs(settings.webdriver.connect_timeout_secs),
            })
        }
        #[cfg(not(feature = "webdriver"))]
        {
            Arc::new(MockDriverFactory)
        }
    };
    let service = Arc::new(WorkflowService::new(
        workflows,
        templates,
        credential_repo,
        execution_logs,
        credentials.clone(),
        driver_factory,
        settings.scheduler.max_while_iterations,
    ));

    match cli.command {
        Command::Run { name, credential, browser, input } => {
            let browser: DriverKind = browser.unwrap_or_else(|| settings.webdriver.default_browser.to_string()).parse()?;
            let input = match input {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => serde_json::Map::new(),
            };
            let log = service
                .run_with_input(&name, credential.as_deref(), browser, CancellationToken::new(), None, input)
                .await;
            println!("{}", serde_json::to_string_pretty(&log)?);
        }
        Command::Workflow { action } => run_workflow_action(&service, action).await?,
        Command::Credential { action } => run_credential_action(&service, action).await?,
        Command::Schedule { action } => run_schedule_action(&service, action, &settings).await?,
    }

    Ok(())
}

async fn run_workflow_action(service: &WorkflowService, action: WorkflowAction) -> anyhow::Result<()> {
    match action {
        WorkflowAction::List => {
            for workflow in service.list_workflows().await? {
                println!("{}\t{} actions\tupdated {}", workflow.name, workflow.action_count, workflow.updated_at);
            }
        }
        WorkflowAction::Create { name, actions_file } => {
            let raw = std::fs::read_to_string(actions_file)?;
            let actions: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            service.create_workflow(&name, actions).await?;
            println!("created workflow '{name}'");
        }
        WorkflowAction::Delete { name } => {
            service.delete_workflow(&name).await?;
            println!("deleted workflow '{name}'");
        }
    }
    Ok(())
}

async fn run_credential_action(service: &WorkflowService, action: CredentialAction) -> anyhow::Result<()> {
    match action {
        CredentialAction::Create { name, username, password } => {
            service.create_credential(&name, &username, &password).await?;
            println!("created credential '{name}'");
        }
        CredentialAction::List => {
            for name in service.list_credentials().await? {
                println!("{name}");
            }
        }
        CredentialAction::Delete { name } => {
            service.delete_credential(&name).await?;
            println!("deleted credential '{name}'");
        }
    }
    Ok(())
}

async fn run_schedule_action(service: &Arc<WorkflowService>, action: ScheduleAction, settings: &Settings) -> anyhow::Result<()> {
    // A fresh scheduler per invocation: the job store is in-memory only, per
    // the scheduler's explicit non-persistence (§9), so `schedule add`
    // blocks and ticks the job itself rather than registering it with
    // nothing left alive to fire it.
    let mut scheduler = Scheduler::new(service.clone(), settings.scheduler.worker_pool_size).await?;
    match action {
        ScheduleAction::Add { workflow, cron, credential, browser } => {
            let browser: DriverKind = browser.unwrap_or_else(|| settings.webdriver.default_browser.to_string()).parse()?;
            let id = scheduler
                .schedule(Job {
                    workflow_name: workflow,
                    credential_name: credential,
                    browser_type: browser,
                    trigger: Trigger::Cron(cron),
                })
                .await?;
            println!("scheduled job {id}, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
        ScheduleAction::List => {
            for job in scheduler.list().await {
                println!(
                    "{}\t{}\tnext={}",
                    job.id,
                    job.workflow_name,
                    job.next_fire.map(|t| t.to_rfc3339()).unwrap_or_else(|| "n/a".to_string())
                );
            }
        }
        ScheduleAction::Cancel { id } => {
            scheduler.cancel(id).await?;
            println!("cancelled job {id}");
        }
    }
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(match settings.general.log_level.as_filter_directive() {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}
