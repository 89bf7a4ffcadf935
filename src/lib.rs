//! Workflow execution engine: typed browser-automation actions, an
//! interpreter that runs them against a [`driver::BrowserDriver`], durable
//! storage for workflows/templates/credentials/execution history, and a
//! scheduler that triggers runs on cron/interval/date schedules.

pub mod action;
pub mod config;
pub mod context;
pub mod credential;
pub mod driver;
pub mod error;
pub mod interpreter;
pub mod repository;
pub mod scheduler;
pub mod service;

pub use action::{Action, ActionFactory, ActionKind};
pub use config::Settings;
pub use context::Context;
pub use error::{EngineError, Result};
pub use interpreter::Interpreter;
pub use service::WorkflowService;

pub mod prelude {
    pub use crate::action::{Action, ActionFactory, ActionKind, Condition, LoopSpec, ValueType};
    pub use crate::config::Settings;
    pub use crate::context::Context;
    pub use crate::credential::CredentialStore;
    pub use crate::driver::{BrowserDriver, DriverFactory, DriverKind, FrameRef, MockDriverFactory};
    pub use crate::error::{EngineError, Result, WorkflowError};
    pub use crate::interpreter::{Interpreter, ProgressEvent, RunOutcome};
    pub use crate::repository::{Credential, ExecutionLog, ExecutionLogSummary, WorkflowMetadata};
    pub use crate::scheduler::{Job, JobView, Scheduler, Trigger};
    pub use crate::service::WorkflowService;
}
