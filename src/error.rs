//! Error taxonomy for the workflow engine.
//!
//! Each layer owns its error enum (mirroring how the rest of the crate is
//! layered); [`EngineError`] only exists at the outermost boundary so a CLI
//! or service caller has one type to match on.

use thiserror::Error;
use uuid::Uuid;

/// A single path segment recorded while validating nested action lists,
/// e.g. `true_branch[2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub field: &'static str,
    pub index: usize,
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.field, self.index)
    }
}

fn format_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Errors raised constructing or validating an [`crate::action::Action`].
#[derive(Error, Debug)]
pub enum ActionModelError {
    #[error("unknown action type '{action_type}'{}", name.as_ref().map(|n| format!(" (name: {n})")).unwrap_or_default())]
    UnknownType {
        action_type: String,
        name: Option<String>,
    },

    #[error("invalid action{}: {message}", name.as_ref().map(|n| format!(" '{n}'")).unwrap_or_default())]
    Invalid {
        name: Option<String>,
        message: String,
    },

    #[error("invalid action at {}: {message}", format_path(.path))]
    NestedInvalid {
        path: Vec<PathSegment>,
        message: String,
    },

    #[error("malformed action payload: {0}")]
    Malformed(String),
}

/// Errors raised by a [`crate::driver::BrowserDriver`] implementation.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("navigation to '{url}' failed: {message}")]
    Navigation { url: String, message: String },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("timed out waiting for '{selector}' after {timeout_ms}ms")]
    Timeout { selector: String, timeout_ms: u64 },

    #[error("script execution failed: {0}")]
    ScriptError(String),

    #[error("unsupported browser type: {0}")]
    UnsupportedBrowser(String),

    #[error("no alert is currently open")]
    NoAlertPresent,

    #[error("driver I/O error: {0}")]
    Io(String),
}

/// Errors raised executing a single leaf action; wraps the underlying cause.
#[derive(Error, Debug)]
#[error("action '{action_name}' ({action_type}) failed: {source}")]
pub struct ActionError {
    pub action_name: String,
    pub action_type: &'static str,
    #[source]
    pub source: ActionErrorCause,
}

impl ActionError {
    pub fn new(action_name: impl Into<String>, action_type: &'static str, source: ActionErrorCause) -> Self {
        Self {
            action_name: action_name.into(),
            action_type,
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ActionErrorCause {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("template cycle detected involving '{0}'")]
    TemplateCycle(String),
    #[error("loop exceeded maximum of {max} iterations")]
    LoopLimitExceeded { max: usize },
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a [`crate::repository`] implementation.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}

/// Errors decoding stored JSON payloads back into typed values.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(String),
}

/// Errors raised by [`crate::credential::CredentialStore`].
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("credential '{0}' already exists")]
    AlreadyExists(String),

    #[error("hashing failed: {0}")]
    HashingFailed(String),

    #[error("invalid credential reference '{0}': expected 'name.(username|password)'")]
    InvalidReference(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Top-level run failure. Every interpreter run terminates with exactly one
/// of these outcomes, captured in the returned `ExecutionLog` rather than
/// propagated to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("stopped by cancellation request")]
    Stopped,
    #[error("{0}")]
    Failed(String),
}

/// Errors raised by [`crate::scheduler::Scheduler`].
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("job '{0}' not found")]
    JobNotFound(Uuid),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("scheduler backend error: {0}")]
    Backend(String),
}

/// Errors raised validating or loading [`crate::config::Settings`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required key '{section}.{key}'")]
    MissingKey { section: String, key: String },

    #[error("invalid value for '{section}.{key}': {message}")]
    InvalidValue {
        section: String,
        key: String,
        message: String,
    },

    #[error("failed to read config file '{path}': {message}")]
    Io { path: String, message: String },
}

/// Crate-level boundary error. Constructed only at CLI / service edges via
/// `#[from]`; the interpreter and repositories never produce this type
/// directly.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    ActionModel(#[from] ActionModelError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
