//! Executes a sequence of [`Action`]s against a [`BrowserDriver`].
//!
//! Control-flow actions (`Conditional`, `Loop`, `ErrorHandling`, `Template`)
//! recurse into nested action lists; since Rust doesn't support recursive
//! `async fn` directly, the recursive entry points return a boxed future,
//! the same shape the teacher's `WorkflowEngine::execute_step` uses.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::action::{Action, ActionKind, Condition, LoopSpec, ValueType};
use crate::context::{catch_frame, loop_frame, Context};
use crate::credential::parse_value_key;
use crate::credential::CredentialStore;
use crate::driver::BrowserDriver;
use crate::error::{ActionError, ActionErrorCause, WorkflowError};
use crate::repository::{ActionLogEntry, TemplateRepo};

/// Internal control-flow signal. Cancellation always wins over a
/// `try`/`catch` block: only `Action` is ever caught.
enum RunInterrupt {
    Stopped,
    Action(ActionError),
}

impl From<RunInterrupt> for WorkflowError {
    fn from(interrupt: RunInterrupt) -> Self {
        match interrupt {
            RunInterrupt::Stopped => WorkflowError::Stopped,
            RunInterrupt::Action(err) => WorkflowError::Failed(err.to_string()),
        }
    }
}

fn template_placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid regex"))
}

/// Emitted once per completed leaf action, for a UI (or any other single
/// consumer) watching a run in progress. Delivered best-effort: a full
/// channel drops the event rather than stalling execution.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub action_name: String,
    pub action_type: String,
    pub succeeded: bool,
    pub message: Option<String>,
}

impl From<&ActionLogEntry> for ProgressEvent {
    fn from(entry: &ActionLogEntry) -> Self {
        ProgressEvent {
            action_name: entry.action_name.clone(),
            action_type: entry.action_type.clone(),
            succeeded: entry.succeeded,
            message: entry.message.clone(),
        }
    }
}

/// Result of a full [`Interpreter::run`]: the leaf-action log recorded so
/// far, and the failure that ended the run early, if any. Splitting these
/// apart (rather than `Result<Vec<ActionLogEntry>, WorkflowError>`) is what
/// lets a caller persist a partial log for a run that was cancelled or that
/// failed outside any `try`/`catch` block.
#[derive(Debug)]
pub struct RunOutcome {
    pub action_log: Vec<ActionLogEntry>,
    pub error: Option<WorkflowError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Interpreter {
    driver: Arc<dyn BrowserDriver>,
    templates: Arc<dyn TemplateRepo>,
    credentials: Arc<CredentialStore>,
    cancellation: CancellationToken,
    max_while_iterations: usize,
    progress: Option<mpsc::Sender<ProgressEvent>>,
}

impl Interpreter {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        templates: Arc<dyn TemplateRepo>,
        credentials: Arc<CredentialStore>,
        cancellation: CancellationToken,
        max_while_iterations: usize,
    ) -> Self {
        Self {
            driver,
            templates,
            credentials,
            cancellation,
            max_while_iterations,
            progress: None,
        }
    }

    /// Attach a bounded, single-consumer channel that receives a
    /// [`ProgressEvent`] after every completed leaf action. Optional: a run
    /// with no attached channel behaves identically, just without the
    /// notifications.
    pub fn with_progress(mut self, sender: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Run a full action list. Always returns the leaf-action log recorded
    /// up to the point execution stopped, plus `error` set when that stop
    /// was a `Stopped`/`Failed` outcome rather than a clean finish — a
    /// cancelled loop or an uncaught error still reports whatever leaves it
    /// already executed, instead of discarding them.
    pub async fn run(&self, actions: &[Action], context: &mut Context) -> RunOutcome {
        let mut log = Vec::new();
        let mut template_stack = Vec::new();
        let error = self
            .run_actions(actions, context, &mut log, &mut template_stack)
            .await
            .err()
            .map(WorkflowError::from);
        RunOutcome { action_log: log, error }
    }

    /// Expand `{{variable}}` placeholders against the current context.
    /// A placeholder with no matching variable is left untouched, matching
    /// how the template expander only ever substitutes variables it knows.
    fn expand(&self, template: &str, context: &Context) -> String {
        template_placeholder_regex()
            .replace_all(template, |caps: &regex::Captures| {
                let key = &caps[1];
                match context.lookup(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn run_actions<'a>(
        &'a self,
        actions: &'a [Action],
        context: &'a mut Context,
        log: &'a mut Vec<ActionLogEntry>,
        template_stack: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RunInterrupt>> + Send + 'a>> {
        Box::pin(async move {
            for action in actions {
                if self.cancellation.is_cancelled() {
                    return Err(RunInterrupt::Stopped);
                }
                self.run_action(action, context, log, template_stack).await?;
            }
            Ok(())
        })
    }

    fn run_action<'a>(
        &'a self,
        action: &'a Action,
        context: &'a mut Context,
        log: &'a mut Vec<ActionLogEntry>,
        template_stack: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RunInterrupt>> + Send + 'a>> {
        let span = tracing::info_span!("action", name = %action.name, r#type = action.type_name());
        Box::pin(
            async move {
                match &action.kind {
                    ActionKind::Conditional {
                        condition,
                        true_branch,
                        false_branch,
                    } => {
                        let taken = self.evaluate_condition(action, condition, context).await?;
                        let branch = if taken { true_branch } else { false_branch };
                        self.run_actions(branch, context, log, template_stack).await
                    }
                    ActionKind::Loop { spec, loop_actions } => self.run_loop(action, spec, loop_actions, context, log, template_stack).await,
                    ActionKind::ErrorHandling { try_actions, catch_actions } => {
                        match self.run_actions(try_actions, context, log, template_stack).await {
                            Ok(()) => Ok(()),
                            Err(RunInterrupt::Stopped) => Err(RunInterrupt::Stopped),
                            Err(RunInterrupt::Action(err)) => {
                                context.push(catch_frame(err.to_string(), err.action_type.to_string()));
                                let result = self.run_actions(catch_actions, context, log, template_stack).await;
                                context.pop();
                                result
                            }
                        }
                    }
                    ActionKind::Template { template_name } => {
                        if template_stack.iter().any(|n| n == template_name) {
                            return Err(self.wrap(action, ActionErrorCause::TemplateCycle(template_name.clone())));
                        }
                        let template = self
                            .templates
                            .get(template_name)
                            .await
                            .map_err(|e| self.wrap(action, ActionErrorCause::from(e)))?;
                        template_stack.push(template_name.clone());
                        let result = self.run_actions(&template.actions, context, log, template_stack).await;
                        template_stack.pop();
                        result
                    }
                    leaf => self.run_leaf(action, leaf, context, log).await,
                }
            }
            .instrument(span),
        )
    }

    async fn run_loop<'a>(
        &'a self,
        action: &'a Action,
        spec: &'a LoopSpec,
        loop_actions: &'a [Action],
        context: &'a mut Context,
        log: &'a mut Vec<ActionLogEntry>,
        template_stack: &'a mut Vec<String>,
    ) -> Result<(), RunInterrupt> {
        if loop_actions.is_empty() {
            tracing::warn!(action = %action.name, "loop body is empty; iterating without effect");
        }
        match spec {
            LoopSpec::Count { count } => {
                for index in 0..*count as usize {
                    if self.cancellation.is_cancelled() {
                        return Err(RunInterrupt::Stopped);
                    }
                    context.push(loop_frame(index, Some(*count as usize), None));
                    let result = self.run_actions(loop_actions, context, log, template_stack).await;
                    context.pop();
                    result?;
                }
                Ok(())
            }
            LoopSpec::ForEach { list_variable_name } => {
                let items = match context.lookup(list_variable_name) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(_) => return Err(self.wrap(action, ActionErrorCause::Other(format!("'{list_variable_name}' is not a list")))),
                    None => return Err(self.wrap(action, ActionErrorCause::Other(format!("variable '{list_variable_name}' not found")))),
                };
                let total = items.len();
                for (index, item) in items.into_iter().enumerate() {
                    if self.cancellation.is_cancelled() {
                        return Err(RunInterrupt::Stopped);
                    }
                    context.push(loop_frame(index, Some(total), Some(item)));
                    let result = self.run_actions(loop_actions, context, log, template_stack).await;
                    context.pop();
                    result?;
                }
                Ok(())
            }
            LoopSpec::While { condition } => {
                let mut index = 0usize;
                loop {
                    if self.cancellation.is_cancelled() {
                        return Err(RunInterrupt::Stopped);
                    }
                    if index >= self.max_while_iterations {
                        return Err(self.wrap(action, ActionErrorCause::LoopLimitExceeded { max: self.max_while_iterations }));
                    }
                    if !self.evaluate_condition(action, condition, context).await? {
                        break;
                    }
                    context.push(loop_frame(index, None, None));
                    let result = self.run_actions(loop_actions, context, log, template_stack).await;
                    context.pop();
                    result?;
                    index += 1;
                }
                Ok(())
            }
        }
    }

    fn evaluate_condition<'a>(
        &'a self,
        action: &'a Action,
        condition: &'a Condition,
        context: &'a Context,
    ) -> Pin<Box<dyn Future<Output = Result<bool, RunInterrupt>> + Send + 'a>> {
        Box::pin(async move {
            match condition {
                Condition::ElementPresent { selector } => {
                    let selector = self.expand(selector, context);
                    self.driver.is_present(&selector).await.map_err(|e| self.wrap(action, e.into()))
                }
                Condition::ElementNotPresent { selector } => {
                    let selector = self.expand(selector, context);
                    self.driver
                        .is_present(&selector)
                        .await
                        .map(|present| !present)
                        .map_err(|e| self.wrap(action, e.into()))
                }
                Condition::VariableEquals { variable_name, expected_value } => {
                    let actual_is_null = matches!(context.lookup(variable_name), None | Some(Value::Null));
                    let expected_is_null = matches!(expected_value, None | Some(Value::Null));
                    Ok(if actual_is_null || expected_is_null {
                        actual_is_null && expected_is_null
                    } else {
                        let actual = context.lookup(variable_name).map(value_to_text).unwrap_or_default();
                        let expected = expected_value.as_ref().map(value_to_text).unwrap_or_default();
                        actual == expected
                    })
                }
                Condition::JavascriptEval { script } => {
                    let expanded = self.expand(script, context);
                    let result = self.driver.execute_script(&expanded).await.map_err(|e| self.wrap(action, e.into()))?;
                    Ok(is_truthy(&result))
                }
            }
        })
    }

    async fn run_leaf(&self, action: &Action, kind: &ActionKind, context: &mut Context, log: &mut Vec<ActionLogEntry>) -> Result<(), RunInterrupt> {
        let outcome = self.execute_leaf(kind, context).await;
        let entry = ActionLogEntry {
            action_name: action.name.clone(),
            action_type: action.type_name().to_string(),
            succeeded: outcome.is_ok(),
            message: outcome.as_ref().err().map(|cause| cause.to_string()),
        };
        if let Some(sender) = &self.progress {
            let _ = sender.try_send(ProgressEvent::from(&entry));
        }
        log.push(entry);
        outcome.map_err(|cause| self.wrap(action, cause))
    }

    async fn execute_leaf(&self, kind: &ActionKind, context: &mut Context) -> Result<(), ActionErrorCause> {
        match kind {
            ActionKind::Navigate { url } => {
                let url = self.expand(url, context);
                self.driver.navigate(&url).await.map_err(ActionErrorCause::from)
            }
            ActionKind::Click { selector } => {
                let selector = self.expand(selector, context);
                self.driver.click(&selector).await.map_err(ActionErrorCause::from)
            }
            ActionKind::Type { selector, value_type, value_key } => {
                let selector = self.expand(selector, context);
                let value = match value_type {
                    ValueType::Text => context
                        .lookup(value_key)
                        .map(value_to_text)
                        .ok_or_else(|| ActionErrorCause::Other(format!("variable '{value_key}' not found")))?,
                    ValueType::Credential => {
                        parse_value_key(value_key).map_err(ActionErrorCause::from)?;
                        self.credentials.resolve_value(value_key).await.map_err(ActionErrorCause::from)?
                    }
                };
                self.driver.type_text(&selector, &value).await.map_err(ActionErrorCause::from)
            }
            ActionKind::Wait { duration_seconds } => {
                let duration = std::time::Duration::from_secs_f64(*duration_seconds);
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(()),
                    _ = self.cancellation.cancelled() => Err(ActionErrorCause::Other("cancelled while waiting".to_string())),
                }
            }
            ActionKind::Screenshot { file_path } => {
                let file_path = self.expand(file_path, context);
                self.driver.screenshot(&file_path).await.map_err(ActionErrorCause::from)
            }
            ActionKind::Conditional { .. } | ActionKind::Loop { .. } | ActionKind::ErrorHandling { .. } | ActionKind::Template { .. } => {
                unreachable!("control-flow actions are handled in run_action")
            }
        }
    }

    fn wrap(&self, action: &Action, cause: impl Into<ActionErrorCause>) -> RunInterrupt {
        RunInterrupt::Action(ActionError::new(action.name.clone(), action.type_name(), cause.into()))
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionFactory;
    use crate::driver::MockDriver;
    use crate::error::RepositoryError;
    use crate::repository::Template;
    use async_trait::async_trait;
    use serde_json::json;

    struct EmptyTemplates;

    #[async_trait]
    impl TemplateRepo for EmptyTemplates {
        async fn create(&self, _name: &str, _actions: Vec<Action>) -> Result<(), RepositoryError> {
            unimplemented!()
        }
        async fn get(&self, name: &str) -> Result<Template, RepositoryError> {
            Err(RepositoryError::NotFound(name.to_string()))
        }
        async fn delete(&self, _name: &str) -> Result<(), RepositoryError> {
            unimplemented!()
        }
        async fn list(&self) -> Result<Vec<String>, RepositoryError> {
            Ok(vec![])
        }
    }

    fn harness() -> (Interpreter, Arc<MockDriver>) {
        let driver = Arc::new(MockDriver::new());
        let repo_dir = tempfile::tempdir().unwrap();
        let credential_repo = Arc::new(crate::repository::file::FileRepository::new(
            repo_dir.path().join("workflows"),
            repo_dir.path().join("templates"),
            repo_dir.path().join("credentials.json"),
            repo_dir.path().join("execution_logs"),
        ));
        let credentials = Arc::new(CredentialStore::new(credential_repo, crate::config::PasswordHashMethod::Argon2));
        let interpreter = Interpreter::new(driver.clone(), Arc::new(EmptyTemplates), credentials, CancellationToken::new(), 1000);
        (interpreter, driver)
    }

    #[tokio::test]
    async fn runs_straight_line_sequence() {
        let (interpreter, driver) = harness();
        driver.register_selector("#go").await;
        let actions = vec![
            ActionFactory::create(&json!({"type": "navigate", "name": "go", "url": "https://example.com"})).unwrap(),
            ActionFactory::create(&json!({"type": "click", "name": "click-go", "selector": "#go"})).unwrap(),
        ];
        let mut context = Context::new();
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.action_log.len(), 2);
        assert!(outcome.action_log.iter().all(|entry| entry.succeeded));
    }

    #[tokio::test]
    async fn conditional_picks_false_branch_when_element_missing() {
        let (interpreter, _driver) = harness();
        let actions = vec![ActionFactory::create(&json!({
            "type": "conditional",
            "name": "c",
            "condition_type": "element_present",
            "selector": "#missing",
            "true_branch": [{"type": "navigate", "name": "yes", "url": "https://yes.example.com"}],
            "false_branch": [{"type": "navigate", "name": "no", "url": "https://no.example.com"}],
        }))
        .unwrap()];
        let mut context = Context::new();
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.action_log[0].action_name, "no");
    }

    #[tokio::test]
    async fn for_each_loop_iterates_list_variable() {
        let (interpreter, driver) = harness();
        driver.register_selector("#item").await;
        let mut context = Context::new();
        context.set("items", json!(["a", "b", "c"]));
        let actions = vec![ActionFactory::create(&json!({
            "type": "loop",
            "name": "each",
            "loop_type": "for_each",
            "list_variable_name": "items",
            "loop_actions": [{"type": "click", "name": "click-item", "selector": "#item"}],
        }))
        .unwrap()];
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.action_log.len(), 3);
    }

    #[tokio::test]
    async fn variable_equals_compares_string_form_across_types() {
        let (interpreter, _driver) = harness();
        let mut context = Context::new();
        context.set("count", json!(5));
        let actions = vec![ActionFactory::create(&json!({
            "type": "conditional",
            "name": "c",
            "condition_type": "variable_equals",
            "variable_name": "count",
            "expected_value": "5",
            "true_branch": [{"type": "navigate", "name": "matched", "url": "https://matched.example.com"}],
            "false_branch": [{"type": "navigate", "name": "unmatched", "url": "https://unmatched.example.com"}],
        }))
        .unwrap()];
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.action_log[0].action_name, "matched");
    }

    #[tokio::test]
    async fn variable_equals_treats_missing_variable_as_null() {
        let (interpreter, _driver) = harness();
        let mut context = Context::new();
        let actions = vec![ActionFactory::create(&json!({
            "type": "conditional",
            "name": "c",
            "condition_type": "variable_equals",
            "variable_name": "absent",
            "expected_value": null,
            "true_branch": [{"type": "navigate", "name": "both-null", "url": "https://both-null.example.com"}],
            "false_branch": [{"type": "navigate", "name": "mismatch", "url": "https://mismatch.example.com"}],
        }))
        .unwrap()];
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.action_log[0].action_name, "both-null");
    }

    #[tokio::test]
    async fn error_handling_recovers_from_failed_try_action() {
        let (interpreter, _driver) = harness();
        let actions = vec![ActionFactory::create(&json!({
            "type": "error_handling",
            "name": "eh",
            "try_actions": [{"type": "click", "name": "bad-click", "selector": "#missing"}],
            "catch_actions": [{"type": "navigate", "name": "recover", "url": "https://recover.example.com"}],
        }))
        .unwrap()];
        let mut context = Context::new();
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.action_log.len(), 2);
        assert!(!outcome.action_log[0].succeeded);
        assert_eq!(outcome.action_log[1].action_name, "recover");
        assert!(outcome.action_log[1].succeeded);
    }

    #[tokio::test]
    async fn template_self_reference_is_rejected() {
        struct SelfReferencingTemplates;

        #[async_trait]
        impl TemplateRepo for SelfReferencingTemplates {
            async fn create(&self, _name: &str, _actions: Vec<Action>) -> Result<(), RepositoryError> {
                unimplemented!()
            }
            async fn get(&self, name: &str) -> Result<Template, RepositoryError> {
                Ok(Template {
                    name: name.to_string(),
                    actions: vec![ActionFactory::create(&json!({"type": "template", "name": "recurse", "template_name": name})).unwrap()],
                })
            }
            async fn delete(&self, _name: &str) -> Result<(), RepositoryError> {
                unimplemented!()
            }
            async fn list(&self) -> Result<Vec<String>, RepositoryError> {
                Ok(vec![])
            }
        }

        let driver = Arc::new(MockDriver::new());
        let repo_dir = tempfile::tempdir().unwrap();
        let credential_repo = Arc::new(crate::repository::file::FileRepository::new(
            repo_dir.path().join("workflows"),
            repo_dir.path().join("templates"),
            repo_dir.path().join("credentials.json"),
            repo_dir.path().join("execution_logs"),
        ));
        let credentials = Arc::new(CredentialStore::new(credential_repo, crate::config::PasswordHashMethod::Argon2));
        let interpreter = Interpreter::new(driver, Arc::new(SelfReferencingTemplates), credentials, CancellationToken::new(), 1000);

        let actions = vec![ActionFactory::create(&json!({"type": "template", "name": "start", "template_name": "loopy"})).unwrap()];
        let mut context = Context::new();
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(matches!(outcome.error, Some(WorkflowError::Failed(_))));
        assert!(outcome.action_log.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_a_count_loop_mid_iteration() {
        let driver = Arc::new(MockDriver::new());
        let repo_dir = tempfile::tempdir().unwrap();
        let credential_repo = Arc::new(crate::repository::file::FileRepository::new(
            repo_dir.path().join("workflows"),
            repo_dir.path().join("templates"),
            repo_dir.path().join("credentials.json"),
            repo_dir.path().join("execution_logs"),
        ));
        let credentials = Arc::new(CredentialStore::new(credential_repo, crate::config::PasswordHashMethod::Argon2));
        let cancellation = CancellationToken::new();
        let interpreter = Interpreter::new(driver, Arc::new(EmptyTemplates), credentials, cancellation.clone(), 1000);

        cancellation.cancel();
        let actions = vec![ActionFactory::create(&json!({
            "type": "loop",
            "name": "l",
            "loop_type": "count",
            "count": 5,
            "loop_actions": [{"type": "navigate", "name": "n", "url": "https://example.com"}],
        }))
        .unwrap()];
        let mut context = Context::new();
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(matches!(outcome.error, Some(WorkflowError::Stopped)));
        assert!(outcome.action_log.is_empty());
    }

    #[tokio::test]
    async fn progress_channel_receives_one_event_per_leaf_action() {
        let (interpreter, driver) = harness();
        driver.register_selector("#go").await;
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let interpreter = interpreter.with_progress(tx);
        let actions = vec![
            ActionFactory::create(&json!({"type": "navigate", "name": "go", "url": "https://example.com"})).unwrap(),
            ActionFactory::create(&json!({"type": "click", "name": "click-go", "selector": "#go"})).unwrap(),
        ];
        let mut context = Context::new();
        let outcome = interpreter.run(&actions, &mut context).await;
        assert!(outcome.is_success());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.action_name, "go");
        assert!(first.succeeded);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.action_name, "click-go");
        assert!(rx.try_recv().is_err());
    }
}
