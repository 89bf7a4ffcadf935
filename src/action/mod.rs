//! The action model: typed variants, the construction/validation factory,
//! and (de)serialization to the JSON wire format workflows and templates
//! are stored in.
//!
//! Construction only ever happens through [`ActionFactory::create`] — there
//! is no public way to obtain an [`Action`] that skipped validation, which
//! is how the specification's "every action validates before execution"
//! invariant is actually enforced rather than merely documented.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::{ActionModelError, PathSegment};

/// A single executable step, constructed only via [`ActionFactory`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub name: String,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    /// Re-serialize this action back to the JSON map form it was (or could
    /// have been) loaded from.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Action serialization never fails")
    }

    /// The variant's wire-format discriminator, e.g. `"navigate"`.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        value_type: ValueType,
        value_key: String,
    },
    Wait {
        duration_seconds: f64,
    },
    Screenshot {
        file_path: String,
    },
    Conditional {
        #[serde(flatten)]
        condition: Condition,
        true_branch: Vec<Action>,
        false_branch: Vec<Action>,
    },
    Loop {
        #[serde(flatten)]
        spec: LoopSpec,
        loop_actions: Vec<Action>,
    },
    ErrorHandling {
        try_actions: Vec<Action>,
        catch_actions: Vec<Action>,
    },
    Template {
        template_name: String,
    },
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::Navigate { .. } => "navigate",
            ActionKind::Click { .. } => "click",
            ActionKind::Type { .. } => "type",
            ActionKind::Wait { .. } => "wait",
            ActionKind::Screenshot { .. } => "screenshot",
            ActionKind::Conditional { .. } => "conditional",
            ActionKind::Loop { .. } => "loop",
            ActionKind::ErrorHandling { .. } => "error_handling",
            ActionKind::Template { .. } => "template",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Credential,
}

/// Condition evaluated by `Conditional` and `Loop[while]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum Condition {
    ElementPresent {
        selector: String,
    },
    ElementNotPresent {
        selector: String,
    },
    VariableEquals {
        variable_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected_value: Option<Value>,
    },
    JavascriptEval {
        script: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "loop_type", rename_all = "snake_case")]
pub enum LoopSpec {
    Count {
        count: u64,
    },
    ForEach {
        list_variable_name: String,
    },
    While {
        #[serde(flatten)]
        condition: Condition,
    },
}

/// `true` for a literal URL with an `http`/`https` scheme. Grounded on the
/// teacher's `utils::url::is_https`/`is_valid_url` helpers.
fn is_http_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|parsed| parsed.scheme() == "http" || parsed.scheme() == "https")
        .unwrap_or(false)
}

fn credential_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+\.(username|password)$").expect("valid regex"))
}

/// Identifier rule shared by workflow and template names: non-empty,
/// filesystem-safe.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Constructs and validates [`Action`]s from their JSON map representation.
pub struct ActionFactory;

impl ActionFactory {
    /// Build a single action from a JSON object. Fails with
    /// [`ActionModelError::UnknownType`] for an unrecognized `type`, or a
    /// validation error for a recognized type with missing/malformed
    /// fields.
    pub fn create(data: &Value) -> Result<Action, ActionModelError> {
        let mut path = Vec::new();
        Self::create_at(data, &mut path)
    }

    fn create_at(data: &Value, path: &mut Vec<PathSegment>) -> Result<Action, ActionModelError> {
        let obj = data
            .as_object()
            .ok_or_else(|| ActionModelError::Malformed("action must be a JSON object".to_string()))?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();

        let type_str = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionModelError::Malformed("missing 'type' field".to_string()))?;

        let name_for_errors = || if name.is_empty() { None } else { Some(name.clone()) };

        let kind = match type_str {
            "navigate" => Self::build_navigate(obj, &name_for_errors)?,
            "click" => Self::build_click(obj, &name_for_errors)?,
            "type" => Self::build_type(obj, &name_for_errors)?,
            "wait" => Self::build_wait(obj, &name_for_errors)?,
            "screenshot" => Self::build_screenshot(obj, &name_for_errors)?,
            "conditional" => Self::build_conditional(obj, &name_for_errors, path)?,
            "loop" => Self::build_loop(obj, &name_for_errors, path)?,
            "error_handling" => Self::build_error_handling(obj, path)?,
            "template" => Self::build_template(obj, &name_for_errors)?,
            other => {
                return Err(ActionModelError::UnknownType {
                    action_type: other.to_string(),
                    name: name_for_errors(),
                })
            }
        };

        if name.is_empty() {
            return Err(ActionModelError::Invalid {
                name: None,
                message: "name must not be empty".to_string(),
            });
        }

        Ok(Action { name, kind })
    }

    fn create_list(
        items: &[Value],
        field: &'static str,
        path: &mut Vec<PathSegment>,
    ) -> Result<Vec<Action>, ActionModelError> {
        let mut actions = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            path.push(PathSegment { field, index });
            let result = Self::create_at(item, path);
            path.pop();
            let action = match result {
                Ok(action) => action,
                Err(err @ ActionModelError::NestedInvalid { .. }) => return Err(err),
                Err(err) => {
                    let mut full_path = path.clone();
                    full_path.push(PathSegment { field, index });
                    return Err(ActionModelError::NestedInvalid {
                        path: full_path,
                        message: err.to_string(),
                    });
                }
            };
            actions.push(action);
        }
        Ok(actions)
    }

    fn non_empty_str(
        obj: &Map<String, Value>,
        key: &str,
        name: &dyn Fn() -> Option<String>,
    ) -> Result<String, ActionModelError> {
        let value = obj.get(key).and_then(Value::as_str).unwrap_or("").trim().to_string();
        if value.is_empty() {
            return Err(ActionModelError::Invalid {
                name: name(),
                message: format!("'{key}' must not be empty"),
            });
        }
        Ok(value)
    }

    fn optional_array<'a>(obj: &'a Map<String, Value>, key: &str) -> &'a [Value] {
        static EMPTY: &[Value] = &[];
        obj.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(EMPTY)
    }

    fn build_navigate(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<ActionKind, ActionModelError> {
        let url = Self::non_empty_str(obj, "url", name)?;
        // A `{{var}}` placeholder can stand in for the whole scheme/host, so
        // it can't be validated until the interpreter expands it against a
        // run's context; only a literal URL is checked here.
        if !url.contains("{{") && !is_http_url(&url) {
            return Err(ActionModelError::Invalid {
                name: name(),
                message: format!("'url' must be a valid http(s) URL, got '{url}'"),
            });
        }
        Ok(ActionKind::Navigate { url })
    }

    fn build_click(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<ActionKind, ActionModelError> {
        Ok(ActionKind::Click {
            selector: Self::non_empty_str(obj, "selector", name)?,
        })
    }

    fn build_type(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<ActionKind, ActionModelError> {
        let selector = Self::non_empty_str(obj, "selector", name)?;
        let value_type_str = Self::non_empty_str(obj, "value_type", name)?;
        let value_type = match value_type_str.as_str() {
            "text" => ValueType::Text,
            "credential" => ValueType::Credential,
            other => {
                return Err(ActionModelError::Invalid {
                    name: name(),
                    message: format!("'value_type' must be 'text' or 'credential', got '{other}'"),
                })
            }
        };
        let value_key = Self::non_empty_str(obj, "value_key", name)?;
        if matches!(value_type, ValueType::Credential) && !credential_key_regex().is_match(&value_key) {
            return Err(ActionModelError::Invalid {
                name: name(),
                message: format!("'value_key' must look like 'credName.(username|password)', got '{value_key}'"),
            });
        }
        Ok(ActionKind::Type {
            selector,
            value_type,
            value_key,
        })
    }

    fn build_wait(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<ActionKind, ActionModelError> {
        let duration_seconds = obj
            .get("duration_seconds")
            .and_then(Value::as_f64)
            .ok_or_else(|| ActionModelError::Invalid {
                name: name(),
                message: "'duration_seconds' must be a number".to_string(),
            })?;
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(ActionModelError::Invalid {
                name: name(),
                message: "'duration_seconds' must be a finite number greater than 0".to_string(),
            });
        }
        Ok(ActionKind::Wait { duration_seconds })
    }

    fn build_screenshot(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<ActionKind, ActionModelError> {
        Ok(ActionKind::Screenshot {
            file_path: Self::non_empty_str(obj, "file_path", name)?,
        })
    }

    fn build_condition(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<Condition, ActionModelError> {
        let condition_type = Self::non_empty_str(obj, "condition_type", name)?;
        match condition_type.as_str() {
            "element_present" => Ok(Condition::ElementPresent {
                selector: Self::non_empty_str(obj, "selector", name)?,
            }),
            "element_not_present" => Ok(Condition::ElementNotPresent {
                selector: Self::non_empty_str(obj, "selector", name)?,
            }),
            "variable_equals" => Ok(Condition::VariableEquals {
                variable_name: Self::non_empty_str(obj, "variable_name", name)?,
                expected_value: obj.get("expected_value").cloned(),
            }),
            "javascript_eval" => Ok(Condition::JavascriptEval {
                script: Self::non_empty_str(obj, "script", name)?,
            }),
            other => Err(ActionModelError::Invalid {
                name: name(),
                message: format!("unknown condition_type '{other}'"),
            }),
        }
    }

    fn build_conditional(
        obj: &Map<String, Value>,
        name: &dyn Fn() -> Option<String>,
        path: &mut Vec<PathSegment>,
    ) -> Result<ActionKind, ActionModelError> {
        let condition = Self::build_condition(obj, name)?;
        let true_branch = Self::create_list(Self::optional_array(obj, "true_branch"), "true_branch", path)?;
        let false_branch = Self::create_list(Self::optional_array(obj, "false_branch"), "false_branch", path)?;
        Ok(ActionKind::Conditional {
            condition,
            true_branch,
            false_branch,
        })
    }

    fn build_loop(
        obj: &Map<String, Value>,
        name: &dyn Fn() -> Option<String>,
        path: &mut Vec<PathSegment>,
    ) -> Result<ActionKind, ActionModelError> {
        let loop_type = Self::non_empty_str(obj, "loop_type", name)?;
        let spec = match loop_type.as_str() {
            "count" => {
                let count = obj.get("count").and_then(Value::as_i64).ok_or_else(|| ActionModelError::Invalid {
                    name: name(),
                    message: "'count' must be an integer".to_string(),
                })?;
                if count <= 0 {
                    return Err(ActionModelError::Invalid {
                        name: name(),
                        message: "'count' must be greater than 0".to_string(),
                    });
                }
                LoopSpec::Count { count: count as u64 }
            }
            "for_each" => LoopSpec::ForEach {
                list_variable_name: Self::non_empty_str(obj, "list_variable_name", name)?,
            },
            "while" => LoopSpec::While {
                condition: Self::build_condition(obj, name)?,
            },
            other => {
                return Err(ActionModelError::Invalid {
                    name: name(),
                    message: format!("unknown loop_type '{other}'"),
                })
            }
        };
        let loop_actions = Self::create_list(Self::optional_array(obj, "loop_actions"), "loop_actions", path)?;
        Ok(ActionKind::Loop { spec, loop_actions })
    }

    fn build_error_handling(obj: &Map<String, Value>, path: &mut Vec<PathSegment>) -> Result<ActionKind, ActionModelError> {
        let try_actions = Self::create_list(Self::optional_array(obj, "try_actions"), "try_actions", path)?;
        let catch_actions = Self::create_list(Self::optional_array(obj, "catch_actions"), "catch_actions", path)?;
        Ok(ActionKind::ErrorHandling {
            try_actions,
            catch_actions,
        })
    }

    fn build_template(obj: &Map<String, Value>, name: &dyn Fn() -> Option<String>) -> Result<ActionKind, ActionModelError> {
        Ok(ActionKind::Template {
            template_name: Self::non_empty_str(obj, "template_name", name)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn navigate(name: &str, url: &str) -> Value {
        json!({"type": "navigate", "name": name, "url": url})
    }

    #[test]
    fn creates_simple_navigate() {
        let action = ActionFactory::create(&navigate("go", "https://example.com")).unwrap();
        assert_eq!(action.name, "go");
        assert!(matches!(action.kind, ActionKind::Navigate { .. }));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = ActionFactory::create(&json!({"type": "teleport", "name": "x"})).unwrap_err();
        assert!(matches!(err, ActionModelError::UnknownType { action_type, name } if action_type == "teleport" && name.as_deref() == Some("x")));
    }

    #[test]
    fn rejects_empty_name() {
        let err = ActionFactory::create(&navigate("", "https://example.com")).unwrap_err();
        assert!(matches!(err, ActionModelError::Invalid { name: None, .. }));
    }

    #[test]
    fn rejects_empty_url() {
        let err = ActionFactory::create(&navigate("go", "")).unwrap_err();
        assert!(matches!(err, ActionModelError::Invalid { .. }));
    }

    #[test]
    fn wait_requires_positive_finite_duration() {
        let bad = json!({"type": "wait", "name": "w", "duration_seconds": 0});
        assert!(ActionFactory::create(&bad).is_err());
        let bad_nan = json!({"type": "wait", "name": "w", "duration_seconds": f64::NAN});
        assert!(ActionFactory::create(&bad_nan).is_err());
        let good = json!({"type": "wait", "name": "w", "duration_seconds": 1.5});
        assert!(ActionFactory::create(&good).is_ok());
    }

    #[test]
    fn type_credential_requires_dotted_key() {
        let bad = json!({"type": "type", "name": "t", "selector": "#u", "value_type": "credential", "value_key": "whoops"});
        assert!(ActionFactory::create(&bad).is_err());
        let good = json!({"type": "type", "name": "t", "selector": "#u", "value_type": "credential", "value_key": "login.username"});
        assert!(ActionFactory::create(&good).is_ok());
    }

    #[test]
    fn conditional_validates_nested_branches_with_path() {
        let data = json!({
            "type": "conditional",
            "name": "c",
            "condition_type": "element_present",
            "selector": "#ok",
            "true_branch": [ {"type": "click", "name": "ok-click", "selector": "#ok"} ],
            "false_branch": [ {"type": "navigate", "name": "bad", "url": ""} ],
        });
        let err = ActionFactory::create(&data).unwrap_err();
        match err {
            ActionModelError::NestedInvalid { path, .. } => {
                assert_eq!(path.len(), 1);
                assert_eq!(path[0].field, "false_branch");
                assert_eq!(path[0].index, 0);
            }
            other => panic!("expected NestedInvalid, got {other:?}"),
        }
    }

    #[test]
    fn loop_count_must_be_positive() {
        let bad = json!({"type": "loop", "name": "l", "loop_type": "count", "count": 0, "loop_actions": []});
        assert!(ActionFactory::create(&bad).is_err());
    }

    #[test]
    fn loop_while_reuses_condition_parsing() {
        let data = json!({
            "type": "loop",
            "name": "l",
            "loop_type": "while",
            "condition_type": "variable_equals",
            "variable_name": "done",
            "expected_value": false,
            "loop_actions": [],
        });
        let action = ActionFactory::create(&data).unwrap();
        match action.kind {
            ActionKind::Loop { spec: LoopSpec::While { condition }, .. } => {
                assert!(matches!(condition, Condition::VariableEquals { .. }));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn error_handling_allows_empty_branches() {
        let data = json!({"type": "error_handling", "name": "eh", "try_actions": [], "catch_actions": []});
        assert!(ActionFactory::create(&data).is_ok());
    }

    #[test]
    fn round_trip_serialize_create() {
        let original = ActionFactory::create(&navigate("go", "https://example.com")).unwrap();
        let value = original.to_value();
        let recreated = ActionFactory::create(&value).unwrap();
        assert_eq!(original, recreated);
    }

    #[test]
    fn round_trip_nested_conditional() {
        let data = json!({
            "type": "conditional",
            "name": "c",
            "condition_type": "element_present",
            "selector": "#ok",
            "true_branch": [ {"type": "click", "name": "ok-click", "selector": "#ok"} ],
            "false_branch": [],
        });
        let original = ActionFactory::create(&data).unwrap();
        let recreated = ActionFactory::create(&original.to_value()).unwrap();
        assert_eq!(original, recreated);
    }

    #[test]
    fn identifier_rule_matches_spec() {
        assert!(is_valid_identifier("login_form-1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("has space"));
    }
}
