//! In-memory driver used by the `core` feature and by interpreter tests.
//! Tracks enough state (current URL, a fixed set of known selectors, a call
//! log) to exercise every action kind without a real browser.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::driver::{BrowserDriver, DriverKind, FrameRef};
use crate::error::DriverError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Navigate(String),
    Click(String),
    Type(String, String),
    Screenshot(String),
    Script(String),
}

struct MockState {
    current_url: String,
    known_selectors: HashSet<String>,
    typed_values: std::collections::HashMap<String, String>,
    calls: Vec<RecordedCall>,
    shut_down: bool,
    current_frame: Option<FrameRef>,
    pending_alert: Option<String>,
}

/// A driver backed entirely by in-process state. `known_selectors` decides
/// which selectors `click`/`type_text`/`is_present` consider present;
/// anything else yields `DriverError::ElementNotFound`.
pub struct MockDriver {
    state: RwLock<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState {
                current_url: String::new(),
                known_selectors: HashSet::new(),
                typed_values: std::collections::HashMap::new(),
                calls: Vec::new(),
                shut_down: false,
                current_frame: None,
                pending_alert: None,
            }),
        }
    }

    /// Register a selector as present, e.g. `"#submit"`. Without
    /// registration, `click`/`type_text` fail with `ElementNotFound` and
    /// `is_present` returns `false`.
    pub async fn register_selector(&self, selector: impl Into<String>) {
        self.state.write().await.known_selectors.insert(selector.into());
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.read().await.calls.clone()
    }

    pub async fn typed_value(&self, selector: &str) -> Option<String> {
        self.state.read().await.typed_values.get(selector).cloned()
    }

    pub async fn is_shut_down(&self) -> bool {
        self.state.read().await.shut_down
    }

    /// Simulate a JS `alert()`/`confirm()`/`prompt()` having just opened.
    pub async fn queue_alert(&self, text: impl Into<String>) {
        self.state.write().await.pending_alert = Some(text.into());
    }

    pub async fn current_frame(&self) -> Option<FrameRef> {
        self.state.read().await.current_frame.clone()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Mock
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.current_url = url.to_string();
        state.calls.push(RecordedCall::Navigate(url.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        if !state.known_selectors.contains(selector) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        state.calls.push(RecordedCall::Click(selector.to_string()));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        if !state.known_selectors.contains(selector) {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        state.typed_values.insert(selector.to_string(), text.to_string());
        state.calls.push(RecordedCall::Type(selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn is_present(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.state.read().await.known_selectors.contains(selector))
    }

    async fn execute_script(&self, script: &str) -> Result<Value, DriverError> {
        let mut state = self.state.write().await;
        state.calls.push(RecordedCall::Script(script.to_string()));
        Ok(json!({ "executed": true, "script_len": script.len() }))
    }

    async fn screenshot(&self, file_path: &str) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.calls.push(RecordedCall::Screenshot(file_path.to_string()));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.state.read().await.current_url.clone())
    }

    /// The mock has no real render delay, so this resolves immediately once
    /// the selector is registered and times out immediately otherwise —
    /// there is nothing to poll for.
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        if self.state.read().await.known_selectors.contains(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn switch_to_frame(&self, frame: &FrameRef) -> Result<(), DriverError> {
        self.state.write().await.current_frame = Some(frame.clone());
        Ok(())
    }

    async fn switch_to_default_content(&self) -> Result<(), DriverError> {
        self.state.write().await.current_frame = None;
        Ok(())
    }

    async fn accept_alert(&self) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.pending_alert.take().map(|_| ()).ok_or(DriverError::NoAlertPresent)
    }

    async fn dismiss_alert(&self) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.pending_alert.take().map(|_| ()).ok_or(DriverError::NoAlertPresent)
    }

    async fn alert_text(&self) -> Result<String, DriverError> {
        self.state.read().await.pending_alert.clone().ok_or(DriverError::NoAlertPresent)
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        self.state.write().await.shut_down = true;
        Ok(())
    }
}
