//! Adapts a real `thirtyfour::WebDriver` session to [`BrowserDriver`].
//! Feature-gated behind `webdriver`; requires an already-running
//! chromedriver/geckodriver reachable at `webdriver_url`.

use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::{By, ChromeCapabilities, DesiredCapabilities, WebDriver};
use tokio::time::timeout;

use crate::config::BrowserKind;
use crate::driver::{BrowserDriver, DriverKind, FrameRef};
use crate::error::DriverError;

pub struct ThirtyfourDriver {
    driver: WebDriver,
    kind: DriverKind,
}

impl ThirtyfourDriver {
    /// Connect to a WebDriver server. `kind` selects the capabilities
    /// payload; `connect_timeout` bounds the initial handshake.
    pub async fn connect(webdriver_url: &str, kind: BrowserKind, connect_timeout: Duration) -> Result<Self, DriverError> {
        let driver = match kind {
            BrowserKind::Chrome => {
                let caps = ChromeCapabilities::new();
                timeout(connect_timeout, WebDriver::new(webdriver_url, caps))
                    .await
                    .map_err(|_| DriverError::Io("timed out connecting to webdriver".to_string()))?
                    .map_err(|e| DriverError::Io(e.to_string()))?
            }
            BrowserKind::Firefox => {
                let caps = DesiredCapabilities::firefox();
                timeout(connect_timeout, WebDriver::new(webdriver_url, caps))
                    .await
                    .map_err(|_| DriverError::Io("timed out connecting to webdriver".to_string()))?
                    .map_err(|e| DriverError::Io(e.to_string()))?
            }
            BrowserKind::Edge | BrowserKind::Safari => {
                return Err(DriverError::UnsupportedBrowser(format!("{kind:?}")));
            }
        };
        let driver_kind = match kind {
            BrowserKind::Chrome => DriverKind::Chrome,
            BrowserKind::Firefox => DriverKind::Firefox,
            BrowserKind::Edge => DriverKind::Edge,
            BrowserKind::Safari => DriverKind::Safari,
        };
        Ok(Self { driver, kind: driver_kind })
    }
}

#[async_trait]
impl BrowserDriver for ThirtyfourDriver {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.driver
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .driver
            .find(By::Css(selector))
            .await
            .map_err(|_| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element.click().await.map_err(|e| DriverError::ScriptError(e.to_string()))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self
            .driver
            .find(By::Css(selector))
            .await
            .map_err(|_| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element.clear().await.map_err(|e| DriverError::ScriptError(e.to_string()))?;
        element
            .send_keys(text)
            .await
            .map_err(|e| DriverError::ScriptError(e.to_string()))
    }

    async fn is_present(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.driver.find(By::Css(selector)).await.is_ok())
    }

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        let result = self
            .driver
            .execute(script, vec![])
            .await
            .map_err(|e| DriverError::ScriptError(e.to_string()))?;
        Ok(result.json().clone())
    }

    async fn screenshot(&self, file_path: &str) -> Result<(), DriverError> {
        self.driver
            .screenshot(std::path::Path::new(file_path))
            .await
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.driver
            .current_url()
            .await
            .map(|u| u.to_string())
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    /// Polls `is_present` at a fixed interval until `wait` elapses, since
    /// failure to find an element mid-poll (the page hasn't rendered it yet)
    /// isn't itself an error worth surfacing — only running out of time is.
    async fn wait_for_element(&self, selector: &str, wait: Duration) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.driver.find(By::Css(selector)).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    selector: selector.to_string(),
                    timeout_ms: wait.as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn switch_to_frame(&self, frame: &FrameRef) -> Result<(), DriverError> {
        match frame {
            FrameRef::Index(index) => self
                .driver
                .switch_to()
                .frame_number(*index)
                .await
                .map_err(|e| DriverError::Io(e.to_string())),
            FrameRef::Selector(selector) => {
                let element = self
                    .driver
                    .find(By::Css(selector))
                    .await
                    .map_err(|_| DriverError::ElementNotFound {
                        selector: selector.to_string(),
                    })?;
                self.driver
                    .switch_to()
                    .frame_element(&element)
                    .await
                    .map_err(|e| DriverError::Io(e.to_string()))
            }
        }
    }

    async fn switch_to_default_content(&self) -> Result<(), DriverError> {
        self.driver
            .switch_to()
            .default_content()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))
    }

    async fn accept_alert(&self) -> Result<(), DriverError> {
        self.driver
            .switch_to()
            .alert()
            .accept()
            .await
            .map_err(|_| DriverError::NoAlertPresent)
    }

    async fn dismiss_alert(&self) -> Result<(), DriverError> {
        self.driver
            .switch_to()
            .alert()
            .dismiss()
            .await
            .map_err(|_| DriverError::NoAlertPresent)
    }

    async fn alert_text(&self) -> Result<String, DriverError> {
        self.driver.switch_to().alert().text().await.map_err(|_| DriverError::NoAlertPresent)
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        self.driver.clone().quit().await.map_err(|e| DriverError::Io(e.to_string()))
    }
}
