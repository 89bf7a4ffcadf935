//! Browser control surface. [`BrowserDriver`] is the seam the interpreter
//! executes leaf actions against; [`mock::MockDriver`] backs tests and the
//! `core` feature, [`thirtyfour_driver::ThirtyfourDriver`] drives a real
//! browser behind the `webdriver` feature.

pub mod mock;

#[cfg(feature = "webdriver")]
pub mod thirtyfour_driver;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DriverError;

/// A frame to switch into: either a 0-based index (the order frames appear
/// in the current document) or a CSS selector identifying the `<iframe>`
/// element itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameRef {
    Index(u16),
    Selector(String),
}

pub use mock::MockDriver;
#[cfg(feature = "webdriver")]
pub use thirtyfour_driver::ThirtyfourDriver;

/// Which concrete browser backend to launch. Mirrors the
/// `[WebDriver] browser` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Mock,
    Chrome,
    Firefox,
    Edge,
    Safari,
}

impl FromStr for DriverKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mock" => Ok(DriverKind::Mock),
            "chrome" => Ok(DriverKind::Chrome),
            "firefox" => Ok(DriverKind::Firefox),
            "edge" => Ok(DriverKind::Edge),
            "safari" => Ok(DriverKind::Safari),
            other => Err(DriverError::UnsupportedBrowser(other.to_string())),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverKind::Mock => "mock",
            DriverKind::Chrome => "chrome",
            DriverKind::Firefox => "firefox",
            DriverKind::Edge => "edge",
            DriverKind::Safari => "safari",
        };
        write!(f, "{s}")
    }
}

/// The set of primitive browser operations a leaf action needs. One
/// instance is held for the lifetime of a single workflow run and released
/// back to its pool (or torn down) when the run ends.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Stable identifier for the concrete backend behind this driver, e.g.
    /// `chrome`/`firefox`/`mock`.
    fn kind(&self) -> DriverKind;

    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    /// True if at least one element matches `selector` right now. Used by
    /// `element_present`/`element_not_present` conditions; never errors on
    /// "not found" — that's the `false` case, not a failure.
    async fn is_present(&self, selector: &str) -> Result<bool, DriverError>;

    async fn execute_script(&self, script: &str) -> Result<Value, DriverError>;

    /// Capture a screenshot, writing it to `file_path` (relative paths are
    /// resolved against the run's working directory).
    async fn screenshot(&self, file_path: &str) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Poll for `selector` to appear, up to `timeout`. Unlike `is_present`
    /// (one check, no wait), this is what a workflow author reaches for when
    /// a page needs time to render an element.
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Switch the driver's focus into a child frame.
    async fn switch_to_frame(&self, frame: &FrameRef) -> Result<(), DriverError>;

    /// Switch focus back to the top-level document.
    async fn switch_to_default_content(&self) -> Result<(), DriverError>;

    /// Accept (click "OK" on) the currently open JS alert/confirm/prompt.
    /// Fails with `DriverError::NoAlertPresent` if none is open.
    async fn accept_alert(&self) -> Result<(), DriverError>;

    /// Dismiss (click "Cancel" on) the currently open JS alert/confirm/prompt.
    async fn dismiss_alert(&self) -> Result<(), DriverError>;

    /// Read the text of the currently open JS alert/confirm/prompt.
    async fn alert_text(&self) -> Result<String, DriverError>;

    /// Release whatever session/process resources this driver owns. Called
    /// exactly once, whether the run succeeded, failed, or was cancelled.
    async fn shutdown(&self) -> Result<(), DriverError>;
}

/// Acquires a [`BrowserDriver`] for a given [`DriverKind`]. `WorkflowService`
/// depends on this rather than constructing drivers itself, generalizing the
/// teacher's `EngineFactory`/`DefaultEngineFactory` split (abstract creation
/// trait plus one concrete default) from "six engines" to "one browser
/// driver per run".
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn acquire(&self, kind: DriverKind) -> Result<Arc<dyn BrowserDriver>, DriverError>;
}

/// Always hands back a fresh [`MockDriver`], regardless of the requested
/// kind. Used by the `core` feature and by tests that don't link a real
/// WebDriver session.
#[derive(Debug, Default)]
pub struct MockDriverFactory;

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn acquire(&self, _kind: DriverKind) -> Result<Arc<dyn BrowserDriver>, DriverError> {
        Ok(Arc::new(MockDriver::new()))
    }
}

/// Connects to a real WebDriver server (chromedriver/geckodriver) per run.
/// Feature-gated behind `webdriver`, since it pulls in `thirtyfour`.
#[cfg(feature = "webdriver")]
pub struct ThirtyfourDriverFactory {
    pub webdriver_url: String,
    pub connect_timeout: std::time::Duration,
}

#[cfg(feature = "webdriver")]
#[async_trait]
impl DriverFactory for ThirtyfourDriverFactory {
    async fn acquire(&self, kind: DriverKind) -> Result<Arc<dyn BrowserDriver>, DriverError> {
        let browser = match kind {
            DriverKind::Mock => return Ok(Arc::new(MockDriver::new())),
            DriverKind::Chrome => crate::config::BrowserKind::Chrome,
            DriverKind::Firefox => crate::config::BrowserKind::Firefox,
            DriverKind::Edge => crate::config::BrowserKind::Edge,
            DriverKind::Safari => crate::config::BrowserKind::Safari,
        };
        let driver = ThirtyfourDriver::connect(&self.webdriver_url, browser, self.connect_timeout).await?;
        Ok(Arc::new(driver))
    }
}
