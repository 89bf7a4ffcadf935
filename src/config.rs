//! Typed settings loaded from an INI-like file, with environment overrides.
//!
//! The engine itself never parses config files directly (that plumbing is
//! out of scope per the specification); this module only defines the typed
//! `Settings` tree and the narrow `rust-ini`-backed loader that fills it in,
//! mirroring how the teacher keeps `BrowserConfig`/`LLMConfig`/`SessionSettings`
//! as plain typed structs with a `Default` impl.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level settings tree, one field per `[Section]` in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub general: GeneralSettings,
    pub repository: RepositorySettings,
    pub webdriver: WebDriverSettings,
    pub security: SecuritySettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(ConfigError::InvalidValue {
                section: "General".into(),
                key: "log_level".into(),
                message: format!("unknown log level '{other}'"),
            }),
        }
    }
}

impl LogLevel {
    /// Render as the `tracing_subscriber::EnvFilter` directive the caller
    /// installs at startup.
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryBackend {
    FileSystem,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    pub backend: RepositoryBackend,
    pub workflows_path: PathBuf,
    pub templates_path: PathBuf,
    pub credentials_path: PathBuf,
    pub execution_logs_path: PathBuf,
    pub db_path: PathBuf,
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Edge,
    Safari,
}

impl std::str::FromStr for BrowserKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" => Ok(BrowserKind::Chrome),
            "firefox" => Ok(BrowserKind::Firefox),
            "edge" => Ok(BrowserKind::Edge),
            "safari" => Ok(BrowserKind::Safari),
            other => Err(ConfigError::InvalidValue {
                section: "WebDriver".into(),
                key: "default_browser".into(),
                message: format!("unknown browser '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Edge => "edge",
            BrowserKind::Safari => "safari",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverSettings {
    pub default_browser: BrowserKind,
    pub driver_paths: HashMap<BrowserKind, PathBuf>,
    pub implicit_wait_secs: u64,
    /// WebDriver server endpoint, e.g. `http://localhost:9515` for
    /// chromedriver. Only consulted by the `webdriver` feature.
    pub url: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PasswordHashMethod {
    Argon2,
    /// `pbkdf2:<digest>:<iterations>`, e.g. `pbkdf2:sha256:600000`.
    Pbkdf2 { digest: String, iterations: u32 },
}

impl std::str::FromStr for PasswordHashMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("argon2") {
            return Ok(PasswordHashMethod::Argon2);
        }
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(digest), Some(iterations)) if scheme.eq_ignore_ascii_case("pbkdf2") => {
                let iterations = iterations.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    section: "Security".into(),
                    key: "password_hash_method".into(),
                    message: format!("invalid iteration count in '{s}'"),
                })?;
                Ok(PasswordHashMethod::Pbkdf2 {
                    digest: digest.to_string(),
                    iterations,
                })
            }
            _ => Err(ConfigError::InvalidValue {
                section: "Security".into(),
                key: "password_hash_method".into(),
                message: format!("unrecognized hash method '{s}'; expected 'argon2' or 'pbkdf2:<digest>:<iterations>'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub password_hash_method: PasswordHashMethod,
    pub password_salt_length: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub worker_pool_size: usize,
    pub max_while_iterations: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: LogLevel::Info,
                log_file: None,
            },
            repository: RepositorySettings {
                backend: RepositoryBackend::FileSystem,
                workflows_path: PathBuf::from("./data/workflows"),
                templates_path: PathBuf::from("./data/templates"),
                credentials_path: PathBuf::from("./data/credentials.json"),
                execution_logs_path: PathBuf::from("./data/execution_logs"),
                db_path: PathBuf::from("./data/engine.db"),
                create_if_missing: true,
            },
            webdriver: WebDriverSettings {
                default_browser: BrowserKind::Chrome,
                driver_paths: HashMap::new(),
                implicit_wait_secs: 10,
                url: "http://localhost:9515".to_string(),
                connect_timeout_secs: 30,
            },
            security: SecuritySettings {
                password_hash_method: PasswordHashMethod::Argon2,
                password_salt_length: 16,
            },
            scheduler: SchedulerSettings {
                worker_pool_size: 5,
                max_while_iterations: 1000,
            },
        }
    }
}

impl Settings {
    /// Load settings from an INI file, falling back to [`Settings::default`]
    /// for any key the file omits, then applying `WFE_`-prefixed environment
    /// variable overrides (e.g. `WFE_GENERAL_LOG_LEVEL=debug`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut settings = Self::from_ini_str(&text)?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = ini::Ini::load_from_str(text).map_err(|e| ConfigError::Io {
            path: "<string>".into(),
            message: e.to_string(),
        })?;
        let mut settings = Settings::default();

        if let Some(section) = ini.section(Some("General")) {
            if let Some(v) = section.get("log_level") {
                settings.general.log_level = v.parse()?;
            }
            if let Some(v) = section.get("log_file") {
                settings.general.log_file = Some(PathBuf::from(v));
            }
        }

        if let Some(section) = ini.section(Some("Repository")) {
            if let Some(v) = section.get("type") {
                settings.repository.backend = match v {
                    "file_system" => RepositoryBackend::FileSystem,
                    "database" => RepositoryBackend::Database,
                    other => {
                        return Err(ConfigError::InvalidValue {
                            section: "Repository".into(),
                            key: "type".into(),
                            message: format!("unknown repository type '{other}'"),
                        })
                    }
                };
            }
            if let Some(v) = section.get("workflows_path") {
                settings.repository.workflows_path = PathBuf::from(v);
            }
            if let Some(v) = section.get("templates_path") {
                settings.repository.templates_path = PathBuf::from(v);
            }
            if let Some(v) = section.get("credentials_path") {
                settings.repository.credentials_path = PathBuf::from(v);
            }
            if let Some(v) = section.get("execution_logs_path") {
                settings.repository.execution_logs_path = PathBuf::from(v);
            }
            if let Some(v) = section.get("db_path") {
                settings.repository.db_path = PathBuf::from(v);
            }
            if let Some(v) = section.get("create_if_missing") {
                settings.repository.create_if_missing = parse_bool("Repository", "create_if_missing", v)?;
            }
        }

        if let Some(section) = ini.section(Some("WebDriver")) {
            if let Some(v) = section.get("default_browser") {
                settings.webdriver.default_browser = v.parse()?;
            }
            if let Some(v) = section.get("implicit_wait") {
                settings.webdriver.implicit_wait_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                    section: "WebDriver".into(),
                    key: "implicit_wait".into(),
                    message: format!("not a non-negative integer: '{v}'"),
                })?;
            }
            if let Some(v) = section.get("url") {
                settings.webdriver.url = v.to_string();
            }
            if let Some(v) = section.get("connect_timeout") {
                settings.webdriver.connect_timeout_secs = v.parse().map_err(|_| ConfigError::InvalidValue {
                    section: "WebDriver".into(),
                    key: "connect_timeout".into(),
                    message: format!("not a non-negative integer: '{v}'"),
                })?;
            }
            for kind in [BrowserKind::Chrome, BrowserKind::Firefox, BrowserKind::Edge, BrowserKind::Safari] {
                let key = format!("{kind:?}_driver_path").to_lowercase();
                if let Some(v) = section.get(key.as_str()) {
                    settings.webdriver.driver_paths.insert(kind, PathBuf::from(v));
                }
            }
        }

        if let Some(section) = ini.section(Some("Security")) {
            if let Some(v) = section.get("password_hash_method") {
                settings.security.password_hash_method = v.parse()?;
            }
            if let Some(v) = section.get("password_salt_length") {
                settings.security.password_salt_length = v.parse().map_err(|_| ConfigError::InvalidValue {
                    section: "Security".into(),
                    key: "password_salt_length".into(),
                    message: format!("not an integer: '{v}'"),
                })?;
            }
        }

        if let Some(section) = ini.section(Some("Scheduler")) {
            if let Some(v) = section.get("worker_pool_size") {
                settings.scheduler.worker_pool_size = v.parse().map_err(|_| ConfigError::InvalidValue {
                    section: "Scheduler".into(),
                    key: "worker_pool_size".into(),
                    message: format!("not a positive integer: '{v}'"),
                })?;
            }
            if let Some(v) = section.get("max_while_iterations") {
                settings.scheduler.max_while_iterations = v.parse().map_err(|_| ConfigError::InvalidValue {
                    section: "Scheduler".into(),
                    key: "max_while_iterations".into(),
                    message: format!("not a positive integer: '{v}'"),
                })?;
            }
        }

        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WFE_GENERAL_LOG_LEVEL") {
            if let Ok(level) = v.parse() {
                self.general.log_level = level;
            }
        }
        if let Ok(v) = std::env::var("WFE_REPOSITORY_DB_PATH") {
            self.repository.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WFE_SCHEDULER_WORKER_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                self.scheduler.worker_pool_size = n;
            }
        }
    }

    /// Reject configurations that would silently weaken credential storage.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.security.password_salt_length < 8 {
            return Err(ConfigError::InvalidValue {
                section: "Security".into(),
                key: "password_salt_length".into(),
                message: "salt length must be at least 8".into(),
            });
        }
        if self.scheduler.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                section: "Scheduler".into(),
                key: "worker_pool_size".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

fn parse_bool(section: &str, key: &str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            section: section.into(),
            key: key.into(),
            message: format!("not a boolean: '{other}'"),
        }),
    }
}
