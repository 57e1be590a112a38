//! Boundary to the statement engine that performs the actual file load.
//!
//! The engine is opaque: it receives a [`LoadStatement`] and answers with a
//! [`LoadStatus`] or a [`LoadError`]. [`LoadOutcome::classify`] folds both into
//! a closed set so the worker loop never inspects raw codes or messages.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Options for loading one data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadRequest {
    pub path: PathBuf,
    /// Remove the source file once its data is written.
    pub delete_after_load: bool,
    /// Check the file's schema against the existing one before writing.
    pub verify_schema: bool,
    /// Create a missing database on the fly.
    pub auto_create_database: bool,
}

impl LoadRequest {
    /// Request with the settings used by active loading.
    pub fn for_active_load(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delete_after_load: true,
            verify_schema: true,
            auto_create_database: false,
        }
    }
}

/// What gets submitted to the engine. Files produced by an external
/// replication source are wrapped so downstream systems can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadStatement {
    Local(LoadRequest),
    ExternallyGenerated(LoadRequest),
}

impl LoadStatement {
    pub fn new(request: LoadRequest, generated_by_external_source: bool) -> Self {
        if generated_by_external_source {
            Self::ExternallyGenerated(request)
        } else {
            Self::Local(request)
        }
    }

    pub fn request(&self) -> &LoadRequest {
        match self {
            Self::Local(r) | Self::ExternallyGenerated(r) => r,
        }
    }

    pub fn path(&self) -> &Path {
        &self.request().path
    }

    pub fn is_externally_generated(&self) -> bool {
        matches!(self, Self::ExternallyGenerated(_))
    }
}

/// Status returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadStatus {
    pub code: i32,
    pub message: Option<String>,
}

impl LoadStatus {
    pub const SUCCESS: i32 = 200;
    pub const REDIRECTION_RECOMMEND: i32 = 400;

    pub fn success() -> Self {
        Self { code: Self::SUCCESS, message: None }
    }

    pub fn redirect() -> Self {
        Self { code: Self::REDIRECTION_RECOMMEND, message: None }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: Some(message.into()) }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "code={} message={}", self.code, msg),
            None => write!(f, "code={}", self.code),
        }
    }
}

/// Errors raised by the engine instead of a status.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

/// The statement engine that writes a file's data into storage.
///
/// `execute` blocks until the load finishes.
pub trait LoadExecutor: Send + Sync {
    fn execute(&self, statement: &LoadStatement) -> Result<LoadStatus, LoadError>;
}

impl<F> LoadExecutor for F
where
    F: Fn(&LoadStatement) -> Result<LoadStatus, LoadError> + Send + Sync,
{
    fn execute(&self, statement: &LoadStatement) -> Result<LoadStatus, LoadError> {
        self(statement)
    }
}

/// Closed classification of a single load attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Success,
    Redirect,
    ExplicitFailure(LoadStatus),
    NotFound,
    /// Resource pressure; the file stays where it is.
    Transient(String),
    UnexpectedFailure(String),
}

impl LoadOutcome {
    pub fn classify(result: Result<LoadStatus, LoadError>) -> Self {
        match result {
            Ok(status) if status.code == LoadStatus::SUCCESS => Self::Success,
            Ok(status) if status.code == LoadStatus::REDIRECTION_RECOMMEND => Self::Redirect,
            Ok(status) => Self::ExplicitFailure(status),
            Err(LoadError::FileNotFound(_)) => Self::NotFound,
            Err(LoadError::ResourceExhausted(msg)) => Self::Transient(msg),
            // Engines that only report a message signal memory pressure in its text.
            Err(LoadError::Execution(msg)) if msg.contains("memory") => Self::Transient(msg),
            Err(LoadError::Execution(msg)) => Self::UnexpectedFailure(msg),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Redirect)
    }

    /// Whether the file (and its sidecars) should go to the fail directory.
    pub fn should_quarantine(&self) -> bool {
        matches!(
            self,
            Self::ExplicitFailure(_) | Self::NotFound | Self::UnexpectedFailure(_)
        )
    }
}
