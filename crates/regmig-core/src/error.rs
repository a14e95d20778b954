//! Error types for regmig

use std::fmt;
use thiserror::Error;

/// Main error type for regmig
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found in {0}")]
    ConfigNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Adapter not found for registry type: {0}")]
    AdapterNotFound(String),

    #[error("Adapter already registered for registry type: {0}")]
    DuplicateAdapter(String),

    #[error("Authentication failed for {endpoint}: {message}")]
    Auth { endpoint: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Transfer of {uri} failed: {message}")]
    Transfer { uri: String, message: String },

    #[error("Registry {registry}: {message}")]
    Adapter { registry: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Jobs(JobErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MigrateError {
    pub fn adapter(registry: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Adapter {
            registry: registry.into(),
            message: message.into(),
        }
    }

    pub fn transfer(uri: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// True when this error, or every failure joined inside it, is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            MigrateError::Cancelled => true,
            MigrateError::Jobs(jobs) => {
                !jobs.failures.is_empty() && jobs.failures.iter().all(|f| f.error.is_cancelled())
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MigrateError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;

/// Lifecycle step in which a job failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStep {
    Pre,
    Migrate,
    Post,
    /// The job's task panicked or was aborted before finishing
    Task,
}

impl JobStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::Pre => "pre",
            JobStep::Migrate => "migrate",
            JobStep::Post => "post",
            JobStep::Task => "task",
        }
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed job inside an engine run
#[derive(Debug)]
pub struct JobFailure {
    pub index: usize,
    pub info: String,
    pub step: JobStep,
    pub error: MigrateError,
}

/// Every failure collected by one engine run
#[derive(Debug, Default)]
pub struct JobErrors {
    pub failures: Vec<JobFailure>,
}

impl JobErrors {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for JobErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "job[{}] {} ({}): ",
                failure.index, failure.info, failure.step
            )?;
            // Nested joined errors are indented under their parent job
            let nested = failure.error.to_string();
            let mut lines = nested.lines();
            if let Some(first) = lines.next() {
                write!(f, "{}", first)?;
            }
            for line in lines {
                write!(f, "\n  {}", line)?;
            }
        }
        Ok(())
    }
}
