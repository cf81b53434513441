use std::fmt;
use std::io::Error as IoError;
use std::path::PathBuf;

use thiserror::Error;

/// A single malformed or missing configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{component}: field `{field}`: {message}")]
pub struct FieldError {
    /// Dotted path of the component, e.g. `monitors.root-disk`
    pub component: String,
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(
        component: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self { component: component.into(), field: field.into(), message: message.into() }
    }
}

/// Fatal configuration problems, raised while starting or reloading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read { path: PathBuf, source: IoError },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("Invalid configuration:\n{}", FieldList(.0))]
    Invalid(Vec<FieldError>),

    #[error("No config path given and neither XDG_CONFIG_HOME nor HOME is set")]
    PathUnavailable,
}

impl ConfigError {
    /// Field errors carried by this error, empty for I/O and parse failures.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

impl From<FieldError> for ConfigError {
    fn from(error: FieldError) -> Self {
        Self::Invalid(vec![error])
    }
}

struct FieldList<'a>(&'a [FieldError]);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {error}")?;
        }
        Ok(())
    }
}

/// A channel or sink failed to deliver. The participant is skipped for the
/// rest of the cycle.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote endpoint answered with status {0}")]
    Status(u16),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to frame report: {0}")]
    Frame(#[from] FrameError),

    #[error("Transport queue is full or closed")]
    QueueUnavailable,
}

/// Batch begin/end called out of order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("sink `{0}` started a batch while one was already in progress")]
    BeginWhileBatching(String),

    #[error("sink `{0}` ended a batch when one wasn't in progress")]
    EndWithoutBegin(String),

    #[error("sink `{0}` received a result outside of a batch")]
    DeliverOutsideBatch(String),
}

/// Errors raised by a check. These never leave the monitor: the orchestrator
/// turns them into a failing result.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{0}")]
    Io(#[from] IoError),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Failed(String),
}

/// Pid-file and reload-trigger errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to write pid file {}: {source}", .path.display())]
    PidWrite { path: PathBuf, source: IoError },

    #[error("Failed to remove pid file {}: {source}", .path.display())]
    PidRemove { path: PathBuf, source: IoError },

    #[error("Failed to bind remote listener on {addr}: {source}")]
    Bind { addr: String, source: IoError },
}

/// A remote report frame could not be read or was rejected.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Frame of {0} bytes exceeds the maximum payload size")]
    TooLarge(usize),

    #[error("Frame authentication failed")]
    BadTag,

    #[error("Malformed report: {0}")]
    Malformed(#[from] serde_json::Error),
}
