//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings. Raw transport failures
//! are classified exactly once, in [`classify`].

use std::time::Duration;

/// Coarse classification of a [`SandboxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid configuration.
    Config,
    /// The transport gave up waiting.
    Timeout,
    /// Any other transport failure.
    Transport,
    /// The sandbox is no longer running.
    Gone,
    /// A command ran but exited non-zero.
    Command,
}

/// Errors that can occur during sandbox operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    /// Required credentials or parameters are missing or invalid.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A transport operation exceeded its deadline.
    #[error("{message}")]
    Timeout { message: String },

    /// Sandbox creation, reconnect or process start failed.
    #[error("Sandbox operation failed: {message}")]
    Transport { message: String },

    /// The remote sandbox is not running anymore.
    #[error("Sandbox is not running: {message}")]
    Gone { message: String },

    /// A command exited with a non-zero status.
    #[error("Command `{command}` failed with exit code {}: {stderr}", display_code(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl SandboxError {
    /// Creates a `Config` error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration`.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            message: format!("Operation timed out after {} seconds", duration.as_secs()),
        }
    }

    /// Creates the error surfaced when sandbox creation times out.
    pub fn creation_timed_out() -> Self {
        Self::Timeout {
            message: "Sandbox creation timed out. Try with a smaller repository or fewer dependencies."
                .to_string(),
        }
    }

    /// Creates a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a `Gone` error.
    pub fn gone(message: impl Into<String>) -> Self {
        Self::Gone {
            message: message.into(),
        }
    }

    /// Creates a `Command` error.
    pub fn command(command: impl Into<String>, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Gone { .. } => ErrorKind::Gone,
            Self::Command { .. } => ErrorKind::Command,
        }
    }

    /// Rebuilds an error of the given kind around a message.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Config => Self::Config { message },
            ErrorKind::Timeout => Self::Timeout { message },
            ErrorKind::Transport => Self::Transport { message },
            ErrorKind::Gone => Self::Gone { message },
            ErrorKind::Command => Self::command("", None, message),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the sandbox is no longer running.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }
}

/// Maps a raw transport failure into a [`SandboxError`].
///
/// `status` is the HTTP-like status code reported by the transport, when
/// there is one.
pub fn classify(status: Option<u16>, message: &str) -> SandboxError {
    let lower = message.to_lowercase();

    if matches!(status, Some(404 | 409 | 410))
        || lower.contains("is not running")
        || lower.contains("no such container")
    {
        return SandboxError::gone(message);
    }

    if matches!(status, Some(408 | 504))
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("etimedout")
    {
        return SandboxError::Timeout {
            message: message.to_string(),
        };
    }

    SandboxError::transport(message)
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => classify(Some(status_code), &message),
            bollard::errors::Error::RequestTimeoutError => {
                classify(Some(408), "Docker request timed out")
            }
            other => classify(None, &other.to_string()),
        }
    }
}
