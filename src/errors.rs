use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the invoker and collector.
///
/// `Display` stays terse (classification + command). Captured streams live in
/// the variant fields and are only logged at `debug`.
#[derive(Error, Debug)]
pub enum StarError {
    #[error("Toolkit configuration error: {0}")]
    Configuration(String),

    #[error("Command '{command}' failed")]
    Invocation {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command '{command}' exited cleanly but wrote no fresh output")]
    SilentFailure {
        command: String,
        stdout: String,
        stderr: String,
    },

    #[error("No output for '{command}' at {}", path.display())]
    MissingOutput { command: String, path: PathBuf },

    #[error("Malformed output for '{command}': {reason}")]
    MalformedOutput { command: String, reason: String },

    #[error("Command '{command}' timed out after {}s", timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    #[error("Command {} does not exist; perhaps it is mistyped?", program.display())]
    CommandNotFound { program: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StarError>;

impl StarError {
    pub(crate) fn malformed(command: &str, reason: impl Into<String>) -> Self {
        StarError::MalformedOutput {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable short name of the failure class.
    pub fn classification(&self) -> &'static str {
        match self {
            StarError::Configuration(_) => "configuration",
            StarError::Invocation { .. } => "invocation",
            StarError::SilentFailure { .. } => "silent-failure",
            StarError::MissingOutput { .. } => "missing-output",
            StarError::MalformedOutput { .. } => "malformed-output",
            StarError::Timeout { .. } => "timeout",
            StarError::CommandNotFound { .. } => "command-not-found",
            StarError::Io(_) => "io",
        }
    }

    /// True for the two ways a launched command can fail.
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            StarError::Invocation { .. } | StarError::SilentFailure { .. }
        )
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StarError::Invocation { code, .. } => Some(*code),
            StarError::SilentFailure { .. } => Some(0),
            _ => None,
        }
    }

    /// `(stdout, stderr)` captured from the failed command, if any.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            StarError::Invocation { stdout, stderr, .. }
            | StarError::SilentFailure { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }
}
