use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::cancel::CancelReason;
use crate::version::VersionRequirement;

/// What went wrong while running a subprocess.
#[derive(Debug)]
pub enum ExecFailure {
    /// The command ran and exited unsuccessfully.
    Exit(ExitStatus),
    /// The command could not be started or waited on.
    Io(io::Error),
    Cancelled(CancelReason),
}

impl fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecFailure::Exit(status) => match status.code() {
                Some(code) => write!(f, "exit status {code}"),
                None => write!(f, "{status}"),
            },
            ExecFailure::Io(err) => write!(f, "{err}"),
            ExecFailure::Cancelled(reason) => write!(f, "{reason}"),
        }
    }
}

/// A failed subprocess call.
///
/// Carries both the captured output and the full diagnostic context. When the
/// command simply exited non-zero and verbose mode is off, `Display` renders
/// only the captured output; every other case renders [`ExecError::detail`].
#[derive(Debug)]
pub struct ExecError {
    command_line: String,
    output: String,
    failure: ExecFailure,
    verbose: bool,
}

impl ExecError {
    pub(crate) fn new(
        command_line: String,
        output: String,
        failure: ExecFailure,
        verbose: bool,
    ) -> Self {
        Self {
            command_line,
            output,
            failure,
            verbose,
        }
    }

    /// Program and arguments joined with spaces.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Combined stdout and stderr captured before the failure.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn failure(&self) -> &ExecFailure {
        &self.failure
    }

    pub fn exit_code(&self) -> Option<i32> {
        match &self.failure {
            ExecFailure::Exit(status) => status.code(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.failure, ExecFailure::Cancelled(_))
    }

    pub fn detail(&self) -> String {
        format!(
            "error while running command '{}'; out: {}; err: {}",
            self.command_line, self.output, self.failure
        )
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure {
            ExecFailure::Exit(_) if !self.verbose => f.write_str(&self.output),
            _ => f.write_str(&self.detail()),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.failure {
            ExecFailure::Io(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("exec go to detect the version")]
    VersionProbe(#[source] ExecError),
    #[error("found unsupported go version: {found}. Requires {required}")]
    UnsupportedVersion {
        found: String,
        required: VersionRequirement,
    },
    #[error("create moddir {}", path.display())]
    CreateModDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stat module file {}", path.display())]
    StatModFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("resolve current module")]
    CurrentModule(#[source] ExecError),
    #[error("init module {module}")]
    InitModule {
        module: String,
        #[source]
        source: ExecError,
    },
}
