pub mod cancel;
pub mod cli;
pub mod error;
pub mod exec;
pub mod logging;
pub mod runner;
pub mod version;

pub use cancel::{CancelReason, CancelToken};
pub use exec::Program;
pub use error::{ExecError, ExecFailure, RunnerError};
pub use runner::{GetUpdatePolicy, MANIFEST_FILE, Runner, RunnerConfig, detect_version};
pub use version::{GoVersion, VersionRequirement};

/// Run the command line interface and return an exit code.
pub fn run_cli() -> i32 {
    cli::run()
}
