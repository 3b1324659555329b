use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::cancel::CancelToken;
use crate::logging::init_tracing;
use crate::exec::Program;
use crate::runner::{GetUpdatePolicy, Runner, RunnerConfig, detect_version};
use crate::version::VersionRequirement;

#[derive(Debug, Parser)]
#[command(
    name = "gomodcmd",
    version,
    about = "Run module-aware go commands against a dedicated go.mod"
)]
pub struct Cli {
    /// Go binary to invoke
    #[arg(long, global = true, default_value = "go")]
    go: String,
    /// Directory holding the dedicated go.mod
    #[arg(long, global = true, default_value = ".gomodcmd")]
    mod_dir: PathBuf,
    /// Pass -insecure to go get
    #[arg(long, global = true)]
    insecure: bool,
    /// Include the full command line in errors and enable debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Abort the go invocation after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,
    /// Require exactly go1.14.x instead of go1.14 or newer
    #[arg(long, global = true)]
    exact_version: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download packages into the module without building them (go get -d)
    Get {
        /// Update policy: none, all or patch
        #[arg(long, default_value = "none")]
        update: GetUpdatePolicy,
        /// Package specifiers such as example.com/tool@v1.2.3
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Build and install packages (go install)
    Install {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Prune unused requirements (go mod tidy)
    Tidy,
    /// Detect the go version and print it as JSON
    Version {
        /// Emit compact JSON instead of pretty output
        #[arg(long)]
        raw: bool,
    },
}

impl Cli {
    fn requirement(&self) -> VersionRequirement {
        if self.exact_version {
            VersionRequirement::Exact {
                major: 1,
                minor: 14,
            }
        } else {
            VersionRequirement::default()
        }
    }

    fn cancel_token(&self) -> CancelToken {
        let token = CancelToken::new();
        match self.timeout {
            Some(secs) => token.with_timeout(Duration::from_secs(secs)),
            None => token,
        }
    }

    fn runner(&self, cancel: &CancelToken) -> anyhow::Result<Runner> {
        let config = RunnerConfig::new(&self.mod_dir)
            .go_cmd(&self.go)
            .insecure(self.insecure)
            .verbose(self.verbose)
            .require(self.requirement());
        Runner::from_config(cancel, config)
            .with_context(|| format!("preparing module directory {}", self.mod_dir.display()))
    }
}

/// Parse arguments, run the command and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(&cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    }
}

fn execute(cli: &Cli) -> anyhow::Result<()> {
    let cancel = cli.cancel_token();

    match &cli.command {
        Commands::Get { update, packages } => {
            let runner = cli.runner(&cancel)?;
            runner
                .get_d(&cancel, *update, packages.as_slice())
                .context("go get -d")?;
        }
        Commands::Install { packages } => {
            let runner = cli.runner(&cancel)?;
            runner
                .install(&cancel, packages.as_slice())
                .context("go install")?;
        }
        Commands::Tidy => {
            let runner = cli.runner(&cancel)?;
            runner.mod_tidy(&cancel).context("go mod tidy")?;
        }
        Commands::Version { raw } => {
            let program = Program::resolve(OsStr::new(&cli.go));
            let version = detect_version(&cancel, &program, cli.requirement(), cli.verbose)?;
            if *raw {
                println!("{}", serde_json::to_string(&version)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&version)?);
            }
        }
    }

    Ok(())
}
