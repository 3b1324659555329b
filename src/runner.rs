use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{ExecError, RunnerError};
use crate::exec::{self, Program};
use crate::version::{GoVersion, VersionRequirement};

/// Module descriptor created inside the runner's module directory.
pub const MANIFEST_FILE: &str = "go.mod";

/// Whether `go get` should also upgrade already-required modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GetUpdatePolicy {
    #[default]
    NoUpdate,
    Update,
    UpdatePatch,
}

impl GetUpdatePolicy {
    pub fn flag(&self) -> Option<&'static str> {
        match self {
            GetUpdatePolicy::NoUpdate => None,
            GetUpdatePolicy::Update => Some("-u"),
            GetUpdatePolicy::UpdatePatch => Some("-u=patch"),
        }
    }
}

impl FromStr for GetUpdatePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "" | "none" => Ok(GetUpdatePolicy::NoUpdate),
            "all" | "-u" => Ok(GetUpdatePolicy::Update),
            "patch" | "-u=patch" => Ok(GetUpdatePolicy::UpdatePatch),
            other => Err(format!(
                "unknown update policy '{other}' (expected none, all or patch)"
            )),
        }
    }
}

/// Construction inputs for a [`Runner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub go_cmd: OsString,
    pub mod_dir: PathBuf,
    pub insecure: bool,
    pub verbose: bool,
    pub requirement: VersionRequirement,
}

impl RunnerConfig {
    pub fn new(mod_dir: impl Into<PathBuf>) -> Self {
        Self {
            go_cmd: OsString::from("go"),
            mod_dir: mod_dir.into(),
            insecure: false,
            verbose: false,
            requirement: VersionRequirement::default(),
        }
    }

    pub fn go_cmd(mut self, go_cmd: impl Into<OsString>) -> Self {
        self.go_cmd = go_cmd.into();
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn require(mut self, requirement: VersionRequirement) -> Self {
        self.requirement = requirement;
        self
    }
}

/// Runs module-aware `go` commands against a dedicated module directory.
///
/// Not meant to be shared between threads running commands at the same time,
/// and two runners should not point at the same directory concurrently.
#[derive(Debug)]
pub struct Runner {
    program: Program,
    mod_dir: PathBuf,
    insecure: bool,
    verbose: bool,
}

impl Runner {
    /// Check the toolchain version and make sure `mod_dir` holds a `go.mod`,
    /// creating one if needed.
    pub fn new(
        cancel: &CancelToken,
        insecure: bool,
        mod_dir: impl Into<PathBuf>,
        go_cmd: impl Into<OsString>,
    ) -> Result<Self, RunnerError> {
        Self::from_config(
            cancel,
            RunnerConfig::new(mod_dir).go_cmd(go_cmd).insecure(insecure),
        )
    }

    pub fn from_config(cancel: &CancelToken, config: RunnerConfig) -> Result<Self, RunnerError> {
        let runner = Runner {
            program: Program::resolve(&config.go_cmd),
            mod_dir: config.mod_dir,
            insecure: config.insecure,
            verbose: config.verbose,
        };

        let version = detect_version(cancel, &runner.program, config.requirement, runner.verbose)?;
        debug!(version = %version.raw, "detected go toolchain");

        fs::create_dir_all(&runner.mod_dir).map_err(|source| RunnerError::CreateModDir {
            path: runner.mod_dir.clone(),
            source,
        })?;

        let manifest = runner.manifest_path();
        match fs::metadata(&manifest) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => runner.init_manifest(cancel)?,
            Err(source) => {
                return Err(RunnerError::StatModFile {
                    path: manifest,
                    source,
                });
            }
        }

        Ok(runner)
    }

    /// The tool as configured, before `PATH` lookup.
    pub fn go_cmd(&self) -> &OsStr {
        self.program.configured()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn mod_dir(&self) -> &Path {
        &self.mod_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.mod_dir.join(MANIFEST_FILE)
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest_path().is_file()
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Run `go get -d` in the module directory.
    pub fn get_d<S: AsRef<str>>(
        &self,
        cancel: &CancelToken,
        update: GetUpdatePolicy,
        packages: &[S],
    ) -> Result<(), ExecError> {
        let args = self.get_d_args(update, packages);
        self.exec_go_in_mod_dir(cancel, &args).map(drop)
    }

    /// Arguments for [`Runner::get_d`]: flags first, then packages.
    pub fn get_d_args<S: AsRef<str>>(&self, update: GetUpdatePolicy, packages: &[S]) -> Vec<String> {
        let mut args = vec!["get".to_string(), "-d".to_string()];
        if self.insecure {
            args.push("-insecure".to_string());
        }
        if let Some(flag) = update.flag() {
            args.push(flag.to_string());
        }
        args.extend(packages.iter().map(|pkg| pkg.as_ref().to_string()));
        args
    }

    /// Run `go install` in the module directory.
    pub fn install<S: AsRef<str>>(
        &self,
        cancel: &CancelToken,
        packages: &[S],
    ) -> Result<(), ExecError> {
        let mut args = vec!["install".to_string()];
        args.extend(packages.iter().map(|pkg| pkg.as_ref().to_string()));
        self.exec_go_in_mod_dir(cancel, &args).map(drop)
    }

    /// Run `go mod tidy` in the module directory.
    pub fn mod_tidy(&self, cancel: &CancelToken) -> Result<(), ExecError> {
        self.exec_go_in_mod_dir(cancel, &["mod", "tidy"]).map(drop)
    }

    fn init_manifest(&self, cancel: &CancelToken) -> Result<(), RunnerError> {
        let current = self
            .exec_go(cancel, &["list", "-m"])
            .map_err(RunnerError::CurrentModule)?;

        let cwd = env::current_dir().ok();
        let module = module_path(current.trim(), &self.mod_dir, cwd.as_deref());
        info!(module = %module, dir = %self.mod_dir.display(), "initializing go.mod");

        let result = self.exec_go_in_mod_dir(cancel, &["mod", "init", module.as_str()]);
        result
            .map(drop)
            .map_err(|source| RunnerError::InitModule { module, source })
    }

    fn exec_go<S: AsRef<str>>(&self, cancel: &CancelToken, args: &[S]) -> Result<String, ExecError> {
        exec::run(cancel, None, &self.program, args, self.verbose)
    }

    fn exec_go_in_mod_dir<S: AsRef<str>>(
        &self,
        cancel: &CancelToken,
        args: &[S],
    ) -> Result<String, ExecError> {
        exec::run(cancel, Some(self.mod_dir.as_path()), &self.program, args, self.verbose)
    }
}

/// Run `go version` and check the result against `requirement`.
pub fn detect_version(
    cancel: &CancelToken,
    program: &Program,
    requirement: VersionRequirement,
    verbose: bool,
) -> Result<GoVersion, RunnerError> {
    let raw = exec::run(cancel, None, program, &["version"], verbose)
        .map_err(RunnerError::VersionProbe)?;

    match GoVersion::parse(&raw) {
        Some(version) if requirement.accepts(&raw) => Ok(version),
        _ => Err(RunnerError::UnsupportedVersion {
            found: raw,
            required: requirement,
        }),
    }
}

/// Module path for a nested module: `current` joined with `mod_dir`.
///
/// Absolute directories are made relative to `cwd` when they live under it;
/// otherwise their normal components are used. `..` pops a segment, or is
/// kept once it climbs above the first segment.
pub fn module_path(current: &str, mod_dir: &Path, cwd: Option<&Path>) -> String {
    let relative = match cwd {
        Some(cwd) if mod_dir.is_absolute() => mod_dir.strip_prefix(cwd).unwrap_or(mod_dir),
        _ => mod_dir,
    };

    let mut segments: Vec<String> = current
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => match segments.last() {
                Some(last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push("..".to_string()),
            },
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    segments.join("/")
}
