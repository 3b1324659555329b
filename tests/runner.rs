#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use gomodcmd::{
    CancelToken, GetUpdatePolicy, MANIFEST_FILE, Runner, RunnerConfig, RunnerError,
    VersionRequirement,
};

// ── stub go binary ────────────────────────────────────────────────────────────

/// Shell bodies for each `go` subcommand the stub understands.
struct Script<'a> {
    version: &'a str,
    list: &'a str,
    init: &'a str,
    get: &'a str,
    install: &'a str,
}

impl Default for Script<'_> {
    fn default() -> Self {
        Script {
            version: "echo 'go version go1.14.9 linux/amd64'",
            list: "echo example.com/mod",
            init: "echo \"module $3\" > go.mod",
            get: ":",
            install: ":",
        }
    }
}

struct StubGo {
    _dir: tempfile::TempDir,
    program: PathBuf,
    log: PathBuf,
}

impl StubGo {
    /// Write a shell script standing in for `go`. Every invocation is appended
    /// to a log as `<physical cwd>|<args>`.
    fn from_script(script: Script<'_>) -> StubGo {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let program = dir.path().join("go");
        let log = dir.path().join("calls.log");

        let body = format!(
            r#"#!/bin/sh
echo "$(pwd -P)|$*" >> "{log}"
case "$1" in
  version) {version} ;;
  list) {list} ;;
  mod)
    case "$2" in
      init) {init} ;;
      tidy) ;;
    esac ;;
  get) {get} ;;
  install) {install} ;;
esac
"#,
            log = log.display(),
            version = script.version,
            list = script.list,
            init = script.init,
            get = script.get,
            install = script.install,
        );
        fs::write(&program, body).expect("stub should be written");
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755))
            .expect("stub should be executable");

        StubGo {
            _dir: dir,
            program,
            log,
        }
    }

    fn new(version: &str, get: &str, install: &str) -> StubGo {
        let version = format!("echo '{version}'");
        StubGo::from_script(Script {
            version: &version,
            get,
            install,
            ..Script::default()
        })
    }

    fn go114() -> StubGo {
        StubGo::new("go version go1.14.9 linux/amd64", ":", ":")
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn args(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|line| line.split_once('|').map(|(_, args)| args.to_string()).unwrap_or(line))
            .collect()
    }
}

fn canonical(path: &Path) -> String {
    path.canonicalize().unwrap().display().to_string()
}

// ── construction ──────────────────────────────────────────────────────────────

#[test]
fn construction_bootstraps_missing_manifest() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    let mod_dir = work.path().join("tools");

    let runner = Runner::new(&CancelToken::new(), false, &mod_dir, &stub.program)
        .expect("runner should be constructed");

    assert!(runner.has_manifest());
    assert_eq!(runner.manifest_path(), mod_dir.join(MANIFEST_FILE));

    let expected_module = format!(
        "example.com/mod/{}",
        mod_dir.strip_prefix("/").unwrap().display()
    );
    assert_eq!(
        stub.args(),
        [
            "version".to_string(),
            "list -m".to_string(),
            format!("mod init {expected_module}"),
        ]
    );

    let init_call = &stub.calls()[2];
    assert!(init_call.starts_with(&format!("{}|", canonical(&mod_dir))));

    let manifest = fs::read_to_string(mod_dir.join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.trim(), format!("module {expected_module}"));
}

#[test]
fn construction_skips_bootstrap_when_manifest_exists() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module example.com/existing\n").unwrap();

    let runner = Runner::new(&CancelToken::new(), false, work.path(), &stub.program).unwrap();

    assert!(runner.has_manifest());
    assert_eq!(stub.args(), ["version"]);
}

#[test]
fn construction_rejects_unsupported_version() {
    let stub = StubGo::new("go version go1.13.15 linux/amd64", ":", ":");
    let work = tempfile::tempdir().unwrap();

    let err = Runner::new(&CancelToken::new(), false, work.path().join("m"), &stub.program)
        .expect_err("old toolchains should be rejected");

    assert!(matches!(err, RunnerError::UnsupportedVersion { .. }));
    assert!(err.to_string().contains("go version go1.13.15 linux/amd64"));
    assert!(!work.path().join("m").exists());
}

#[test]
fn exact_requirement_rejects_newer_release() {
    let stub = StubGo::new("go version go1.16.3 linux/amd64", ":", ":");
    let work = tempfile::tempdir().unwrap();
    let config = RunnerConfig::new(work.path())
        .go_cmd(&stub.program)
        .require(VersionRequirement::Exact {
            major: 1,
            minor: 14,
        });

    let err = Runner::from_config(&CancelToken::new(), config).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("go version go1.16.3 linux/amd64"));
    assert!(text.contains("go1.14.x"));
}

#[test]
fn minimum_requirement_accepts_newer_release() {
    let stub = StubGo::new("go version go1.21.4 linux/amd64", ":", ":");
    let work = tempfile::tempdir().unwrap();

    Runner::new(&CancelToken::new(), false, work.path(), &stub.program)
        .expect("newer toolchains satisfy the default requirement");
}

#[test]
fn construction_reports_missing_binary_with_context() {
    let work = tempfile::tempdir().unwrap();
    let missing = work.path().join("no-such-go");

    let err = Runner::new(&CancelToken::new(), false, work.path(), &missing).unwrap_err();

    match err {
        RunnerError::VersionProbe(source) => {
            assert!(source.to_string().contains("error while running command"));
            assert!(source.command_line().ends_with("no-such-go version"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn construction_fails_when_mod_dir_is_a_file() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    let blocker = work.path().join("blocker");
    fs::write(&blocker, "").unwrap();

    let err = Runner::new(&CancelToken::new(), false, blocker.join("tools"), &stub.program)
        .unwrap_err();

    assert!(matches!(err, RunnerError::CreateModDir { .. }));
    assert!(err.to_string().contains("blocker"));
}

#[test]
fn failing_module_lookup_is_reported_as_current_module() {
    let stub = StubGo::from_script(Script {
        list: "echo 'go: cannot find main module' >&2; exit 1",
        ..Script::default()
    });
    let work = tempfile::tempdir().unwrap();
    let mod_dir = work.path().join("tools");

    let err = Runner::new(&CancelToken::new(), false, &mod_dir, &stub.program).unwrap_err();

    match &err {
        RunnerError::CurrentModule(source) => {
            assert_eq!(source.output(), "go: cannot find main module\n");
            assert_eq!(source.exit_code(), Some(1));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(std::error::Error::source(&err).is_some());
    assert!(!mod_dir.join(MANIFEST_FILE).exists());
    assert_eq!(stub.args(), ["version", "list -m"]);
}

#[test]
fn failing_mod_init_names_the_module() {
    let stub = StubGo::from_script(Script {
        init: "echo 'go: go.mod already exists' >&2; exit 1",
        ..Script::default()
    });
    let work = tempfile::tempdir().unwrap();
    let mod_dir = work.path().join("tools");

    let err = Runner::new(&CancelToken::new(), false, &mod_dir, &stub.program).unwrap_err();

    let expected_module = format!(
        "example.com/mod/{}",
        mod_dir.strip_prefix("/").unwrap().display()
    );
    match &err {
        RunnerError::InitModule { module, source } => {
            assert_eq!(module, &expected_module);
            assert_eq!(source.output(), "go: go.mod already exists\n");
            assert!(source.command_line().ends_with(&format!("mod init {expected_module}")));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.to_string().contains(&expected_module));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn unreadable_manifest_is_not_treated_as_missing() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    // A self-referencing link fails to stat with ELOOP rather than NotFound.
    std::os::unix::fs::symlink(MANIFEST_FILE, work.path().join(MANIFEST_FILE)).unwrap();

    let err = Runner::new(&CancelToken::new(), false, work.path(), &stub.program).unwrap_err();

    match &err {
        RunnerError::StatModFile { path, .. } => {
            assert_eq!(path, &work.path().join(MANIFEST_FILE));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(stub.args(), ["version"]);
}

// ── pass-through commands ─────────────────────────────────────────────────────

#[test]
fn get_d_runs_in_mod_dir_with_flags_before_packages() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module x\n").unwrap();

    let runner = Runner::new(&CancelToken::new(), true, work.path(), &stub.program).unwrap();
    runner
        .get_d(
            &CancelToken::new(),
            GetUpdatePolicy::Update,
            &["example.com/a@v1.2.3", "example.com/b"],
        )
        .expect("get should succeed");

    let calls = stub.calls();
    assert_eq!(
        calls.last().unwrap(),
        &format!(
            "{}|get -d -insecure -u example.com/a@v1.2.3 example.com/b",
            canonical(work.path())
        )
    );
}

#[test]
fn install_and_tidy_pass_arguments_through() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module x\n").unwrap();
    let cancel = CancelToken::new();

    let runner = Runner::new(&cancel, false, work.path(), &stub.program).unwrap();
    runner.install(&cancel, &["example.com/tool"]).unwrap();
    runner.mod_tidy(&cancel).unwrap();

    assert_eq!(
        stub.args(),
        ["version", "install example.com/tool", "mod tidy"]
    );
}

#[test]
fn quiet_failure_is_exactly_the_captured_output() {
    let stub = StubGo::new(
        "go version go1.14.9 linux/amd64",
        "echo 'go: example.com/a@v9: not found' >&2; exit 1",
        ":",
    );
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module x\n").unwrap();

    let runner = Runner::new(&CancelToken::new(), false, work.path(), &stub.program).unwrap();
    let err = runner
        .get_d(&CancelToken::new(), GetUpdatePolicy::NoUpdate, &["example.com/a@v9"])
        .unwrap_err();

    assert_eq!(err.to_string(), "go: example.com/a@v9: not found\n");
    assert_eq!(err.exit_code(), Some(1));
}

#[test]
fn verbose_failure_includes_command_line() {
    let stub = StubGo::new(
        "go version go1.14.9 linux/amd64",
        "echo 'go: example.com/a@v9: not found' >&2; exit 1",
        ":",
    );
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module x\n").unwrap();
    let config = RunnerConfig::new(work.path())
        .go_cmd(&stub.program)
        .verbose(true);

    let runner = Runner::from_config(&CancelToken::new(), config).unwrap();
    let err = runner
        .get_d(&CancelToken::new(), GetUpdatePolicy::NoUpdate, &["example.com/a@v9"])
        .unwrap_err();

    let text = err.to_string();
    assert!(text.contains("get -d example.com/a@v9'"));
    assert!(text.contains("go: example.com/a@v9: not found"));
    assert!(text.ends_with("err: exit status 1"));
    assert_eq!(err.output(), "go: example.com/a@v9: not found\n");
}

#[test]
fn deadline_interrupts_hanging_install() {
    let stub = StubGo::new("go version go1.14.9 linux/amd64", ":", "exec sleep 30");
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module x\n").unwrap();

    let runner = Runner::new(&CancelToken::new(), false, work.path(), &stub.program).unwrap();
    let deadline = CancelToken::new().with_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let err = runner.install(&deadline, &["example.com/slow"]).unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancelled_token_fails_without_running() {
    let stub = StubGo::go114();
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MANIFEST_FILE), "module x\n").unwrap();

    let runner = Runner::new(&CancelToken::new(), false, work.path(), &stub.program).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = runner.mod_tidy(&cancel).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(stub.args(), ["version"]);
}
