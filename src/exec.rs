use std::ffi::{OsStr, OsString};
use std::io::{self, PipeReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use which::which;

use crate::cancel::CancelToken;
use crate::error::{ExecError, ExecFailure};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// A program as configured by the caller plus the path it resolved to.
///
/// Commands are spawned from `resolved` but rendered in errors with `configured`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    configured: OsString,
    resolved: OsString,
}

impl Program {
    /// Resolve `name` through `PATH`, keeping it as given when lookup fails.
    pub fn resolve(name: &OsStr) -> Program {
        let resolved = match which(name) {
            Ok(path) => path.into_os_string(),
            Err(err) => {
                debug!(program = ?name, error = %err, "could not resolve program, using as given");
                name.to_os_string()
            }
        };

        Program {
            configured: name.to_os_string(),
            resolved,
        }
    }

    pub fn configured(&self) -> &OsStr {
        &self.configured
    }

    pub fn resolved(&self) -> &OsStr {
        &self.resolved
    }
}

/// Run `program` with `args`, capturing stdout and stderr into one buffer.
///
/// Both streams share a single pipe so the output keeps the order the child
/// wrote it in. `dir` of `None` runs in the caller's current directory. On
/// success the captured output is returned with trailing newlines stripped.
pub fn run<S: AsRef<str>>(
    cancel: &CancelToken,
    dir: Option<&Path>,
    program: &Program,
    args: &[S],
    verbose: bool,
) -> Result<String, ExecError> {
    let command_line = render_command_line(program.configured(), args);
    let fail = |output: String, failure: ExecFailure| {
        ExecError::new(command_line.clone(), output, failure, verbose)
    };

    if let Some(reason) = cancel.reason() {
        return Err(fail(String::new(), ExecFailure::Cancelled(reason)));
    }

    let (reader, writer) = io::pipe().map_err(|err| fail(String::new(), ExecFailure::Io(err)))?;
    let stderr = writer
        .try_clone()
        .map_err(|err| fail(String::new(), ExecFailure::Io(err)))?;

    let mut cmd = Command::new(program.resolved());
    for arg in args {
        let arg: &str = arg.as_ref();
        cmd.arg(arg);
    }
    cmd.stdin(Stdio::null()).stdout(writer).stderr(stderr);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    debug!(command = %command_line, dir = ?dir, "spawning command");
    let spawned = cmd.spawn();
    // The parent's copies of the write end must be closed or the reader never sees EOF.
    drop(cmd);
    let mut child = spawned.map_err(|err| fail(String::new(), ExecFailure::Io(err)))?;

    let buffer: SharedBuffer = Arc::default();
    let drained = spawn_reader(reader, Arc::clone(&buffer));

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(fail(snapshot(&buffer), ExecFailure::Io(err)));
            }
        }

        if let Some(reason) = cancel.reason() {
            warn!(command = %command_line, %reason, "killing command");
            let _ = child.kill();
            let _ = child.wait();
            return Err(fail(snapshot(&buffer), ExecFailure::Cancelled(reason)));
        }

        thread::sleep(POLL_INTERVAL);
    };

    // Processes left behind by the child may keep the pipe open after it exits.
    loop {
        match drained.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(reason) = cancel.reason() {
            warn!(command = %command_line, %reason, "abandoning output of exited command");
            return Err(fail(snapshot(&buffer), ExecFailure::Cancelled(reason)));
        }
    }

    let output = snapshot(&buffer);
    debug!(command = %command_line, %status, "command finished");

    if !status.success() {
        return Err(fail(output, ExecFailure::Exit(status)));
    }

    Ok(output.trim_end_matches('\n').to_string())
}

fn render_command_line<S: AsRef<str>>(program: &OsStr, args: &[S]) -> String {
    let mut line = program.to_string_lossy().into_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg.as_ref());
    }
    line
}

/// Drain `source` into `buffer` on a detached thread; the receiver fires at EOF.
fn spawn_reader(mut source: PipeReader, buffer: SharedBuffer) -> Receiver<()> {
    let (done, drained) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => match buffer.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                },
            }
        }
        let _ = done.send(());
    });
    drained
}

fn snapshot(buffer: &SharedBuffer) -> String {
    match buffer.lock() {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
    }
}
