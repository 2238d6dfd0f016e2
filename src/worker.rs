//! The command worker: spawns a module binary, captures its output and
//! enforces a wall-clock timeout.
//!
//! Built around `std::process::Command` and the `wait-timeout` crate rather
//! than a hand-rolled `fork`/`pipe`/`waitpid(WNOHANG)` poll loop. Argument
//! splitting uses `shell-words` in place of a shell-dependent `wordexp()`
//! call.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::WorkerError;

/// How a launched module finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The child could not be spawned, or a parsing error prevented it
    /// from ever starting.
    Failure,
    /// The child ran to completion within the deadline.
    Success,
    /// The wall-clock deadline elapsed; the child was killed.
    Timeout,
}

/// The result of one [`launch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchResult {
    /// How the child finished.
    pub outcome: LaunchOutcome,
    /// Captured stdout (and stderr, appended, when `capture_output` was
    /// set); empty when output was not captured or the child never ran.
    pub output: String,
    /// The child's exit code, or a sentinel (`1`) for timeout/spawn
    /// failure.
    pub exit_code: i32,
}

impl LaunchResult {
    fn failure() -> Self {
        LaunchResult {
            outcome: LaunchOutcome::Failure,
            output: String::new(),
            exit_code: 1,
        }
    }

    fn timeout() -> Self {
        LaunchResult {
            outcome: LaunchOutcome::Timeout,
            output: String::new(),
            exit_code: 1,
        }
    }
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Spawns `executable_path` with arguments parsed from `arg_string`
/// (shell-style word-splitting), waits up to `timeout` for it to exit, and
/// returns its outcome.
///
/// Never panics: spawn failures and argument-parse failures are reported
/// as [`LaunchOutcome::Failure`], not propagated as an `Err` (the
/// underlying [`WorkerError`] is logged, not returned).
pub fn launch(
    executable_path: &str,
    arg_string: &str,
    capture_output: bool,
    timeout: Duration,
) -> LaunchResult {
    let args = match shell_words::split(arg_string) {
        Ok(args) => args,
        Err(source) => {
            let err = WorkerError::ArgParse {
                args: arg_string.to_owned(),
                source,
            };
            warn!(%err, "failed to parse module arguments");
            return LaunchResult::failure();
        }
    };

    let mut command = Command::new(executable_path);
    command.args(args);
    if capture_output {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let mut child: Child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = WorkerError::Spawn {
                path: executable_path.to_owned(),
                source,
            };
            warn!(%err, "failed to spawn module");
            return LaunchResult::failure();
        }
    };

    let stdout_reader = capture_output.then(|| drain_pipe(child.stdout.take().expect("piped stdout")));
    let stderr_reader = capture_output.then(|| drain_pipe(child.stderr.take().expect("piped stderr")));

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            debug!(path = executable_path, ?timeout, "module exceeded timeout, killing");
            let _ = child.kill();
            let _ = child.wait();
            return LaunchResult::timeout();
        }
        Err(e) => {
            warn!(path = executable_path, error = %e, "failed waiting on module");
            let _ = child.kill();
            let _ = child.wait();
            return LaunchResult::failure();
        }
    };

    let mut output = Vec::new();
    if let Some(handle) = stdout_reader {
        output.extend(handle.join().unwrap_or_default());
    }
    if let Some(handle) = stderr_reader {
        output.extend(handle.join().unwrap_or_default());
    }

    LaunchResult {
        outcome: LaunchOutcome::Success,
        output: String::from_utf8_lossy(&output).into_owned(),
        exit_code: status.code().unwrap_or(1),
    }
}
