// ============================================================================
// src/cmd/base.rs – Bounded external command runner (apache2, a2ensite, ...)
// ============================================================================

use crate::error::{AdminError, AdminResult};
use serde::Serialize;
use std::borrow::Cow;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(30);
const TERM_GRACE: Duration = Duration::from_millis(200);
/// How long finished commands may keep their pipes open (backgrounded
/// grandchildren) before we stop waiting for the readers.
const READER_GRACE: Duration = Duration::from_millis(500);
const SHELL: &str = "/bin/sh";

/// Outcome of one command invocation. A nonzero exit is a normal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandResult {
    fn not_found(program: &str) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: format!("command not found: {program}"),
            exit_code: 127,
            timed_out: false,
        }
    }

    /// stdout followed by stderr, the way `2>&1` would show it.
    pub fn combined_output(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Turn anything but a clean exit into an `ExecutionError`.
    pub fn require_success(self, what: &str, timeout: Duration) -> AdminResult<Self> {
        if self.timed_out {
            return Err(AdminError::Timeout {
                command: what.to_string(),
                after: timeout,
            });
        }
        if !self.success {
            let detail = self.stderr.trim();
            return Err(AdminError::execution(if detail.is_empty() {
                format!("{what} failed with exit code {}", self.exit_code)
            } else {
                format!("{what} failed with exit code {}: {detail}", self.exit_code)
            }));
        }
        Ok(self)
    }
}

/// Seam between the services and the process table.
pub trait Runner {
    /// Run `argv[0]` with the remaining elements as arguments. No shell.
    fn run(&self, argv: &[String], timeout: Option<Duration>) -> AdminResult<CommandResult>;

    /// Run `seg1 | seg2 | ...` through `/bin/sh`, every token escaped.
    fn run_pipeline(
        &self,
        segments: &[Vec<String>],
        timeout: Option<Duration>,
    ) -> AdminResult<CommandResult>;

    fn default_timeout(&self) -> Duration;

    /// Split a configured command line and append `extra` as separate arguments.
    fn run_line(&self, line: &str, extra: &[&str]) -> AdminResult<CommandResult> {
        let argv = command_argv(line, extra)?;
        self.run(&argv, None)
    }
}

/// Parse a configured command line (shell-like quoting, no expansion).
pub fn command_argv(line: &str, extra: &[&str]) -> AdminResult<Vec<String>> {
    let mut argv = match shlex::split(line) {
        Some(argv) if !argv.is_empty() => argv,
        _ => {
            return Err(AdminError::validation(format!(
                "command line is empty or unparsable: {line:?}"
            )))
        }
    };
    argv.extend(extra.iter().map(|s| s.to_string()));
    Ok(argv)
}

/// Escape one value as a single POSIX shell token.
pub fn quote(token: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(token)).into_owned()
}

/// Build `a b | c d` from argv segments; every token is escaped.
pub fn compose_pipeline(segments: &[Vec<String>]) -> AdminResult<String> {
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(AdminError::validation("pipeline segments must not be empty"));
    }
    Ok(segments
        .iter()
        .map(|seg| seg.iter().map(|t| quote(t)).collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(" | "))
}

/// Real process runner with a hard wall-clock bound per call.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn spawn_and_wait(
        &self,
        mut command: Command,
        label: &str,
        timeout: Duration,
    ) -> AdminResult<CommandResult> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own process group so a timeout can take down the whole tree
            command.process_group(0);
        }

        debug!(command = %label, timeout = ?timeout, "executing command");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(command = %label, "program not found");
                return Ok(CommandResult::not_found(label));
            }
            Err(e) => {
                return Err(AdminError::execution(format!(
                    "spawn {label} failed: {e}"
                )))
            }
        };

        let stdout = Drain::start(child.stdout.take());
        let stderr = Drain::start(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(AdminError::execution(format!(
                        "waiting for {label} failed: {e}"
                    )));
                }
            }
            if start.elapsed() > timeout {
                warn!(command = %label, "command timed out after {:?}", timeout);
                terminate(&mut child);
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let result = CommandResult {
            success: status.map(|s| s.success()).unwrap_or(false),
            stdout: stdout.finish(),
            stderr: stderr.finish(),
            exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
            timed_out: status.is_none(),
        };
        if !result.success && !result.timed_out {
            warn!(
                command = %label,
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "command exited unsuccessfully"
            );
        }
        Ok(result)
    }
}

impl Runner for CommandExecutor {
    fn run(&self, argv: &[String], timeout: Option<Duration>) -> AdminResult<CommandResult> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AdminError::validation("empty command"))?;
        let mut command = Command::new(program);
        command.args(args);
        self.spawn_and_wait(command, &argv.join(" "), timeout.unwrap_or(self.timeout))
    }

    fn run_pipeline(
        &self,
        segments: &[Vec<String>],
        timeout: Option<Duration>,
    ) -> AdminResult<CommandResult> {
        let script = compose_pipeline(segments)?;
        let mut command = Command::new(SHELL);
        command.args(["-c", &script]);
        self.spawn_and_wait(command, &script, timeout.unwrap_or(self.timeout))
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Best effort terminate the process group, then kill.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let pgid = Pid::from_raw(child.id() as i32);
        let _ = killpg(pgid, Signal::SIGTERM);
        thread::sleep(TERM_GRACE);
        if !matches!(child.try_wait(), Ok(Some(_))) {
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Reads a pipe on its own thread so partial output survives a timeout.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl Drain {
    fn start<R: Read + Send + 'static>(src: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = src.map(|mut src| {
            let sink = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match src.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => match sink.lock() {
                            Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                            Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                        },
                    }
                }
            })
        });
        Self { buf, handle }
    }

    fn finish(mut self) -> String {
        if let Some(handle) = self.handle.take() {
            let start = Instant::now();
            while !handle.is_finished() && start.elapsed() < READER_GRACE {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        let bytes = match self.buf.lock() {
            Ok(b) => b.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
