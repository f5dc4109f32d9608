//! Execution of version-control commands.
//!
//! [`CommandRunner`] is the only place the crate touches external processes,
//! so tests swap in [`ScriptedRunner`] to get deterministic output and a log
//! of every invocation.

use crate::error::CommandError;
use crossbeam_channel::Receiver;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the output pipes to drain once the process has exited.
const PIPE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Port for running a command in a working directory with a deadline.
pub trait CommandRunner: Send + Sync {
    /// Run `argv` (program first) in `cwd`.
    ///
    /// A non-zero exit code is returned as a normal [`CommandOutput`]; only a
    /// missed deadline or a process that could not be started is an error.
    fn run(
        &self,
        cwd: &Path,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

/// Production runner backed by `std::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        cwd: &Path,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let command = argv.join(" ");
        let launch_error = |message: String| CommandError::Launch {
            command: command.clone(),
            cwd: cwd.to_path_buf(),
            message,
        };

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| launch_error("empty command".to_string()))?;

        if !cwd.is_dir() {
            return Err(launch_error("working directory is not accessible".to_string()));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            // Never block on a credential prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so helpers such as ssh die with the command on timeout
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let mut child = cmd.spawn().map_err(|e| launch_error(e.to_string()))?;

        let stdout_rx = drain_pipe(child.stdout.take());
        let stderr_rx = drain_pipe(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!("Command `{}` in {} exceeded {:?}", command, cwd.display(), timeout);
                    kill(&mut child);
                    return Err(CommandError::Timeout {
                        command: command.clone(),
                        timeout,
                    });
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    kill(&mut child);
                    return Err(launch_error(e.to_string()));
                }
            }
        };

        let stdout = stdout_rx.recv_timeout(PIPE_GRACE).unwrap_or_default();
        let stderr = stderr_rx.recv_timeout(PIPE_GRACE).unwrap_or_default();

        // Killed by a signal: there is no exit code to report
        let exit_code = status.code().unwrap_or(-1);
        debug!("`{}` in {} exited with {}", command, cwd.display(), exit_code);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Reader threads end once every holder of the pipe has exited. On a timeout the
/// whole process group is killed; after a normal exit a lingering helper keeps
/// its reader alive, but the caller stops waiting after [`PIPE_GRACE`].
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let result = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{}", pgid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = result {
        debug!("Could not signal process group {}: {}", pgid, err);
    }
}

/// A recorded invocation: working directory and argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub cwd: PathBuf,
    pub argv: Vec<String>,
}

impl RecordedCall {
    pub fn command(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Output(CommandOutput),
    Timeout,
    LaunchFailure(String),
}

/// Deterministic test double.
///
/// Responses are matched by substring against the space-joined argv, first
/// registration wins. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, Scripted)>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.push((pattern.into(), Scripted::Output(output)));
        self
    }

    pub fn stdout(self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.respond(pattern, CommandOutput::success(stdout))
    }

    pub fn timeout(mut self, pattern: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), Scripted::Timeout));
        self
    }

    pub fn launch_failure(
        mut self,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.responses
            .push((pattern.into(), Scripted::LaunchFailure(message.into())));
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.command().contains(pattern))
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        cwd: &Path,
        argv: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let command = argv.join(" ");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                cwd: cwd.to_path_buf(),
                argv: argv.iter().map(|s| s.to_string()).collect(),
            });

        let scripted = self
            .responses
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, scripted)| scripted.clone());

        match scripted {
            None => Ok(CommandOutput::default()),
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Timeout) => Err(CommandError::Timeout { command, timeout }),
            Some(Scripted::LaunchFailure(message)) => Err(CommandError::Launch {
                command,
                cwd: cwd.to_path_buf(),
                message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scripted_runner_matches_by_substring() {
        let runner = ScriptedRunner::new()
            .stdout("branch --show-current", "main\n")
            .respond("remote get-url", CommandOutput::failure(2, "error: No such remote"));

        let cwd = Path::new("/repo");
        let timeout = Duration::from_secs(5);

        let branch = runner.run(cwd, &["git", "branch", "--show-current"], timeout).unwrap();
        assert_eq!(branch.stdout, "main\n");
        assert!(branch.succeeded());

        let remote = runner.run(cwd, &["git", "remote", "get-url", "origin"], timeout).unwrap();
        assert_eq!(remote.exit_code, 2);
        assert!(remote.stdout.is_empty());
    }

    #[test]
    fn test_scripted_runner_defaults_to_empty_success() {
        let runner = ScriptedRunner::new();
        let output = runner
            .run(Path::new("/repo"), &["git", "status", "--porcelain"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(output, CommandOutput::default());
        assert!(output.succeeded());
    }

    #[test]
    fn test_scripted_runner_records_calls_in_order() {
        let runner = ScriptedRunner::new();
        let timeout = Duration::from_secs(5);
        let _ = runner.run(Path::new("/a"), &["git", "fetch", "--all"], timeout);
        let _ = runner.run(Path::new("/b"), &["git", "status", "--porcelain"], timeout);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].cwd, PathBuf::from("/a"));
        assert_eq!(calls[0].command(), "git fetch --all");
        assert_eq!(calls[1].argv, vec!["git", "status", "--porcelain"]);
        assert_eq!(runner.calls_matching("fetch").len(), 1);
    }

    #[test]
    fn test_scripted_runner_errors() {
        let runner = ScriptedRunner::new()
            .timeout("fetch")
            .launch_failure("status", "permission denied");
        let timeout = Duration::from_secs(30);

        let err = runner.run(Path::new("/a"), &["git", "fetch", "--all"], timeout).unwrap_err();
        assert_eq!(
            err,
            CommandError::Timeout {
                command: "git fetch --all".to_string(),
                timeout
            }
        );

        let err = runner
            .run(Path::new("/a"), &["git", "status", "--porcelain"], timeout)
            .unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_reports_non_zero_exit() {
        let temp_dir = TempDir::new().unwrap();
        let output = ProcessRunner::new()
            .run(
                temp_dir.path(),
                &["sh", "-c", "echo out; echo err >&2; exit 3"],
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(temp_dir.path(), &["sleep", "5"], Duration::from_millis(200))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_runner_timeout_kills_helper_processes() {
        let temp_dir = TempDir::new().unwrap();
        let started = Instant::now();
        let err = ProcessRunner::new()
            .run(
                temp_dir.path(),
                &["sh", "-c", "sleep 30 & echo $! > helper.pid; wait"],
                Duration::from_millis(300),
            )
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(3));

        let pid = std::fs::read_to_string(temp_dir.path().join("helper.pid")).unwrap();
        let stat = PathBuf::from("/proc").join(pid.trim()).join("stat");
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            // Gone, or a zombie waiting to be reaped
            let finished = match std::fs::read_to_string(&stat) {
                Ok(content) => content
                    .rsplit_once(')')
                    .is_some_and(|(_, rest)| rest.trim_start().starts_with(['Z', 'X'])),
                Err(_) => true,
            };
            if finished {
                break;
            }
            assert!(Instant::now() < deadline, "helper process outlived the timeout");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_process_runner_launch_failures() {
        let temp_dir = TempDir::new().unwrap();
        let runner = ProcessRunner::new();

        let err = runner
            .run(
                temp_dir.path(),
                &["definitely-not-a-real-program-xyz"],
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));

        let missing = temp_dir.path().join("vanished");
        let err = runner
            .run(&missing, &["git", "status"], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));

        let err = runner
            .run(temp_dir.path(), &[], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));
    }
}
