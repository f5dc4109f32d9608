use crate::error::CommandError;
use crate::remote::{NO_REMOTE_OWNER, parse_remote_url};
use crate::runner::CommandRunner;
use crate::store::{FetchResults, FetchStatus, ResultStore};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub const DETACHED_HEAD: &str = "detached HEAD";

/// Shown in place of branch and owner when a repository could not be read.
pub const UNAVAILABLE: &str = "N/A";

const BRANCH: &[&str] = &["git", "branch", "--show-current"];
const REMOTE_URL: &[&str] = &["git", "remote", "get-url", "origin"];
const STATUS: &[&str] = &["git", "status", "--porcelain"];
const STASH_LIST: &[&str] = &["git", "stash", "list"];
const AHEAD_BEHIND: &[&str] = &["git", "rev-list", "--left-right", "--count", "HEAD...@{upstream}"];
const REMOTE_HEAD_MESSAGE: &[&str] = &["git", "log", "origin/HEAD", "-1", "--pretty=format:%s"];

/// Working tree state of a readable repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Clean,
    Stashed,
    Changes,
}

/// Display state, including repositories that could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoState {
    Clean,
    Stashed,
    Changes,
    Error,
}

impl From<TreeState> for RepoState {
    fn from(state: TreeState) -> Self {
        match state {
            TreeState::Clean => RepoState::Clean,
            TreeState::Stashed => RepoState::Stashed,
            TreeState::Changes => RepoState::Changes,
        }
    }
}

impl fmt::Display for RepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepoState::Clean => "clean",
            RepoState::Stashed => "stashed",
            RepoState::Changes => "changes",
            RepoState::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub name: String,
    pub path: PathBuf,
    pub remote_owner: String,
    pub current_branch: String,
    pub state: TreeState,
    pub ahead_count: usize,
    pub behind_count: usize,
    pub stash_count: usize,
    pub remote_head_message: String,
    pub last_fetch: Option<FetchStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Launch,
}

impl From<&CommandError> for FailureKind {
    fn from(err: &CommandError) -> Self {
        match err {
            CommandError::Timeout { .. } => FailureKind::Timeout,
            CommandError::Launch { .. } => FailureKind::Launch,
        }
    }
}

/// A repository whose required probes could not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFailure {
    pub name: String,
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
    pub last_fetch: Option<FetchStatus>,
}

/// Outcome of inspecting one repository.
///
/// Only `Ready` carries branch and tracking fields, so a failed repository
/// can never be rendered with stale values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoReport {
    Ready(RepoStatus),
    Failed(RepoFailure),
}

impl RepoReport {
    pub fn name(&self) -> &str {
        match self {
            RepoReport::Ready(status) => &status.name,
            RepoReport::Failed(failure) => &failure.name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            RepoReport::Ready(status) => &status.path,
            RepoReport::Failed(failure) => &failure.path,
        }
    }

    pub fn remote_owner(&self) -> &str {
        match self {
            RepoReport::Ready(status) => &status.remote_owner,
            RepoReport::Failed(_) => UNAVAILABLE,
        }
    }

    pub fn current_branch(&self) -> &str {
        match self {
            RepoReport::Ready(status) => &status.current_branch,
            RepoReport::Failed(_) => UNAVAILABLE,
        }
    }

    pub fn state(&self) -> RepoState {
        match self {
            RepoReport::Ready(status) => status.state.into(),
            RepoReport::Failed(_) => RepoState::Error,
        }
    }

    pub fn error_detail(&self) -> Option<&str> {
        match self {
            RepoReport::Ready(_) => None,
            RepoReport::Failed(failure) => Some(&failure.message),
        }
    }

    /// `(ahead, behind)`; zero for failed repositories.
    pub fn tracking(&self) -> (usize, usize) {
        match self {
            RepoReport::Ready(status) => (status.ahead_count, status.behind_count),
            RepoReport::Failed(_) => (0, 0),
        }
    }

    pub fn last_fetch(&self) -> Option<FetchStatus> {
        match self {
            RepoReport::Ready(status) => status.last_fetch,
            RepoReport::Failed(failure) => failure.last_fetch,
        }
    }

    pub fn status(&self) -> Option<&RepoStatus> {
        match self {
            RepoReport::Ready(status) => Some(status),
            RepoReport::Failed(_) => None,
        }
    }
}

/// Turns the output of a fixed sequence of git probes into a [`RepoReport`].
#[derive(Clone)]
pub struct RepoInspector {
    runner: Arc<dyn CommandRunner>,
    store: ResultStore,
}

impl RepoInspector {
    pub fn new(runner: Arc<dyn CommandRunner>, store: ResultStore) -> Self {
        Self { runner, store }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Inspect one repository, annotated with the stored fetch outcome.
    pub fn inspect(&self, repo_path: &Path) -> RepoReport {
        self.inspect_with(repo_path, &self.store.snapshot())
    }

    /// Inspect against an already captured set of fetch outcomes, so a whole
    /// pass sees the same fetch results.
    pub fn inspect_with(&self, repo_path: &Path, fetched: &FetchResults) -> RepoReport {
        let last_fetch = fetched.get(repo_path).map(|outcome| outcome.status());
        match self.read_status(repo_path, last_fetch) {
            Ok(status) => RepoReport::Ready(status),
            Err(err) => {
                if err.is_timeout() {
                    warn!("Git command timeout for {}: {:?}", repo_path.display(), err);
                } else {
                    warn!("Git command failed for {}: {}", repo_path.display(), err);
                }
                RepoReport::Failed(RepoFailure {
                    name: dir_name(repo_path),
                    path: repo_path.to_path_buf(),
                    kind: FailureKind::from(&err),
                    message: err.to_string(),
                    last_fetch,
                })
            }
        }
    }

    fn read_status(
        &self,
        repo_path: &Path,
        last_fetch: Option<FetchStatus>,
    ) -> Result<RepoStatus, CommandError> {
        let branch = self.probe(repo_path, BRANCH)?;
        let current_branch = match branch.trim() {
            "" => DETACHED_HEAD.to_string(),
            name => name.to_string(),
        };

        let remote = parse_remote_url(&self.probe(repo_path, REMOTE_URL)?);

        let has_changes = !self.probe(repo_path, STATUS)?.trim().is_empty();
        let stash_count = self.stash_count(repo_path);
        let state = if has_changes {
            TreeState::Changes
        } else if stash_count > 0 {
            TreeState::Stashed
        } else {
            TreeState::Clean
        };

        let (ahead_count, behind_count) = self.tracking(repo_path);
        let remote_head_message = self.remote_head_message(repo_path);

        Ok(RepoStatus {
            name: remote.name.unwrap_or_else(|| dir_name(repo_path)),
            path: repo_path.to_path_buf(),
            remote_owner: remote.owner,
            current_branch,
            state,
            ahead_count,
            behind_count,
            stash_count,
            remote_head_message,
            last_fetch,
        })
    }

    /// Stdout of a required probe, whatever its exit code.
    fn probe(&self, repo_path: &Path, argv: &[&str]) -> Result<String, CommandError> {
        let output = self.runner.run(repo_path, argv, PROBE_TIMEOUT)?;
        if !output.succeeded() {
            debug!(
                "`{}` exited with {} in {}",
                argv.join(" "),
                output.exit_code,
                repo_path.display()
            );
        }
        Ok(output.stdout)
    }

    /// Stdout of a best-effort probe; `None` on any failure or empty output.
    fn optional_probe(&self, repo_path: &Path, argv: &[&str]) -> Option<String> {
        match self.runner.run(repo_path, argv, PROBE_TIMEOUT) {
            Ok(output) if output.succeeded() => {
                let stdout = output.stdout.trim();
                (!stdout.is_empty()).then(|| stdout.to_string())
            }
            Ok(_) => None,
            Err(e) => {
                debug!("`{}` failed in {}: {}", argv.join(" "), repo_path.display(), e);
                None
            }
        }
    }

    fn stash_count(&self, repo_path: &Path) -> usize {
        self.optional_probe(repo_path, STASH_LIST)
            .map(|out| out.lines().filter(|line| !line.trim().is_empty()).count())
            .unwrap_or(0)
    }

    fn tracking(&self, repo_path: &Path) -> (usize, usize) {
        self.optional_probe(repo_path, AHEAD_BEHIND)
            .and_then(|out| parse_ahead_behind(&out))
            .unwrap_or((0, 0))
    }

    fn remote_head_message(&self, repo_path: &Path) -> String {
        self.optional_probe(repo_path, REMOTE_HEAD_MESSAGE)
            .unwrap_or_default()
    }
}

/// Parse the `<ahead>\t<behind>` output of `rev-list --left-right --count`.
pub fn parse_ahead_behind(output: &str) -> Option<(usize, usize)> {
    let mut parts = output.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((ahead, behind))
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}
