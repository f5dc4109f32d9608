//! Background refresh of remote-tracking refs.
//!
//! A pass fetches every repository in turn on its own thread and reports back
//! over a channel, so the display loop never waits on the network. Only one
//! pass may run at a time.

use crate::error::{CommandError, FetchError};
use crate::runner::CommandRunner;
use crate::store::{FetchOutcome, FetchResults, ResultStore};
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const FETCH_ALL: &[&str] = &["git", "fetch", "--all"];

/// Failures listed by name in the summary before the rest are counted.
const SUMMARY_FAILURE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// Sent before repository `index` (1-based) of `total` is fetched.
    Progress {
        index: usize,
        total: usize,
        name: String,
        path: PathBuf,
    },
    /// Every repository has been attempted and the store updated.
    Completed { results: FetchResults, summary: String },
}

/// Releases the single-pass slot when dropped.
struct PassGuard {
    running: Arc<AtomicBool>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    runner: Arc<dyn CommandRunner>,
    store: ResultStore,
    running: Arc<AtomicBool>,
}

impl FetchOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, store: ResultStore) -> Self {
        Self {
            runner,
            store,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Result<PassGuard, FetchError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FetchError::AlreadyRunning)?;
        Ok(PassGuard {
            running: Arc::clone(&self.running),
        })
    }

    /// Fetch every repository on the calling thread.
    ///
    /// `on_progress(index, total, path)` runs before each fetch. Individual
    /// failures are recorded and the pass continues; the complete mapping
    /// also replaces the contents of the result store.
    pub fn fetch_all<F>(
        &self,
        repos: &[PathBuf],
        on_progress: F,
    ) -> Result<FetchResults, FetchError>
    where
        F: FnMut(usize, usize, &Path),
    {
        let _guard = self.try_begin()?;
        Ok(self.run_pass(repos, on_progress))
    }

    /// Start a pass on a background thread, reporting through `events`.
    ///
    /// Rejected, not queued, while another pass is in flight.
    pub fn spawn(
        &self,
        repos: Vec<PathBuf>,
        events: Sender<FetchEvent>,
    ) -> Result<JoinHandle<()>, FetchError> {
        let guard = self.try_begin()?;
        let orchestrator = self.clone();

        Ok(std::thread::spawn(move || {
            let results = orchestrator.run_pass(&repos, |index, total, path| {
                let _ = events.send(FetchEvent::Progress {
                    index,
                    total,
                    name: display_name(path),
                    path: path.to_path_buf(),
                });
            });
            drop(guard);
            let summary = summarize(&results);
            if events.send(FetchEvent::Completed { results, summary }).is_err() {
                debug!("Fetch event receiver dropped before completion");
            }
        }))
    }

    fn run_pass<F>(&self, repos: &[PathBuf], mut on_progress: F) -> FetchResults
    where
        F: FnMut(usize, usize, &Path),
    {
        let total = repos.len();
        info!("Fetching {} repositories", total);

        let mut results = FetchResults::with_capacity(total);
        for (index, path) in repos.iter().enumerate() {
            on_progress(index + 1, total, path);
            results.insert(path.clone(), self.fetch_one(path));
        }

        self.store.replace(results.clone());
        results
    }

    /// Run `git fetch --all` in one repository.
    pub fn fetch_one(&self, repo_path: &Path) -> FetchOutcome {
        debug!("Fetching repository: {}", repo_path.display());
        match self.runner.run(repo_path, FETCH_ALL, FETCH_TIMEOUT) {
            Ok(output) if output.succeeded() => FetchOutcome::success(repo_path),
            Ok(output) => {
                let message = [output.stderr.trim(), output.stdout.trim()]
                    .into_iter()
                    .find(|text| !text.is_empty())
                    .unwrap_or("Unknown error")
                    .to_string();
                warn!("Failed to fetch {}: {}", repo_path.display(), message);
                FetchOutcome::failure(repo_path, message)
            }
            Err(CommandError::Timeout { timeout, .. }) => {
                warn!("Fetch timeout for {}", repo_path.display());
                FetchOutcome::failure(repo_path, format!("Timeout ({}s)", timeout.as_secs()))
            }
            Err(err) => {
                warn!("Could not run fetch in {}: {}", repo_path.display(), err);
                FetchOutcome::failure(repo_path, err.to_string())
            }
        }
    }
}

/// One-paragraph result of a pass, naming up to three failed repositories.
pub fn summarize(results: &FetchResults) -> String {
    let mut failures: Vec<&FetchOutcome> = results.values().filter(|o| !o.succeeded).collect();
    let succeeded = results.len() - failures.len();

    if failures.is_empty() {
        return format!("Fetch complete: {} repos updated", succeeded);
    }

    failures.sort_by_key(|o| (display_name(&o.path).to_lowercase(), o.path.clone()));

    let mut summary = format!(
        "Fetch complete: {} succeeded, {} failed",
        succeeded,
        failures.len()
    );
    for failure in failures.iter().take(SUMMARY_FAILURE_LIMIT) {
        summary.push_str(&format!("\n  - {}: {}", display_name(&failure.path), failure.message));
    }
    if failures.len() > SUMMARY_FAILURE_LIMIT {
        summary.push_str(&format!("\n  ... and {} more", failures.len() - SUMMARY_FAILURE_LIMIT));
    }
    summary
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};
    use crossbeam_channel::Receiver;

    fn setup(runner: ScriptedRunner) -> (FetchOrchestrator, Arc<ScriptedRunner>, ResultStore) {
        let runner = Arc::new(runner);
        let store = ResultStore::new();
        (FetchOrchestrator::new(runner.clone(), store.clone()), runner, store)
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/code/{}", n))).collect()
    }

    /// Holds each fetch until the test releases it.
    struct GatedRunner {
        gate: Receiver<()>,
    }

    impl CommandRunner for GatedRunner {
        fn run(
            &self,
            _cwd: &Path,
            _argv: &[&str],
            _timeout: Duration,
        ) -> Result<CommandOutput, CommandError> {
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            Ok(CommandOutput::default())
        }
    }

    #[test]
    fn test_fetch_all_records_each_outcome() {
        // Fails only in the `broken` checkout
        struct ByPath;
        impl CommandRunner for ByPath {
            fn run(
                &self,
                cwd: &Path,
                _argv: &[&str],
                _timeout: Duration,
            ) -> Result<CommandOutput, CommandError> {
                if cwd.ends_with("broken") {
                    Ok(CommandOutput::failure(
                        128,
                        "fatal: could not read from remote repository\n",
                    ))
                } else {
                    Ok(CommandOutput::default())
                }
            }
        }

        let store = ResultStore::new();
        let orchestrator = FetchOrchestrator::new(Arc::new(ByPath), store.clone());
        let repos = paths(&["good", "broken"]);
        let mut progress = Vec::new();

        let results = orchestrator
            .fetch_all(&repos, |index, total, path| {
                progress.push((index, total, path.to_path_buf()))
            })
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[&repos[0]].succeeded);
        assert!(!results[&repos[1]].succeeded);
        assert_eq!(results[&repos[1]].message, "fatal: could not read from remote repository");
        assert_eq!(
            progress,
            vec![(1, 2, repos[0].clone()), (2, 2, repos[1].clone())]
        );
        assert_eq!(store.len(), 2);
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_fetch_uses_fetch_all_with_long_timeout() {
        let (orchestrator, runner, _) = setup(ScriptedRunner::new());
        let repos = paths(&["a"]);
        orchestrator.fetch_all(&repos, |_, _, _| {}).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command(), "git fetch --all");
        assert_eq!(calls[0].cwd, repos[0]);
    }

    #[test]
    fn test_failure_message_fallbacks() {
        let (orchestrator, _, _) = setup(
            ScriptedRunner::new().respond(
                "fetch",
                CommandOutput {
                    exit_code: 1,
                    stdout: "remote said no\n".to_string(),
                    stderr: "  \n".to_string(),
                },
            ),
        );
        let outcome = orchestrator.fetch_one(Path::new("/code/a"));
        assert_eq!(outcome.message, "remote said no");

        let (orchestrator, _, _) =
            setup(ScriptedRunner::new().respond("fetch", CommandOutput::failure(1, "")));
        let outcome = orchestrator.fetch_one(Path::new("/code/a"));
        assert_eq!(outcome, FetchOutcome::failure("/code/a", "Unknown error"));
    }

    #[test]
    fn test_timeout_and_launch_failure() {
        let (orchestrator, _, _) = setup(ScriptedRunner::new().timeout("fetch"));
        let outcome = orchestrator.fetch_one(Path::new("/code/slow"));
        assert_eq!(outcome, FetchOutcome::failure("/code/slow", "Timeout (30s)"));

        let (orchestrator, _, _) =
            setup(ScriptedRunner::new().launch_failure("fetch", "No such file or directory"));
        let outcome = orchestrator.fetch_one(Path::new("/code/gone"));
        assert!(!outcome.succeeded);
        assert!(outcome.message.contains("No such file or directory"));
    }

    #[test]
    fn test_store_is_replaced_not_merged() {
        let (orchestrator, _, store) = setup(ScriptedRunner::new());
        orchestrator.fetch_all(&paths(&["old"]), |_, _, _| {}).unwrap();
        orchestrator.fetch_all(&paths(&["new"]), |_, _, _| {}).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get(Path::new("/code/new")).is_some());
    }

    #[test]
    fn test_spawned_pass_reports_over_channel() {
        let (orchestrator, _, store) = setup(ScriptedRunner::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        let repos = paths(&["one", "two"]);

        let handle = orchestrator.spawn(repos.clone(), tx).unwrap();
        handle.join().unwrap();

        let events: Vec<FetchEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            FetchEvent::Progress { index: 1, total: 2, name, .. } if name == "one"
        ));
        match &events[2] {
            FetchEvent::Completed { results, summary } => {
                assert_eq!(results.len(), 2);
                assert_eq!(summary, "Fetch complete: 2 repos updated");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(store.len(), 2);
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_second_pass_rejected_while_first_in_flight() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let store = ResultStore::new();
        let orchestrator =
            FetchOrchestrator::new(Arc::new(GatedRunner { gate: gate_rx }), store.clone());
        let (tx, rx) = crossbeam_channel::unbounded();
        let repos = paths(&["a", "b"]);

        let handle = orchestrator.spawn(repos.clone(), tx.clone()).unwrap();

        // The first progress event proves the pass holds the slot
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, FetchEvent::Progress { index: 1, .. }));
        assert!(orchestrator.is_running());

        assert_eq!(
            orchestrator.fetch_all(&paths(&["c"]), |_, _, _| {}),
            Err(FetchError::AlreadyRunning)
        );
        assert!(matches!(
            orchestrator.spawn(paths(&["c"]), tx),
            Err(FetchError::AlreadyRunning)
        ));

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        handle.join().unwrap();

        let completed = rx
            .try_iter()
            .find_map(|event| match event {
                FetchEvent::Completed { results, .. } => Some(results),
                _ => None,
            })
            .unwrap();
        let mut fetched: Vec<&PathBuf> = completed.keys().collect();
        fetched.sort();
        assert_eq!(fetched, vec![&repos[0], &repos[1]]);
        assert_eq!(store.len(), 2);
        assert!(!orchestrator.is_running());
        assert!(orchestrator.fetch_all(&[], |_, _, _| {}).is_ok());
    }

    #[test]
    fn test_summary_lists_three_failures_then_counts() {
        let mut results = FetchResults::new();
        for name in ["e", "D", "c", "b", "a"] {
            let path = PathBuf::from(format!("/code/{}", name));
            results.insert(path.clone(), FetchOutcome::failure(&path, format!("{} failed", name)));
        }
        let ok = PathBuf::from("/code/ok");
        results.insert(ok.clone(), FetchOutcome::success(&ok));

        let summary = summarize(&results);
        assert_eq!(
            summary,
            "Fetch complete: 1 succeeded, 5 failed\n  - a: a failed\n  - b: b failed\n  \
             - c: c failed\n  ... and 2 more"
        );
    }

    #[test]
    fn test_summary_without_failures() {
        assert_eq!(summarize(&FetchResults::new()), "Fetch complete: 0 repos updated");
    }
}
