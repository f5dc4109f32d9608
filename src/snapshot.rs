use crate::git::{RepoInspector, RepoReport, RepoState};
use crate::scan;
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::info;

/// Number of repositories in each display state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub clean: usize,
    pub stashed: usize,
    pub changes: usize,
    pub errors: usize,
}

impl StateCounts {
    pub fn tally<'a>(reports: impl IntoIterator<Item = &'a RepoReport>) -> Self {
        let mut counts = Self::default();
        for report in reports {
            match report.state() {
                RepoState::Clean => counts.clean += 1,
                RepoState::Stashed => counts.stashed += 1,
                RepoState::Changes => counts.changes += 1,
                RepoState::Error => counts.errors += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.clean + self.stashed + self.changes + self.errors
    }
}

/// Everything the renderer needs from one discovery pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Ordered by owner, then name, case-insensitively.
    pub repos: Vec<RepoReport>,
    pub counts: StateCounts,
}

impl Snapshot {
    pub fn new(mut repos: Vec<RepoReport>) -> Self {
        sort_for_display(&mut repos);
        let counts = StateCounts::tally(&repos);
        Self { repos, counts }
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }
}

pub fn sort_for_display(repos: &mut [RepoReport]) {
    repos.sort_by_cached_key(|report| {
        (
            report.remote_owner().to_lowercase(),
            report.name().to_lowercase(),
            report.path().to_path_buf(),
        )
    });
}

/// Discovery plus inspection over a fixed set of watch roots.
#[derive(Clone)]
pub struct Scanner {
    roots: Vec<PathBuf>,
    max_depth: usize,
    inspector: RepoInspector,
}

impl Scanner {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize, inspector: RepoInspector) -> Self {
        Self {
            roots,
            max_depth,
            inspector,
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn discover(&self) -> Vec<PathBuf> {
        scan::find_repos(&self.roots, self.max_depth)
    }

    /// Walk the roots and inspect every repository found.
    ///
    /// Each repository is inspected independently; one failing never affects
    /// the others.
    pub fn scan_all(&self) -> Snapshot {
        let repos = self.discover();
        let fetched = self.inspector.store().snapshot();

        let reports: Vec<RepoReport> = repos
            .par_iter()
            .map(|path| self.inspector.inspect_with(path, &fetched))
            .collect();

        let snapshot = Snapshot::new(reports);
        info!(
            "Scanned {} repositories ({} clean, {} stashed, {} with changes, {} errors)",
            snapshot.len(),
            snapshot.counts.clean,
            snapshot.counts.stashed,
            snapshot.counts.changes,
            snapshot.counts.errors
        );
        snapshot
    }
}
