use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Result of fetching one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub succeeded: bool,
    pub message: String,
}

impl FetchOutcome {
    pub fn success(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            succeeded: true,
            message: "Success".to_string(),
        }
    }

    pub fn failure(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            succeeded: false,
            message: message.into(),
        }
    }

    pub fn status(&self) -> FetchStatus {
        if self.succeeded {
            FetchStatus::Success
        } else {
            FetchStatus::Failed
        }
    }
}

/// Last fetch result as shown next to a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Failed,
}

pub type FetchResults = HashMap<PathBuf, FetchOutcome>;

/// Most recent fetch outcomes, shared between the fetch thread and the
/// discovery pass.
///
/// Writers swap in a whole new mapping, so a reader holding a
/// [`snapshot`](Self::snapshot) always sees one complete pass.
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    inner: Arc<RwLock<Arc<FetchResults>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every stored outcome with `results`.
    pub fn replace(&self, results: FetchResults) {
        let fresh = Arc::new(results);
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn snapshot(&self) -> Arc<FetchResults> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get(&self, path: &Path) -> Option<FetchOutcome> {
        self.snapshot().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
