use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the metadata entry that marks a repository root. It may be a
/// directory (plain clone) or a file (worktree, submodule).
pub const REPO_MARKER: &str = ".git";

pub fn is_repo_root(path: &Path) -> bool {
    path.join(REPO_MARKER).exists()
}

/// Find repository roots under each watch root, at most `max_depth` levels down.
///
/// The walk never descends into a repository and skips hidden directories.
/// Unreadable directories are logged and skipped. The result holds no
/// duplicates and no repository nested inside another, sorted
/// case-insensitively by directory name.
pub fn find_repos<P: AsRef<Path>>(roots: &[P], max_depth: usize) -> Vec<PathBuf> {
    let max_depth = max_depth.max(1);
    let mut found = HashSet::new();

    for root in roots {
        let root = root.as_ref();
        if !root.is_dir() {
            debug!("Skipping watch root {}: not a directory", root.display());
            continue;
        }
        walk_root(root, max_depth, &mut found);
    }

    let mut repos = drop_nested(found);
    repos.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)).then_with(|| a.cmp(b)));
    repos
}

fn walk_root(root: &Path, max_depth: usize, found: &mut HashSet<PathBuf>) {
    let mut worklist: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = worklist.pop() {
        if is_repo_root(&dir) {
            found.insert(canonical(&dir));
            continue;
        }

        if depth >= max_depth {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list directory {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            if is_hidden(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                worklist.push((path, depth + 1));
            }
        }
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Overlapping watch roots can reach a directory below an already reported
/// repository; keep only the outermost.
fn drop_nested(found: HashSet<PathBuf>) -> Vec<PathBuf> {
    found
        .iter()
        .filter(|path| !path.ancestors().skip(1).any(|ancestor| found.contains(ancestor)))
        .cloned()
        .collect()
}

fn sort_key(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase()
}
