//! Owner and repository name extraction from a remote URL.

/// Owner shown when the repository has no primary remote.
pub const NO_REMOTE_OWNER: &str = "N/A";

/// Owner shown for remotes that are not hosted URLs, such as local paths.
pub const LOCAL_OWNER: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    pub owner: String,
    /// `None` when the URL carries no usable name; callers fall back to the
    /// directory name.
    pub name: Option<String>,
}

/// Parse `git@host:owner/repo.git`, `https://host/owner/repo.git` and
/// anything else `git remote get-url` may print.
///
/// Never fails: unrecognised input degrades to the `local` owner.
pub fn parse_remote_url(url: &str) -> RemoteInfo {
    let url = url.trim();
    if url.is_empty() {
        return RemoteInfo {
            owner: NO_REMOTE_OWNER.to_string(),
            name: None,
        };
    }

    if url.contains("://") {
        return parse_scheme_url(url);
    }

    if let Some(path) = scp_path(url) {
        return parse_scp_path(path);
    }

    let owner = match url.split_once('/') {
        Some((head, _)) if !head.is_empty() => head.to_string(),
        _ => LOCAL_OWNER.to_string(),
    };
    RemoteInfo { owner, name: None }
}

/// `scheme://host/owner/repo[.git]`
fn parse_scheme_url(url: &str) -> RemoteInfo {
    let segments: Vec<&str> = url.trim_end_matches('/').split('/').collect();
    let name = segments.last().map(|s| strip_git_suffix(s)).filter(|s| !s.is_empty());
    let owner = if segments.len() >= 2 {
        segments[segments.len() - 2].to_string()
    } else {
        LOCAL_OWNER.to_string()
    };
    RemoteInfo { owner, name }
}

/// The path part of an SCP-style `user@host:path`, if `url` has that shape.
fn scp_path(url: &str) -> Option<&str> {
    let (authority, path) = url.split_once(':')?;
    if authority.contains('@') && !authority.contains('/') {
        Some(path)
    } else {
        None
    }
}

fn parse_scp_path(path: &str) -> RemoteInfo {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let owner = segments.first().copied().unwrap_or_default().to_string();
    let name = if segments.len() >= 2 {
        segments
            .last()
            .map(|s| strip_git_suffix(s))
            .filter(|s| !s.is_empty())
    } else {
        None
    };
    RemoteInfo { owner, name }
}

fn strip_git_suffix(segment: &str) -> String {
    segment.strip_suffix(".git").unwrap_or(segment).to_string()
}
