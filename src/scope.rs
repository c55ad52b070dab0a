//! Ambient repository-scope detection
//!
//! "Current repository" scope is resolved by walking up from the working
//! directory to a `.git` directory and normalizing its `origin` remote into
//! `host/owner/repo`. The RPC layer calls this at request entry when the
//! caller supplies no scope; it is never persisted as store state.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

static SSH_REMOTE: Lazy<Regex> = Lazy::new(|| {
    // git@github.com:owner/repo.git
    Regex::new(r"^(?:ssh://)?(?:[\w.-]+@)?([\w.-]+)[:/]([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .expect("ssh remote pattern compiles")
});

static HTTP_REMOTE: Lazy<Regex> = Lazy::new(|| {
    // https://github.com/owner/repo.git
    Regex::new(r"^https?://(?:[\w.-]+@)?([\w.-]+)(?::\d+)?/([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .expect("http remote pattern compiles")
});

static CONFIG_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*url\s*=\s*(.+?)\s*$"#).expect("config url pattern compiles"));

/// Detect the repository scope for a directory, walking parents as needed
pub fn detect_scope(start_dir: &Path) -> Option<String> {
    let mut dir = Some(start_dir);
    while let Some(current) = dir {
        let config_path = current.join(".git").join("config");
        if config_path.is_file() {
            let config = std::fs::read_to_string(&config_path).ok()?;
            return scope_from_git_config(&config);
        }
        dir = current.parent();
    }
    None
}

/// Extract `host/owner/repo` from the first remote url in a git config
fn scope_from_git_config(config: &str) -> Option<String> {
    let url = CONFIG_URL.captures(config)?.get(1)?.as_str();
    normalize_remote_url(url)
}

/// Normalize a git remote url into `host/owner/repo`
pub fn normalize_remote_url(url: &str) -> Option<String> {
    let url = url.trim();
    for pattern in [&*HTTP_REMOTE, &*SSH_REMOTE] {
        if let Some(captures) = pattern.captures(url) {
            let host = captures.get(1)?.as_str();
            let owner = captures.get(2)?.as_str();
            let repo = captures.get(3)?.as_str();
            return Some(format!("{}/{}/{}", host, owner, repo));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_remote_forms() {
        assert_eq!(
            normalize_remote_url("https://github.com/acme/canopy.git"),
            Some("github.com/acme/canopy".to_string())
        );
        assert_eq!(
            normalize_remote_url("git@github.com:acme/phloem.git"),
            Some("github.com/acme/phloem".to_string())
        );
        assert_eq!(
            normalize_remote_url("ssh://git@gitlab.com/acme/deep.git"),
            Some("gitlab.com/acme/deep".to_string())
        );
        assert_eq!(
            normalize_remote_url("https://github.com/acme/no-suffix"),
            Some("github.com/acme/no-suffix".to_string())
        );
        assert_eq!(normalize_remote_url("not a url"), None);
    }

    #[test]
    fn reads_origin_from_git_config() {
        let config = r#"
[core]
	repositoryformatversion = 0
[remote "origin"]
	url = git@github.com:acme/phloem.git
	fetch = +refs/heads/*:refs/remotes/origin/*
"#;
        assert_eq!(
            scope_from_git_config(config),
            Some("github.com/acme/phloem".to_string())
        );
    }

    #[test]
    fn walks_up_to_find_repository() {
        let dir = tempfile::tempdir().unwrap();
        let git_dir = dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(
            git_dir.join("config"),
            "[remote \"origin\"]\n\turl = https://github.com/acme/canopy.git\n",
        )
        .unwrap();

        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(
            detect_scope(&nested),
            Some("github.com/acme/canopy".to_string())
        );
    }

    #[test]
    fn no_repository_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_scope(dir.path()), None);
    }
}
