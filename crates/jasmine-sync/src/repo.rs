//! Repository inspection commands and output parsing

/// Local `origin` URL
pub const GIT_REMOTE_URL: &str = "git remote get-url origin";
/// Staged and unstaged changes, one per line
pub const GIT_STATUS: &str = "git status --porcelain";
/// Current branch name
pub const GIT_BRANCH: &str = "git rev-parse --abbrev-ref HEAD";

/// Name the data-cache remote is registered under on the target
pub const DATA_CACHE_REMOTE: &str = "jasmine_remote";

/// Messages `dvc status` prints when nothing is out of date
const DATA_CACHE_CLEAN_MESSAGES: &[&str] = &[
    "Data and pipelines are up to date.",
    "There are no data or pipelines tracked in this project yet.",
];

/// Canonical form of a repository URL for comparison
///
/// `https://github.com/Org/Project.git`, `ssh://git@github.com:22/org/project`
/// and `git@github.com:org/project.git` all become `github.com/org/project`.
pub fn normalize_repo_url(url: &str) -> String {
    let mut rest = url.trim();
    let had_scheme = match rest.find("://") {
        Some(idx) => {
            rest = &rest[idx + 3..];
            true
        }
        None => false,
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let host = match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    };

    let joined = match host.split_once(':') {
        // ssh://host:22/path carries a port, scp-style host:path does not
        Some((name, _port)) if had_scheme => format!("{}{}", name, path),
        Some((name, scp_path)) => format!("{}/{}{}", name, scp_path, path),
        None => format!("{}{}", host, path),
    };

    let trimmed = joined.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.to_lowercase()
}

/// Whether `dvc status` output reports nothing to commit or push
pub fn is_data_cache_clean(output: &str) -> bool {
    let trimmed = output.trim();
    trimmed.is_empty()
        || DATA_CACHE_CLEAN_MESSAGES
            .iter()
            .any(|msg| trimmed.starts_with(msg.trim_end_matches('.')))
}

/// Prefix a command with the configured runner, e.g. `uv run dvc pull`
pub fn with_runner(runner: Option<&str>, command: &str) -> String {
    match runner.map(str::trim).filter(|r| !r.is_empty()) {
        Some(runner) => format!("{} {}", runner, command),
        None => command.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_equivalent_urls() {
        let expected = "github.com/org/project";
        assert_eq!(normalize_repo_url("https://github.com/Org/Project.git"), expected);
        assert_eq!(normalize_repo_url("git@github.com:org/project.git"), expected);
        assert_eq!(normalize_repo_url("ssh://git@github.com:22/org/project"), expected);
        assert_eq!(normalize_repo_url("https://user@github.com/org/project/"), expected);
        assert_eq!(normalize_repo_url("  github.com/org/project\n"), expected);
    }

    #[test]
    fn test_normalize_distinguishes_projects() {
        assert_ne!(
            normalize_repo_url("git@github.com:org/project.git"),
            normalize_repo_url("git@github.com:org/other.git")
        );
    }

    #[test]
    fn test_data_cache_clean() {
        assert!(is_data_cache_clean(""));
        assert!(is_data_cache_clean("Data and pipelines are up to date.\n"));
        assert!(is_data_cache_clean(
            "There are no data or pipelines tracked in this project yet.\nSee <https://dvc.org/doc/start>"
        ));
        assert!(!is_data_cache_clean("data.dvc:\n\tchanged outs:\n\t\tmodified: data"));
    }

    #[test]
    fn test_with_runner() {
        assert_eq!(with_runner(Some("uv run"), "dvc pull"), "uv run dvc pull");
        assert_eq!(with_runner(Some("  "), "dvc pull"), "dvc pull");
        assert_eq!(with_runner(None, "dvc pull"), "dvc pull");
    }
}
