//! Inbound change events and the commit metadata propagated along a flow.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const PULL_REQUEST_PREFIX: &str = "refs/pull/";
const BRANCH_PREFIX: &str = "refs/heads/";

/// A commit or pull request detected by the change poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChangeEvent {
    pub repository: String,
    pub branch: String,
    #[serde(default)]
    pub target_branch: Option<String>,
    pub revision: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl ChangeEvent {
    pub fn source(&self) -> SourceMetadata {
        SourceMetadata {
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            target_branch: self.target_branch.clone(),
            revision: self.revision.clone(),
        }
    }

    pub fn is_pull_request(&self) -> bool {
        self.branch.starts_with(PULL_REQUEST_PREFIX)
    }

    /// Number of the pull request for `refs/pull/<n>/head` branches.
    pub fn pull_request_number(&self) -> Option<u64> {
        static PULL_REF: OnceLock<Option<Regex>> = OnceLock::new();
        let re = PULL_REF
            .get_or_init(|| Regex::new(r"^refs/pull/(\d+)/(head|merge)$").ok())
            .as_ref()?;
        re.captures(&self.branch)?.get(1)?.as_str().parse().ok()
    }
}

/// Commit metadata forwarded from a build to the builds it triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SourceMetadata {
    pub repository: String,
    pub branch: String,
    #[serde(default)]
    pub target_branch: Option<String>,
    pub revision: String,
}

impl SourceMetadata {
    /// Short repository name, whether `repository` is a URL or a bare name.
    pub fn repository_name(&self) -> &str {
        repository_name_from_url(&self.repository)
    }

    /// Branch used for filtering: the pull request target if any.
    pub fn effective_branch(&self) -> &str {
        let branch = self.target_branch.as_deref().unwrap_or(&self.branch);
        branch.strip_prefix(BRANCH_PREFIX).unwrap_or(branch)
    }

    /// `<repo>:<branch>:<revision>` descriptor handed to build stages.
    pub fn changed_repo(&self) -> String {
        format!(
            "{}:{}:{}",
            self.repository_name(),
            self.branch,
            self.revision
        )
    }
}

/// `https://github.com/org/product-configs.git` -> `product-configs`.
pub fn repository_name_from_url(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(branch: &str) -> ChangeEvent {
        ChangeEvent {
            repository: "https://github.com/Intel-Media-SDK/MediaSDK.git".to_string(),
            branch: branch.to_string(),
            target_branch: None,
            revision: "ef64b58af5988ed7762661e9591d10f593b55bcb".to_string(),
            category: None,
        }
    }

    #[test]
    fn test_repository_name_from_url() {
        assert_eq!(
            repository_name_from_url("https://github.com/Intel-Media-SDK/product-configs.git"),
            "product-configs"
        );
        assert_eq!(
            repository_name_from_url("git@github.com:intel/media-driver.git"),
            "media-driver"
        );
        assert_eq!(repository_name_from_url("libva"), "libva");
    }

    #[test]
    fn test_pull_request_detection() {
        let pr = change("refs/pull/1303/head");
        assert!(pr.is_pull_request());
        assert_eq!(pr.pull_request_number(), Some(1303));

        let push = change("master");
        assert!(!push.is_pull_request());
        assert_eq!(push.pull_request_number(), None);
    }

    #[test]
    fn test_changed_repo() {
        let source = change("refs/pull/1303/head").source();
        assert_eq!(
            source.changed_repo(),
            "MediaSDK:refs/pull/1303/head:ef64b58af5988ed7762661e9591d10f593b55bcb"
        );
    }

    #[test]
    fn test_effective_branch_prefers_target() {
        let mut source = change("refs/pull/7/head").source();
        source.target_branch = Some("release/2019".to_string());
        assert_eq!(source.effective_branch(), "release/2019");

        let source = change("refs/heads/master").source();
        assert_eq!(source.effective_branch(), "master");
    }
}
