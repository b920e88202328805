//! Change filters attached to triggers.

use cascade_core::change::{SourceMetadata, repository_name_from_url};
use cascade_core::flow::TriggerDefinition;

/// Predicate deciding whether a change may start a builder through a trigger.
pub trait ChangeFilter: Send + Sync {
    fn matches(&self, repository: &str, branch: &str, target_branch: Option<&str>) -> bool;

    fn matches_source(&self, source: &SourceMetadata) -> bool {
        self.matches(
            &source.repository,
            &source.branch,
            source.target_branch.as_deref(),
        )
    }
}

impl<F> ChangeFilter for F
where
    F: Fn(&str, &str, Option<&str>) -> bool + Send + Sync,
{
    fn matches(&self, repository: &str, branch: &str, target_branch: Option<&str>) -> bool {
        self(repository, branch, target_branch)
    }
}

/// Filter built from a trigger's `repositories` / `branches` settings.
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    repositories: Vec<String>,
    branches: Vec<String>,
    branches_ignore: Vec<String>,
}

impl BranchFilter {
    pub fn new(
        repositories: Vec<String>,
        branches: Vec<String>,
        branches_ignore: Vec<String>,
    ) -> Self {
        Self {
            repositories,
            branches,
            branches_ignore,
        }
    }

    pub fn from_definition(def: &TriggerDefinition) -> Self {
        Self::new(
            def.repositories.clone(),
            def.branches.clone(),
            def.branches_ignore.clone(),
        )
    }

    fn repository_matches(&self, repository: &str) -> bool {
        if self.repositories.is_empty() {
            return true;
        }
        let name = repository_name_from_url(repository);
        self.repositories.iter().any(|r| r == name)
    }

    fn branch_matches(&self, branch: &str) -> bool {
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        let included =
            self.branches.is_empty() || self.branches.iter().any(|p| glob_match(p, branch));
        included && !self.branches_ignore.iter().any(|p| glob_match(p, branch))
    }
}

impl ChangeFilter for BranchFilter {
    fn matches(&self, repository: &str, branch: &str, target_branch: Option<&str>) -> bool {
        // Pull requests are filtered by the branch they merge into.
        self.repository_matches(repository) && self.branch_matches(target_branch.unwrap_or(branch))
    }
}

fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(&format!("{}/", prefix));
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if let Some(rest) = text.strip_prefix(&prefix_slash) {
            return !rest.is_empty() && !rest.contains('/');
        }
        return false;
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.len() >= parts[0].len() + parts[1].len()
                && text.starts_with(parts[0])
                && text.ends_with(parts[1]);
        }
    }
    pattern == text
}
