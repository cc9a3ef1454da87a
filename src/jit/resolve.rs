//! Commit resolution

use crate::search::{SearchContext, SearchError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Marker file present while a repository is still being cloned
pub const CLONING_MARKER: &str = ".textsearch-cloning";

/// Resolves a ref spec to a commit id
#[async_trait]
pub trait CommitResolver: Send + Sync {
    /// An empty `spec` means the default branch
    async fn resolve(
        &self,
        ctx: &SearchContext,
        repo: &str,
        spec: &str,
    ) -> Result<String, SearchError>;
}

/// Resolves commits of git repositories checked out under a root directory
/// (`<root>/<repo name>`).
#[derive(Debug, Clone)]
pub struct GitResolver {
    root: PathBuf,
}

impl GitResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory of `repo`, refusing names that would escape the root
    fn repo_dir(&self, repo: &str) -> Option<PathBuf> {
        let relative = Path::new(repo);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        (clean && !repo.is_empty()).then(|| self.root.join(relative))
    }
}

#[async_trait]
impl CommitResolver for GitResolver {
    async fn resolve(
        &self,
        ctx: &SearchContext,
        repo: &str,
        spec: &str,
    ) -> Result<String, SearchError> {
        let not_found = |clone_in_progress| SearchError::RepoNotFound {
            repo: repo.to_string(),
            clone_in_progress,
        };
        let revision_missing = || SearchError::RevisionNotFound {
            repo: repo.to_string(),
            spec: spec.to_string(),
        };

        let dir = self.repo_dir(repo).ok_or_else(|| not_found(false))?;
        if tokio::fs::try_exists(dir.join(CLONING_MARKER))
            .await
            .unwrap_or(false)
        {
            return Err(not_found(true));
        }
        if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Err(not_found(false));
        }

        let spec_or_head = if spec.is_empty() { "HEAD" } else { spec };
        if spec_or_head.starts_with('-') {
            return Err(revision_missing());
        }

        let mut command = Command::new("git");
        command
            .arg("-C")
            .arg(&dir)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", spec_or_head))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = ctx
            .run(async {
                command
                    .output()
                    .await
                    .map_err(|e| SearchError::internal(format!("failed to run git: {}", e)))
            })
            .await?;

        if !output.status.success() {
            debug!(repo, spec = spec_or_head, "revision not found");
            return Err(revision_missing());
        }

        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Err(revision_missing());
        }
        Ok(commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_dir_rejects_escapes() {
        let resolver = GitResolver::new("/srv/repos");
        assert_eq!(
            resolver.repo_dir("github.com/a/b"),
            Some(PathBuf::from("/srv/repos/github.com/a/b"))
        );
        assert_eq!(resolver.repo_dir("../etc"), None);
        assert_eq!(resolver.repo_dir("/etc"), None);
        assert_eq!(resolver.repo_dir(""), None);
    }

    #[tokio::test]
    async fn test_missing_repository() {
        let root = tempfile::tempdir().unwrap();
        let resolver = GitResolver::new(root.path());
        let err = resolver
            .resolve(&SearchContext::new(), "nope", "")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SearchError::RepoNotFound {
                repo: "nope".to_string(),
                clone_in_progress: false
            }
        );
    }

    #[tokio::test]
    async fn test_clone_in_progress() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("cloning");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join(CLONING_MARKER), b"").unwrap();

        let resolver = GitResolver::new(root.path());
        let err = resolver
            .resolve(&SearchContext::new(), "cloning", "")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::RepoNotFound {
                clone_in_progress: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_option_like_spec_rejected() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("r")).unwrap();
        let resolver = GitResolver::new(root.path());
        let err = resolver
            .resolve(&SearchContext::new(), "r", "--all")
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::RevisionNotFound { .. }));
    }
}
