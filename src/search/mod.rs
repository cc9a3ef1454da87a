//! Search execution
//!
//! Types shared by every backend plus the dispatch machinery:
//! - [`Searcher`]: anything that can run a query (index, JIT, RPC, router)
//! - [`sharded::sharded_search`]: fan-out/fan-in over a stream of shards
//! - [`status::handle_error`]: per-repository failure classification
//! - [`refs`]: ref expansion and per-repository commit pinning
//! - [`text::Text`]: routes each repository to the index or the JIT backend

pub mod context;
pub mod refs;
pub mod sharded;
pub mod status;
pub mod text;

pub use context::SearchContext;
pub use sharded::{Shard, StaticSearcher, sharded_search};
pub use status::handle_error;
pub use text::Text;

use crate::query::{ParseError, Q};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while planning or executing a search
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("repository {repo} not found{}", cloning_suffix(.clone_in_progress))]
    RepoNotFound { repo: String, clone_in_progress: bool },

    #[error("revision {spec:?} not found in {repo}")]
    RevisionNotFound { repo: String, spec: String },

    #[error("operation timed out")]
    Timeout,

    #[error("temporary failure: {message}")]
    Temporary { message: String },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("search canceled")]
    Canceled,

    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("no search endpoints available")]
    NoEndpoints,

    #[error("index unavailable: {message}")]
    IndexUnavailable { message: String },

    #[error("rpc error: {message}")]
    Rpc { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

fn cloning_suffix(clone_in_progress: &bool) -> &'static str {
    if *clone_in_progress {
        " (clone in progress)"
    } else {
        ""
    }
}

impl SearchError {
    /// Conditions worth retrying later; reported as a timeout
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout | SearchError::Temporary { .. } | SearchError::DeadlineExceeded
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SearchError::Internal {
            message: message.into(),
        }
    }
}

/// Which backend produced a status or went unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "textindexed")]
    TextIndexed,
    #[serde(rename = "textjit")]
    TextJit,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::TextIndexed => write!(f, "textindexed"),
            Source::TextJit => write!(f, "textjit"),
        }
    }
}

/// Outcome of searching one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Searched,
    Missing,
    Cloning,
    CommitMissing,
    TimedOut,
    LimitHit,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Searched => "searched",
            Status::Missing => "missing",
            Status::Cloning => "cloning",
            Status::CommitMissing => "commit missing",
            Status::TimedOut => "timed out",
            Status::LimitHit => "limit hit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub repository: String,
    pub source: Source,
    pub status: Status,
}

/// A matching line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMatch {
    pub line_number: u32,
    pub line: String,
}

/// A matching file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatch {
    pub repository: String,
    /// Commit the file was read at, when the backend knows it
    pub commit: Option<String>,
    pub path: String,
    /// Empty for file-name matches
    pub line_matches: Vec<LineMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub match_count: usize,
    pub file_count: usize,
    /// One entry per repository, in completion order
    pub status: Vec<RepositoryStatus>,
    /// Backends that could not be consulted
    pub unavailable: Vec<Source>,
}

impl Stats {
    pub fn add(&mut self, other: Stats) {
        self.match_count += other.match_count;
        self.file_count += other.file_count;
        self.status.extend(other.status);
        self.unavailable.extend(other.unavailable);
    }
}

/// Merged result of a search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Arrival order; not ranked across shards
    pub files: Vec<FileMatch>,
    pub stats: Stats,
}

impl SearchResult {
    /// Result carrying a single repository status and no files
    pub fn with_status(status: RepositoryStatus) -> Self {
        Self {
            files: Vec::new(),
            stats: Stats {
                status: vec![status],
                ..Stats::default()
            },
        }
    }

    /// Merge another partial result into this one
    pub fn add(&mut self, other: SearchResult) {
        self.files.extend(other.files);
        self.stats.add(other.stats);
    }

    /// Keep at most `limit` files for display. Zero means no limit.
    /// Stats are left untouched so counts still describe the full search.
    pub fn truncate_display(&mut self, limit: usize) {
        if limit > 0 && self.files.len() > limit {
            self.files.truncate(limit);
        }
    }
}

/// A repository to search, optionally at a non-default ref
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    /// Empty means the default branch
    #[serde(default)]
    pub ref_pattern: String,
    /// Filled right before dispatch, never persisted
    #[serde(default)]
    pub commit: Option<String>,
}

impl Repository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn at_ref(name: impl Into<String>, ref_pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ref_pattern: ref_pattern.into(),
            commit: None,
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.ref_pattern.is_empty() {
            write!(f, "@{}", self.ref_pattern)?;
        }
        if let Some(commit) = &self.commit {
            write!(f, "#{}", commit)?;
        }
        Ok(())
    }
}

/// Execution options. Zero values mean "backend default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub total_max_match_count: usize,
    #[serde(default)]
    pub max_wall_time: Option<Duration>,
    #[serde(default)]
    pub max_doc_display_count: usize,
}

impl Options {
    pub fn for_repositories(repositories: Vec<Repository>) -> Self {
        Self {
            repositories,
            ..Self::default()
        }
    }

    /// Same limits, different repository subset
    pub fn scoped(&self, repositories: Vec<Repository>) -> Self {
        Self {
            repositories,
            ..self.clone()
        }
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.repositories.is_empty() {
            parts.push(format!("repositories={}", self.repositories.len()));
        }
        if self.total_max_match_count > 0 {
            parts.push(format!("total_max_match_count={}", self.total_max_match_count));
        }
        if let Some(wall) = self.max_wall_time {
            parts.push(format!("max_wall_time={:?}", wall));
        }
        if self.max_doc_display_count > 0 {
            parts.push(format!("max_doc_display_count={}", self.max_doc_display_count));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// A backend that can execute a query
#[async_trait]
pub trait Searcher: fmt::Display + Send + Sync {
    async fn search(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError>;

    /// Release held resources. Called once the searcher is no longer routable.
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(repo: &str, status: Status) -> RepositoryStatus {
        RepositoryStatus {
            repository: repo.to_string(),
            source: Source::TextJit,
            status,
        }
    }

    fn file(repo: &str, path: &str) -> FileMatch {
        FileMatch {
            repository: repo.to_string(),
            commit: None,
            path: path.to_string(),
            line_matches: Vec::new(),
        }
    }

    #[test]
    fn test_result_add_merges_everything() {
        let mut a = SearchResult {
            files: vec![file("a", "x.go")],
            stats: Stats {
                match_count: 2,
                file_count: 1,
                status: vec![status("a", Status::Searched)],
                unavailable: vec![],
            },
        };
        let b = SearchResult {
            files: vec![file("b", "y.go"), file("b", "z.go")],
            stats: Stats {
                match_count: 3,
                file_count: 2,
                status: vec![status("b", Status::LimitHit)],
                unavailable: vec![Source::TextIndexed],
            },
        };
        a.add(b);
        assert_eq!(a.files.len(), 3);
        assert_eq!(a.stats.match_count, 5);
        assert_eq!(a.stats.file_count, 3);
        assert_eq!(a.stats.status.len(), 2);
        assert_eq!(a.stats.unavailable, vec![Source::TextIndexed]);
    }

    #[test]
    fn test_stats_merge_commutes() {
        let left = Stats {
            match_count: 1,
            file_count: 1,
            status: vec![status("a", Status::Searched)],
            unavailable: vec![],
        };
        let right = Stats {
            match_count: 4,
            file_count: 2,
            status: vec![status("b", Status::Missing)],
            unavailable: vec![Source::TextIndexed],
        };

        let mut lr = left.clone();
        lr.add(right.clone());
        let mut rl = right;
        rl.add(left);

        assert_eq!(lr.match_count, rl.match_count);
        assert_eq!(lr.file_count, rl.file_count);
        let mut a = lr.status.clone();
        let mut b = rl.status.clone();
        a.sort_by(|x, y| x.repository.cmp(&y.repository));
        b.sort_by(|x, y| x.repository.cmp(&y.repository));
        assert_eq!(a, b);
    }

    #[test]
    fn test_truncate_display() {
        let mut result = SearchResult {
            files: vec![file("a", "1"), file("a", "2"), file("a", "3")],
            stats: Stats {
                file_count: 3,
                ..Stats::default()
            },
        };
        result.truncate_display(0);
        assert_eq!(result.files.len(), 3);
        result.truncate_display(2);
        assert_eq!(result.files.len(), 2);
        assert_eq!(result.stats.file_count, 3);
    }

    #[test]
    fn test_options_display() {
        assert_eq!(Options::default().to_string(), "");
        let opts = Options {
            repositories: vec![Repository::new("a"), Repository::new("b")],
            total_max_match_count: 100,
            max_wall_time: Some(Duration::from_millis(1500)),
            max_doc_display_count: 0,
        };
        assert_eq!(
            opts.to_string(),
            "repositories=2 total_max_match_count=100 max_wall_time=1.5s"
        );
    }

    #[test]
    fn test_repository_display() {
        let mut repo = Repository::at_ref("github.com/a/b", "dev");
        assert_eq!(repo.to_string(), "github.com/a/b@dev");
        repo.commit = Some("deadbeef".to_string());
        assert_eq!(repo.to_string(), "github.com/a/b@dev#deadbeef");
    }

    #[test]
    fn test_error_wire_roundtrip_keeps_variant() {
        let err = SearchError::RepoNotFound {
            repo: "a".to_string(),
            clone_in_progress: true,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: SearchError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert_eq!(back.to_string(), "repository a not found (clone in progress)");
    }

    #[test]
    fn test_temporary_classification() {
        assert!(SearchError::Timeout.is_temporary());
        assert!(SearchError::DeadlineExceeded.is_temporary());
        assert!(!SearchError::Canceled.is_temporary());
        assert!(!SearchError::internal("boom").is_temporary());
    }
}
