//! Indexed search backend
//!
//! [`Zoekt`] wraps an index engine client. It knows which repositories the
//! index covers (through a background-refreshed [`list::ListCache`]), splits
//! a request into indexed and unindexed repositories, and runs the indexed
//! part against the engine.

pub mod list;
pub mod native;

pub use list::{ListCache, RefreshSettings};
pub use native::{EmptyIndex, IndexEngine, NativeQuery, NativeRepoList, to_native};

use crate::query::{Q, RepoSet, simplify};
use crate::search::refs::restrict_to_ref;
use crate::search::status::handle_error;
use crate::search::{
    FileMatch, Options, Repository, RepositoryStatus, SearchContext, SearchError, SearchResult,
    Searcher, Source, Stats, Status,
};
use async_trait::async_trait;
use native::NativeOptions;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Default bound on the list call made while splitting a request
pub const DEFAULT_SPLIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Repositories partitioned by backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    /// Covered by the index at the requested ref, `commit` filled from the
    /// indexed HEAD
    pub indexed: Vec<Repository>,
    /// Must be searched just in time
    pub unindexed: Vec<Repository>,
}

/// Indexed backend client
pub struct Zoekt {
    engine: Option<Arc<dyn IndexEngine>>,
    list: Option<Arc<ListCache>>,
    enabled: AtomicBool,
    split_timeout: Duration,
}

impl Zoekt {
    pub fn new(engine: Arc<dyn IndexEngine>, settings: RefreshSettings) -> Self {
        Self {
            list: Some(ListCache::new(engine.clone(), settings)),
            engine: Some(engine),
            enabled: AtomicBool::new(true),
            split_timeout: DEFAULT_SPLIT_TIMEOUT,
        }
    }

    /// Backend without an engine; every repository goes just in time
    pub fn disabled() -> Self {
        Self {
            engine: None,
            list: None,
            enabled: AtomicBool::new(false),
            split_timeout: DEFAULT_SPLIT_TIMEOUT,
        }
    }

    pub fn with_split_timeout(mut self, timeout: Duration) -> Self {
        self.split_timeout = timeout;
        self
    }

    pub fn enabled(&self) -> bool {
        self.engine.is_some() && self.enabled.load(Ordering::Acquire)
    }

    /// Disabling stops the refresh loop; re-enabling lets the next list
    /// call start it again.
    pub fn set_enabled(&self, enabled: bool) {
        if self.engine.is_none() {
            return;
        }
        self.enabled.store(enabled, Ordering::Release);
        if let Some(list) = &self.list {
            if enabled {
                list.resume();
            } else {
                list.stop();
            }
        }
    }

    /// Every repository in the index
    pub async fn list_all(&self) -> Result<Arc<NativeRepoList>, SearchError> {
        match &self.list {
            Some(list) if self.enabled() => list.list_all().await,
            _ => Err(SearchError::IndexUnavailable {
                message: "index search is disabled".to_string(),
            }),
        }
    }

    /// Partition `opts.repositories` into repositories the index can serve
    /// and repositories that need a JIT search.
    ///
    /// Everything is unindexed when the backend is disabled or the query
    /// names a ref, since the index only covers default branches. A failed
    /// or timed out list call is returned as an error.
    pub async fn split_repositories(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<Split, SearchError> {
        let everything_unindexed = Split {
            indexed: Vec::new(),
            unindexed: opts.repositories.clone(),
        };
        if !self.enabled() || q.has_ref() {
            return Ok(everything_unindexed);
        }

        let list = ctx.with_timeout(self.split_timeout).run(self.list_all()).await?;
        let heads: FxHashMap<&str, &str> = list
            .repos
            .iter()
            .filter_map(|repo| repo.head_version().map(|v| (repo.name.as_str(), v)))
            .collect();

        let mut split = Split::default();
        for repo in &opts.repositories {
            let head = heads.get(repo.name.as_str());
            match head {
                Some(version) if repo.ref_pattern.is_empty() => split.indexed.push(Repository {
                    name: repo.name.clone(),
                    ref_pattern: String::new(),
                    commit: Some(version.to_string()),
                }),
                _ => split.unindexed.push(repo.clone()),
            }
        }
        Ok(split)
    }

    fn statuses(repos: &[Repository], status: Status) -> Vec<RepositoryStatus> {
        repos
            .iter()
            .map(|repo| RepositoryStatus {
                repository: repo.name.clone(),
                source: Source::TextIndexed,
                status,
            })
            .collect()
    }
}

impl fmt::Display for Zoekt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.enabled() {
            write!(f, "zoekt")
        } else {
            write!(f, "zoekt(disabled)")
        }
    }
}

impl Drop for Zoekt {
    fn drop(&mut self) {
        if let Some(list) = &self.list {
            list.stop();
        }
    }
}

#[async_trait]
impl Searcher for Zoekt {
    /// Search the default branch of `opts.repositories` in the index.
    /// Reports one status per requested repository.
    async fn search(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        let engine = match &self.engine {
            Some(engine) if self.enabled() => engine,
            _ => {
                return Err(SearchError::IndexUnavailable {
                    message: "index search is disabled".to_string(),
                });
            }
        };
        if opts.repositories.is_empty() {
            return Ok(SearchResult::default());
        }

        let scope = RepoSet {
            set: opts.repositories.iter().map(|r| r.name.clone()).collect(),
        };
        let scoped = simplify(Q::and(vec![Q::RepoSet(scope), restrict_to_ref(q.clone(), "")]));
        if scoped == Q::Const(false) {
            return Ok(SearchResult {
                files: Vec::new(),
                stats: Stats {
                    status: Self::statuses(&opts.repositories, Status::Searched),
                    ..Stats::default()
                },
            });
        }

        let native = to_native(&scoped)?;
        let native_opts = NativeOptions::from(opts);
        debug!(options = %native_opts, repos = opts.repositories.len(), "index search");

        let found = match ctx.run(engine.search(&native, &native_opts)).await {
            Ok(found) => found,
            Err(err) => {
                let Some(first) = opts.repositories.first() else {
                    return Err(err);
                };
                // classification does not depend on the repository
                return match handle_error(Source::TextIndexed, &first.name, Some(err.clone()))? {
                    Some(classified) => Ok(SearchResult {
                        files: Vec::new(),
                        stats: Stats {
                            status: Self::statuses(&opts.repositories, classified.status),
                            ..Stats::default()
                        },
                    }),
                    None => Err(err),
                };
            }
        };

        let limit_hit =
            opts.total_max_match_count > 0 && found.match_count >= opts.total_max_match_count;
        let status = if limit_hit {
            Status::LimitHit
        } else {
            Status::Searched
        };

        let files: Vec<FileMatch> = found
            .files
            .into_iter()
            .map(|file| FileMatch {
                repository: file.repository,
                commit: Some(file.version),
                path: file.path,
                line_matches: file.line_matches,
            })
            .collect();

        Ok(SearchResult {
            stats: Stats {
                match_count: found.match_count,
                file_count: files.len(),
                status: Self::statuses(&opts.repositories, status),
                unavailable: Vec::new(),
            },
            files,
        })
    }

    fn close(&self) {
        if let Some(list) = &self.list {
            list.stop();
        }
    }
}
