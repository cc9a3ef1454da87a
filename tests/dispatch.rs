//! End-to-end dispatch tests.
//!
//! Each test starts loopback shard servers (one serving an in-memory index
//! engine, one serving a JIT searcher) and drives the `Text` router through
//! real RPC clients: parse, expand, split, resolve, pin, route, merge.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use textsearch::index::native::{
    NativeBranch, NativeFileMatch, NativeOptions, NativeRepo, NativeResult,
};
use textsearch::index::{IndexEngine, NativeQuery, NativeRepoList, RefreshSettings, Zoekt};
use textsearch::jit::{CommitResolver, HashRing, TextJit};
use textsearch::query::{RepoMatcher, expand_repo, parse};
use textsearch::search::{
    FileMatch, LineMatch, Options, Repository, SearchContext, SearchError, SearchResult, Searcher,
    Source, Stats, Status, Text, handle_error,
};
use textsearch::server::{RpcClient, ShardServer};
use tokio::net::TcpListener;

/// Index holding the default branch of a few repositories. Every search
/// returns one file per indexed repository in the query's scope.
struct MemoryIndex {
    heads: Vec<(&'static str, &'static str)>,
}

fn scope(q: &NativeQuery) -> BTreeSet<String> {
    match q {
        NativeQuery::RepoSet { repos } => repos.clone(),
        NativeQuery::And { children } => children.iter().flat_map(scope).collect(),
        _ => BTreeSet::new(),
    }
}

#[async_trait]
impl IndexEngine for MemoryIndex {
    async fn search(
        &self,
        q: &NativeQuery,
        _opts: &NativeOptions,
    ) -> Result<NativeResult, SearchError> {
        let scope = scope(q);
        let files: Vec<NativeFileMatch> = self
            .heads
            .iter()
            .filter(|(name, _)| scope.contains(*name))
            .map(|(name, version)| NativeFileMatch {
                repository: name.to_string(),
                branches: vec!["HEAD".to_string()],
                version: version.to_string(),
                path: "main.go".to_string(),
                line_matches: vec![LineMatch {
                    line_number: 1,
                    line: "package foo".to_string(),
                }],
            })
            .collect();
        Ok(NativeResult {
            match_count: files.len(),
            files,
        })
    }

    async fn list(&self, _q: &NativeQuery) -> Result<NativeRepoList, SearchError> {
        Ok(NativeRepoList {
            repos: self
                .heads
                .iter()
                .map(|(name, version)| NativeRepo {
                    name: name.to_string(),
                    branches: vec![NativeBranch {
                        name: "HEAD".to_string(),
                        version: version.to_string(),
                    }],
                })
                .collect(),
        })
    }
}

/// JIT shard: one file per request, at the commit it was pinned to
struct EchoShard;

impl fmt::Display for EchoShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "echo")
    }
}

#[async_trait]
impl Searcher for EchoShard {
    async fn search(
        &self,
        _ctx: &SearchContext,
        q: &textsearch::query::Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        let repo = opts
            .repositories
            .first()
            .ok_or_else(|| SearchError::internal("no repository"))?;
        Ok(SearchResult {
            files: vec![FileMatch {
                repository: repo.name.clone(),
                commit: repo.commit.clone(),
                path: "main.go".to_string(),
                line_matches: vec![LineMatch {
                    line_number: 1,
                    line: q.to_string(),
                }],
            }],
            stats: Stats {
                match_count: 1,
                file_count: 1,
                ..Stats::default()
            },
        })
    }
}

/// JIT shard that never finishes before the caller's deadline
struct SlowShard;

impl fmt::Display for SlowShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slow")
    }
}

#[async_trait]
impl Searcher for SlowShard {
    async fn search(
        &self,
        ctx: &SearchContext,
        _q: &textsearch::query::Q,
        _opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        ctx.run(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(SearchResult::default())
        })
        .await
    }
}

/// Resolves `repo` at `spec` to "<repo>-<spec>" unless a failure is set
#[derive(Default)]
struct Resolver {
    failures: FxHashMap<&'static str, SearchError>,
}

#[async_trait]
impl CommitResolver for Resolver {
    async fn resolve(
        &self,
        _ctx: &SearchContext,
        repo: &str,
        spec: &str,
    ) -> Result<String, SearchError> {
        match self.failures.get(repo) {
            Some(err) => Err(err.clone()),
            None => Ok(format!("{}-{}", repo, if spec.is_empty() { "head" } else { spec })),
        }
    }
}

async fn serve(server: Arc<ShardServer>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(listener));
    addr
}

async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn settings() -> RefreshSettings {
    RefreshSettings {
        background: false,
        ..RefreshSettings::default()
    }
}

/// Router over an index at `index_addr` and one JIT shard
async fn router(index_addr: Option<String>, resolver: Resolver) -> Text {
    let shard = serve(ShardServer::new(Arc::new(EchoShard), None)).await;
    let zoekt = match index_addr {
        Some(addr) => Zoekt::new(Arc::new(RpcClient::new(addr)), settings())
            .with_split_timeout(Duration::from_secs(2)),
        None => Zoekt::disabled(),
    };
    let jit = TextJit::new(Arc::new(HashRing::new([shard])), Arc::new(resolver));
    Text::new(Arc::new(zoekt), Arc::new(jit))
}

async fn index_addr() -> String {
    let index = MemoryIndex {
        heads: vec![("github.com/a/indexed", "v1")],
    };
    serve(ShardServer::new(
        Arc::new(EchoShard),
        Some(Arc::new(index)),
    ))
    .await
}

fn repos(names: &[&str]) -> Vec<Repository> {
    names.iter().map(|n| Repository::new(*n)).collect()
}

fn statuses(result: &SearchResult) -> Vec<(String, Source, Status)> {
    let mut out: Vec<_> = result
        .stats
        .status
        .iter()
        .map(|s| (s.repository.clone(), s.source, s.status))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn commits(result: &SearchResult) -> Vec<String> {
    let mut out: Vec<String> = result
        .files
        .iter()
        .map(|f| format!("{}@{}", f.repository, f.commit.as_deref().unwrap_or("-")))
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn test_split_between_index_and_jit() {
    let text = router(Some(index_addr().await), Resolver::default()).await;
    let opts = Options::for_repositories(repos(&["github.com/a/indexed", "github.com/b/fresh"]));

    let result = text
        .search(&SearchContext::new(), &parse("foo").unwrap(), &opts)
        .await
        .unwrap();

    assert_eq!(
        commits(&result),
        vec!["github.com/a/indexed@v1", "github.com/b/fresh@github.com/b/fresh-head"]
    );
    assert_eq!(
        statuses(&result),
        vec![
            ("github.com/a/indexed".to_string(), Source::TextIndexed, Status::Searched),
            ("github.com/b/fresh".to_string(), Source::TextJit, Status::Searched),
        ]
    );
    assert_eq!(result.stats.match_count, 2);
    assert!(result.stats.unavailable.is_empty());
}

#[tokio::test]
async fn test_ref_query_searches_every_repository_just_in_time() {
    let text = router(Some(index_addr().await), Resolver::default()).await;
    let opts = Options::for_repositories(repos(&["github.com/a/indexed", "github.com/b/fresh"]));

    let result = text
        .search(&SearchContext::new(), &parse("foo branch:dev").unwrap(), &opts)
        .await
        .unwrap();

    assert_eq!(
        commits(&result),
        vec![
            "github.com/a/indexed@github.com/a/indexed-dev",
            "github.com/b/fresh@github.com/b/fresh-dev",
        ]
    );
    assert!(
        statuses(&result)
            .iter()
            .all(|(_, source, status)| *source == Source::TextJit && *status == Status::Searched)
    );
    // the shard received the query pinned to the resolved commit
    let line = &result.files[0].line_matches[0].line;
    assert!(line.contains("branch:\"github.com/"), "{line}");
    assert!(!line.contains("branch:\"dev\""), "{line}");
}

#[tokio::test]
async fn test_unreachable_index_falls_back_to_jit() {
    let text = router(Some(dead_addr().await), Resolver::default()).await;
    let opts = Options::for_repositories(repos(&["github.com/a/indexed"]));

    let result = text
        .search(&SearchContext::new(), &parse("foo").unwrap(), &opts)
        .await
        .unwrap();

    assert_eq!(result.stats.unavailable, vec![Source::TextIndexed]);
    assert_eq!(
        statuses(&result),
        vec![("github.com/a/indexed".to_string(), Source::TextJit, Status::Searched)]
    );
}

#[tokio::test]
async fn test_wall_time_times_out_jit_but_keeps_indexed_results() {
    let slow = serve(ShardServer::new(Arc::new(SlowShard), None)).await;
    let zoekt = Zoekt::new(Arc::new(RpcClient::new(index_addr().await)), settings());
    let jit = TextJit::new(Arc::new(HashRing::new([slow])), Arc::new(Resolver::default()));
    let text = Text::new(Arc::new(zoekt), Arc::new(jit));
    let opts = Options {
        max_wall_time: Some(Duration::from_millis(500)),
        ..Options::for_repositories(repos(&[
            "github.com/a/indexed",
            "github.com/b/fresh",
            "github.com/c/fresh",
        ]))
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        text.search(&SearchContext::new(), &parse("foo").unwrap(), &opts),
    )
    .await
    .expect("search must end at its wall time")
    .unwrap();

    assert_eq!(commits(&result), vec!["github.com/a/indexed@v1"]);
    assert_eq!(
        statuses(&result),
        vec![
            ("github.com/a/indexed".to_string(), Source::TextIndexed, Status::Searched),
            ("github.com/b/fresh".to_string(), Source::TextJit, Status::TimedOut),
            ("github.com/c/fresh".to_string(), Source::TextJit, Status::TimedOut),
        ]
    );
}

#[tokio::test]
async fn test_resolution_failures_become_statuses() {
    let mut resolver = Resolver::default();
    resolver.failures.insert(
        "cloning",
        SearchError::RepoNotFound {
            repo: "cloning".to_string(),
            clone_in_progress: true,
        },
    );
    resolver.failures.insert(
        "gone",
        SearchError::RepoNotFound {
            repo: "gone".to_string(),
            clone_in_progress: false,
        },
    );
    resolver.failures.insert(
        "no-dev",
        SearchError::RevisionNotFound {
            repo: "no-dev".to_string(),
            spec: String::new(),
        },
    );
    let text = router(None, resolver).await;
    let opts = Options::for_repositories(repos(&["cloning", "gone", "no-dev", "ok"]));

    let result = text
        .search(&SearchContext::new(), &parse("foo").unwrap(), &opts)
        .await
        .unwrap();

    assert_eq!(
        statuses(&result),
        vec![
            ("cloning".to_string(), Source::TextJit, Status::Cloning),
            ("gone".to_string(), Source::TextJit, Status::Missing),
            ("no-dev".to_string(), Source::TextJit, Status::CommitMissing),
            ("ok".to_string(), Source::TextJit, Status::Searched),
        ]
    );
    assert_eq!(commits(&result), vec!["ok@ok-head"]);
}

#[tokio::test]
async fn test_unclassified_failure_fails_the_search() {
    let mut resolver = Resolver::default();
    resolver
        .failures
        .insert("broken", SearchError::internal("disk on fire"));
    let text = router(None, resolver).await;
    let opts = Options::for_repositories(repos(&["a", "broken", "c"]));

    let err = text
        .search(&SearchContext::new(), &parse("foo").unwrap(), &opts)
        .await
        .unwrap_err();
    assert_eq!(err, SearchError::internal("disk on fire"));
}

#[tokio::test]
async fn test_no_searchers_is_an_error() {
    let jit = TextJit::new(
        Arc::new(HashRing::new(Vec::<String>::new())),
        Arc::new(Resolver::default()),
    );
    let text = Text::new(Arc::new(Zoekt::disabled()), Arc::new(jit));
    let opts = Options::for_repositories(repos(&["a"]));

    let err = text
        .search(&SearchContext::new(), &parse("foo").unwrap(), &opts)
        .await
        .unwrap_err();
    assert_eq!(err, SearchError::NoEndpoints);
}

#[tokio::test]
async fn test_display_limit_keeps_counts() {
    let text = router(None, Resolver::default()).await;
    let opts = Options {
        max_doc_display_count: 1,
        ..Options::for_repositories(repos(&["a", "b", "c"]))
    };

    let result = text
        .search(&SearchContext::new(), &parse("foo").unwrap(), &opts)
        .await
        .unwrap();
    assert_eq!(result.files.len(), 1);
    assert_eq!(result.stats.match_count, 3);
    assert_eq!(result.stats.status.len(), 3);
}

#[tokio::test]
async fn test_repo_filter_is_expanded_before_dispatch() {
    let text = router(None, Resolver::default()).await;
    let universe = ["github.com/a/one", "github.com/a/two", "github.com/b/three"];
    let matcher = RepoMatcher::new(universe);

    let q = parse("repo:github.com/a/ -repo:two foo").unwrap();
    let q = expand_repo(q, |inc, exc| matcher.list(inc, exc)).unwrap();
    let opts = Options::for_repositories(repos(&universe));

    let result = text.search(&SearchContext::new(), &q, &opts).await.unwrap();
    assert_eq!(commits(&result), vec!["github.com/a/one@github.com/a/one-head"]);
    // excluded repositories pin to FALSE and are reported without a shard call
    assert_eq!(result.stats.status.len(), 3);
    assert!(result.stats.status.iter().all(|s| s.status == Status::Searched));
}

#[test]
fn test_cancellation_is_not_a_repository_status() {
    assert_eq!(
        handle_error(Source::TextJit, "a", Some(SearchError::Canceled)),
        Ok(None)
    );
    let timed_out = handle_error(Source::TextJit, "a", Some(SearchError::Timeout))
        .unwrap()
        .unwrap();
    assert_eq!(timed_out.status, Status::TimedOut);
}
