//! Just-in-time search backend
//!
//! Searches repositories the index doesn't cover by sending one pinned
//! query per (repository, ref) to a searcher shard:
//!
//! 1. expand the requested repositories into (repository, ref) pairs
//! 2. for each pair, under a semaphore sized to the live shard count,
//!    resolve the commit, pin the query to it and route it to the shard
//!    the endpoint map picks for the repository
//! 3. merge through the sharded dispatcher
//!
//! One RPC client is cached per shard address. Clients for addresses that
//! left the endpoint set are closed on the next search that notices the
//! endpoint count changed.

pub mod endpoint;
pub mod resolve;

pub use endpoint::{EndpointMap, HashRing};
pub use resolve::{CommitResolver, GitResolver};

use crate::query::Q;
use crate::search::refs::{expand_for_repo_at_commit, expand_repo_refs};
use crate::search::status::status_result;
use crate::search::{
    Options, Repository, RepositoryStatus, SearchContext, SearchError, SearchResult, Searcher,
    Shard, Source, Status, sharded_search,
};
use crate::server::RpcClient;
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, warn};

/// Concurrent repository searches allowed per live endpoint
pub const DEFAULT_CONCURRENCY_PER_ENDPOINT: usize = 5;

/// Builds a searcher for a shard address. Must not do network I/O.
pub type Connector = Arc<dyn Fn(&str) -> Arc<dyn Searcher> + Send + Sync>;

/// Per-address client cache
struct Clients {
    connect: Connector,
    by_addr: Mutex<FxHashMap<String, Arc<dyn Searcher>>>,
}

impl Clients {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, Arc<dyn Searcher>>> {
        self.by_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, addr: &str) -> Arc<dyn Searcher> {
        let mut clients = self.lock();
        if let Some(client) = clients.get(addr) {
            return client.clone();
        }
        let client = (self.connect)(addr);
        clients.insert(addr.to_string(), client.clone());
        client
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop clients whose address is not live. Closing happens outside the
    /// lock.
    fn maybe_gc(&self, live: &FxHashSet<String>) {
        let stale: Vec<(String, Arc<dyn Searcher>)> = {
            let mut clients = self.lock();
            if clients.len() == live.len() {
                return;
            }
            let dead: Vec<String> = clients
                .keys()
                .filter(|addr| !live.contains(*addr))
                .cloned()
                .collect();
            dead.into_iter()
                .filter_map(|addr| clients.remove(&addr).map(|c| (addr, c)))
                .collect()
        };

        for (addr, client) in stale {
            debug!(addr = %addr, "closing client for removed endpoint");
            client.close();
        }
    }
}

/// JIT backend
pub struct TextJit {
    endpoints: Arc<dyn EndpointMap>,
    resolver: Arc<dyn CommitResolver>,
    clients: Arc<Clients>,
    concurrency_per_endpoint: usize,
}

impl TextJit {
    /// Backend talking to shards through [`RpcClient`]
    pub fn new(endpoints: Arc<dyn EndpointMap>, resolver: Arc<dyn CommitResolver>) -> Self {
        Self::with_connector(
            endpoints,
            resolver,
            Arc::new(|addr: &str| Arc::new(RpcClient::new(addr)) as Arc<dyn Searcher>),
        )
    }

    pub fn with_connector(
        endpoints: Arc<dyn EndpointMap>,
        resolver: Arc<dyn CommitResolver>,
        connect: Connector,
    ) -> Self {
        Self {
            endpoints,
            resolver,
            clients: Arc::new(Clients {
                connect,
                by_addr: Mutex::new(FxHashMap::default()),
            }),
            concurrency_per_endpoint: DEFAULT_CONCURRENCY_PER_ENDPOINT,
        }
    }

    pub fn with_concurrency_per_endpoint(mut self, n: usize) -> Self {
        self.concurrency_per_endpoint = n.max(1);
        self
    }

    /// Number of cached shard clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Acquire a permit per repository and hand the repository to the
    /// dispatcher. Stops when the dispatcher gives up or the scope ends, and
    /// returns the repositories it never dispatched.
    async fn produce(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
        repos: Vec<Repository>,
        semaphore: Arc<Semaphore>,
        tx: mpsc::Sender<Shard>,
    ) -> Vec<Repository> {
        let mut pending = repos.into_iter();
        while let Some(repo) = pending.next() {
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.ok(),
                _ = tx.closed() => None,
                _ = ctx.done() => None,
            };
            let Some(permit) = permit else {
                return std::iter::once(repo).chain(pending).collect();
            };

            let searcher = RepoSearcher {
                repo,
                endpoints: self.endpoints.clone(),
                resolver: self.resolver.clone(),
                clients: self.clients.clone(),
            };
            let shard = Shard::new(Arc::new(searcher), q.clone(), opts.clone()).with_permit(permit);
            if tx.send(shard).await.is_err() {
                return pending.collect();
            }
        }
        Vec::new()
    }
}

impl fmt::Display for TextJit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "textjit")
    }
}

#[async_trait]
impl Searcher for TextJit {
    async fn search(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        let live = self.endpoints.endpoints()?;
        if live.is_empty() {
            return Err(SearchError::NoEndpoints);
        }
        self.clients.maybe_gc(&live);

        let repos = expand_repo_refs(q, &opts.repositories);
        if repos.is_empty() {
            return Ok(SearchResult::default());
        }

        let permits = self.concurrency_per_endpoint * live.len();
        debug!(repos = repos.len(), permits, "jit search");

        let ctx = ctx.child();
        let semaphore = Arc::new(Semaphore::new(permits));
        let (tx, rx) = mpsc::channel(permits);
        let (undispatched, result) = tokio::join!(
            self.produce(&ctx, q, opts, repos, semaphore, tx),
            sharded_search(&ctx, rx),
        );

        let mut result = result?;
        match ctx.err() {
            Some(SearchError::Canceled) => return Err(SearchError::Canceled),
            // out of time: whatever was never dispatched timed out
            Some(err) => {
                debug!(undispatched = undispatched.len(), error = %err, "jit search out of time");
                for repo in undispatched {
                    result.add(status_result(Source::TextJit, &repo.name, err.clone())?);
                }
            }
            None => {}
        }
        Ok(result)
    }

    fn close(&self) {
        let clients: Vec<Arc<dyn Searcher>> = self.clients.lock().drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close();
        }
    }
}

/// Searches one (repository, ref) pair: resolve, pin, route
struct RepoSearcher {
    repo: Repository,
    endpoints: Arc<dyn EndpointMap>,
    resolver: Arc<dyn CommitResolver>,
    clients: Arc<Clients>,
}

impl fmt::Display for RepoSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "textjit({})", self.repo)
    }
}

#[async_trait]
impl Searcher for RepoSearcher {
    async fn search(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        let mut repo = self.repo.clone();

        let resolved = ctx
            .run(self.resolver.resolve(ctx, &repo.name, &repo.ref_pattern))
            .await;
        match resolved {
            Ok(commit) => repo.commit = Some(commit),
            Err(err) => {
                warn!(repo = %repo, error = %err, "commit resolution failed");
                return status_result(Source::TextJit, &repo.name, err);
            }
        }

        let pinned = expand_for_repo_at_commit(q, &repo)?;
        let searched = RepositoryStatus {
            repository: repo.name.clone(),
            source: Source::TextJit,
            status: Status::Searched,
        };
        if pinned == Q::Const(false) {
            return Ok(SearchResult::with_status(searched));
        }

        let addr = self.endpoints.get(&repo.name, &FxHashSet::default())?;
        let client = self.clients.get(&addr);
        let scoped = opts.scoped(vec![repo.clone()]);

        match client.search(ctx, &pinned, &scoped).await {
            Ok(mut result) => {
                let limit = opts.total_max_match_count;
                let status = if limit > 0 && result.stats.match_count >= limit {
                    Status::LimitHit
                } else {
                    Status::Searched
                };
                result.stats.status.push(RepositoryStatus { status, ..searched });
                Ok(result)
            }
            Err(err) => {
                debug!(repo = %repo, addr = %addr, error = %err, "shard search failed");
                status_result(Source::TextJit, &repo.name, err)
            }
        }
    }
}
