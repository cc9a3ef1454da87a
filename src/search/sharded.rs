//! Fan-out/fan-in over a stream of shards
//!
//! [`sharded_search`] is the one place the cancel-then-drain discipline is
//! implemented: the first shard error cancels the scope, then both the
//! pending shard stream and the running tasks are drained before the error
//! is returned. Every backend that fans out goes through it.

use crate::query::Q;
use crate::search::{Options, SearchContext, SearchError, SearchResult, Searcher};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::task::JoinSet;
use tracing::debug;

/// One unit of work: a searcher and the query and options to run on it
pub struct Shard {
    pub searcher: Arc<dyn Searcher>,
    pub query: Q,
    pub options: Options,
    /// Held until the shard's search finishes
    pub permit: Option<OwnedSemaphorePermit>,
}

impl Shard {
    pub fn new(searcher: Arc<dyn Searcher>, query: Q, options: Options) -> Self {
        Self {
            searcher,
            query,
            options,
            permit: None,
        }
    }

    pub fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }
}

/// Run every shard received on `shards` concurrently and merge the results.
///
/// Shards run under a child of `ctx`. On the first error the child scope is
/// canceled, the shard stream is closed and drained, the running shards are
/// awaited, and that error is returned. Partial results are discarded.
pub async fn sharded_search(
    ctx: &SearchContext,
    mut shards: mpsc::Receiver<Shard>,
) -> Result<SearchResult, SearchError> {
    let ctx = ctx.child();
    let mut tasks = JoinSet::new();
    let mut merged = SearchResult::default();
    let mut receiving = true;
    let mut failure = None;

    loop {
        tokio::select! {
            shard = shards.recv(), if receiving => match shard {
                Some(shard) => {
                    let ctx = ctx.clone();
                    tasks.spawn(async move {
                        let Shard { searcher, query, options, permit } = shard;
                        let result = searcher.search(&ctx, &query, &options).await;
                        drop(permit);
                        result
                    });
                }
                None => receiving = false,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let outcome = joined.unwrap_or_else(|e| {
                    Err(SearchError::internal(format!("shard task failed: {}", e)))
                });
                match outcome {
                    Ok(result) => merged.add(result),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            else => break,
        }
    }

    let Some(err) = failure else {
        return Ok(merged);
    };

    debug!(error = %err, running = tasks.len(), "shard failed, canceling siblings");
    ctx.cancel();
    shards.close();
    while shards.recv().await.is_some() {}
    while tasks.join_next().await.is_some() {}
    Err(err)
}

/// Searcher returning a fixed outcome. Used to surface failures that happen
/// while building shards, and as a wiring stub.
pub struct StaticSearcher {
    name: String,
    outcome: Result<SearchResult, SearchError>,
}

impl StaticSearcher {
    pub fn ok(result: SearchResult) -> Self {
        Self {
            name: "static".to_string(),
            outcome: Ok(result),
        }
    }

    pub fn err(err: SearchError) -> Self {
        Self {
            name: "static-error".to_string(),
            outcome: Err(err),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Shard that fails with `err` when run
    pub fn failed_shard(err: SearchError) -> Shard {
        Shard::new(Arc::new(Self::err(err)), Q::Const(false), Options::default())
    }
}

impl fmt::Display for StaticSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[async_trait::async_trait]
impl Searcher for StaticSearcher {
    async fn search(
        &self,
        _ctx: &SearchContext,
        _q: &Q,
        _opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        self.outcome.clone()
    }
}
