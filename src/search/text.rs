//! Index/JIT router

use crate::index::Zoekt;
use crate::query::Q;
use crate::search::{
    Options, SearchContext, SearchError, SearchResult, Searcher, Shard, Source, sharded_search,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Searches indexed repositories through the index and everything else
/// through the JIT fallback, merging both into one result.
pub struct Text {
    index: Arc<Zoekt>,
    fallback: Arc<dyn Searcher>,
}

impl Text {
    pub fn new(index: Arc<Zoekt>, fallback: Arc<dyn Searcher>) -> Self {
        Self { index, fallback }
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "text(index={}, fallback={})", self.index, self.fallback)
    }
}

#[async_trait]
impl Searcher for Text {
    async fn search(
        &self,
        ctx: &SearchContext,
        q: &Q,
        opts: &Options,
    ) -> Result<SearchResult, SearchError> {
        let ctx = ctx.with_max_wall_time(opts.max_wall_time);

        let (indexed, unindexed, index_unavailable) =
            match self.index.split_repositories(&ctx, q, opts).await {
                Ok(split) => (split.indexed, split.unindexed, false),
                Err(err) => {
                    warn!(error = %err, "index unavailable, searching every repository just in time");
                    (Vec::new(), opts.repositories.clone(), true)
                }
            };

        debug!(
            indexed = indexed.len(),
            unindexed = unindexed.len(),
            options = %opts,
            "routing search"
        );

        let mut shards = Vec::with_capacity(2);
        if !indexed.is_empty() {
            let index: Arc<dyn Searcher> = self.index.clone();
            shards.push(Shard::new(index, q.clone(), opts.scoped(indexed)));
        }
        if !unindexed.is_empty() {
            shards.push(Shard::new(self.fallback.clone(), q.clone(), opts.scoped(unindexed)));
        }

        let (tx, rx) = mpsc::channel(2);
        for shard in shards {
            if tx.send(shard).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut result = sharded_search(&ctx, rx).await?;
        if index_unavailable {
            result.stats.unavailable.push(Source::TextIndexed);
        }
        result.truncate_display(opts.max_doc_display_count);
        Ok(result)
    }

    fn close(&self) {
        self.index.close();
        self.fallback.close();
    }
}
