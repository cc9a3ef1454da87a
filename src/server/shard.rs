//! Shard server
//!
//! Serves pinned searches and index requests over TCP. Searches whose
//! query is pinned to a commit are immutable, so their results are kept in
//! an LRU cache.

use crate::index::native::IndexEngine;
use crate::query::Q;
use crate::search::{Options, SearchContext, SearchError, SearchResult, Searcher};
use crate::server::protocol::{Request, Response, StatusResponse, read_message, write_message};
use anyhow::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::BufStream;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// LRU cache size for pinned search results
pub const DEFAULT_CACHE_SIZE: usize = 128;

/// Extra time granted on top of the request's wall time, so the client
/// sees partial results instead of its own timeout
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ShardSettings {
    pub grace: Duration,
    pub cache_size: usize,
}

impl Default for ShardSettings {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Statistics for the server
struct ServerStats {
    start_time: Instant,
    queries_served: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_served: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

/// The shard server
pub struct ShardServer {
    searcher: Arc<dyn Searcher>,
    index: Option<Arc<dyn IndexEngine>>,
    grace: Duration,
    cache: Mutex<LruCache<String, SearchResult>>,
    stats: ServerStats,
    shutdown: CancellationToken,
}

impl ShardServer {
    /// Create a new shard server wrapped in Arc
    pub fn new(searcher: Arc<dyn Searcher>, index: Option<Arc<dyn IndexEngine>>) -> Arc<Self> {
        Self::with_settings(searcher, index, ShardSettings::default())
    }

    pub fn with_settings(
        searcher: Arc<dyn Searcher>,
        index: Option<Arc<dyn IndexEngine>>,
        settings: ShardSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            searcher,
            index,
            grace: settings.grace,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(settings.cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
            stats: ServerStats::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Accept connections until [`ShardServer::shutdown`] is called
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, searcher = %self.searcher, "shard server listening");
        }

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    debug!(%peer, error = %e, "connection error");
                }
            });
        }

        info!("shard server stopped");
        Ok(())
    }

    /// Handle a single client connection
    async fn handle_connection(&self, stream: TcpStream) -> std::io::Result<()> {
        let mut stream = BufStream::new(stream);

        loop {
            let request: Request = match read_message(&mut stream).await {
                Ok(req) => req,
                // Client disconnected
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    let resp = Response::Error {
                        error: SearchError::Rpc {
                            message: format!("invalid request: {}", e),
                        },
                    };
                    // the stream can't be trusted to be at a frame boundary
                    write_message(&mut stream, &resp).await?;
                    break;
                }
            };

            let response = self.handle_request(request).await;
            write_message(&mut stream, &response).await?;
        }

        Ok(())
    }

    /// Handle a single request
    async fn handle_request(&self, request: Request) -> Response {
        let outcome = match request {
            Request::Search { query, options } => self
                .search(&query, &options)
                .await
                .map(|result| Response::Search { result }),

            Request::List { query } => match &self.index {
                Some(index) => index.list(&query).await.map(|list| Response::List { list }),
                None => Err(no_index()),
            },

            Request::IndexSearch { query, options } => match &self.index {
                Some(index) => index
                    .search(&query, &options)
                    .await
                    .map(|result| Response::IndexSearch { result }),
                None => Err(no_index()),
            },

            Request::Status => Ok(Response::Status(self.status())),

            Request::Ping => Ok(Response::Pong),
        };

        outcome.unwrap_or_else(|error| Response::Error { error })
    }

    async fn search(&self, q: &Q, opts: &Options) -> Result<SearchResult, SearchError> {
        self.stats.queries_served.fetch_add(1, Ordering::Relaxed);

        let key = is_pinned(q).then(|| cache_key(q, opts));
        if let Some(key) = &key {
            if let Ok(mut cache) = self.cache.lock()
                && let Some(cached) = cache.get(key)
            {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.clone());
            }
            self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let ctx = match opts.max_wall_time {
            Some(wall) => SearchContext::new().with_timeout(wall + self.grace),
            None => SearchContext::new(),
        };
        let result = self.searcher.search(&ctx, q, opts).await?;

        if let Some(key) = key
            && let Ok(mut cache) = self.cache.lock()
        {
            cache.put(key, result.clone());
        }
        Ok(result)
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            queries_served: self.stats.queries_served.load(Ordering::Relaxed),
            cache_hit_rate: self.stats.cache_hit_rate(),
            cache_entries: self.cache.lock().map(|c| c.len()).unwrap_or(0),
            searcher: self.searcher.to_string(),
        }
    }
}

fn no_index() -> SearchError {
    SearchError::IndexUnavailable {
        message: "shard has no index engine".to_string(),
    }
}

/// A query restricted to a full commit id always returns the same result
fn is_pinned(q: &Q) -> bool {
    q.any_atom(|atom| match atom {
        Q::Ref(r) => r.pattern.len() == 40 && r.pattern.bytes().all(|b| b.is_ascii_hexdigit()),
        _ => false,
    })
}

fn cache_key(q: &Q, opts: &Options) -> String {
    let opts = serde_json::to_string(opts).unwrap_or_default();
    format!("{}\n{}", q, opts)
}
