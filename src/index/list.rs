//! Background-refreshed list of indexed repositories
//!
//! The refresh loop is an explicit three-state machine:
//!
//! ```text
//! Idle --start--> Running --stop--> Stopped --resume--> Idle
//! ```
//!
//! One task owns the loop while `Running`; it is stopped through its
//! cancellation token. New values are fetched outside the lock and swapped
//! in under it.

use crate::index::native::{IndexEngine, NativeQuery, NativeRepoList};
use crate::search::SearchError;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Refresh loop tuning
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub period: Duration,
    /// Each sleep is `period` shifted by up to this much either way
    pub jitter: Duration,
    /// Consecutive failures before a failure replaces the cached list
    pub failure_threshold: usize,
    /// Start the loop on the first cold read
    pub background: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            jitter: Duration::from_secs(1),
            failure_threshold: 3,
            background: true,
        }
    }
}

#[derive(Debug)]
enum LoopState {
    Idle,
    Running(CancellationToken),
    Stopped,
}

struct Inner {
    cached: Option<Result<Arc<NativeRepoList>, SearchError>>,
    consecutive_failures: usize,
    state: LoopState,
}

pub struct ListCache {
    engine: Arc<dyn IndexEngine>,
    settings: RefreshSettings,
    inner: Mutex<Inner>,
}

impl ListCache {
    pub fn new(engine: Arc<dyn IndexEngine>, settings: RefreshSettings) -> Arc<Self> {
        Arc::new(Self {
            engine,
            settings,
            inner: Mutex::new(Inner {
                cached: None,
                consecutive_failures: 0,
                state: LoopState::Idle,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every repository the engine knows about.
    ///
    /// Served from the cache when warm. A cold read makes one uncached call.
    /// If configured, any read starts the refresh loop when it is idle, so
    /// a resumed loop picks up again on next use.
    pub async fn list_all(self: &Arc<Self>) -> Result<Arc<NativeRepoList>, SearchError> {
        if self.settings.background {
            self.start();
        }
        if let Some(cached) = self.cached() {
            return cached;
        }
        self.engine.list(&NativeQuery::all()).await.map(Arc::new)
    }

    pub fn cached(&self) -> Option<Result<Arc<NativeRepoList>, SearchError>> {
        self.lock().cached.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lock().state, LoopState::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.lock().state, LoopState::Stopped)
    }

    /// Start the refresh loop if it is idle. Must be called inside a tokio
    /// runtime.
    pub fn start(self: &Arc<Self>) {
        let token = {
            let mut inner = self.lock();
            if !matches!(inner.state, LoopState::Idle) {
                return;
            }
            let token = CancellationToken::new();
            inner.state = LoopState::Running(token.clone());
            token
        };

        debug!(period = ?self.settings.period, "starting repository list refresh");
        tokio::spawn(self.clone().run(token));
    }

    /// Stop the loop; it stays stopped until [`ListCache::resume`]
    pub fn stop(&self) {
        let mut inner = self.lock();
        if let LoopState::Running(token) = &inner.state {
            token.cancel();
        }
        inner.state = LoopState::Stopped;
    }

    /// Allow the next cold read to start the loop again
    pub fn resume(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, LoopState::Stopped) {
            inner.state = LoopState::Idle;
        }
    }

    async fn run(self: Arc<Self>, stop: CancellationToken) {
        loop {
            let all = NativeQuery::all();
            let fetched = tokio::select! {
                _ = stop.cancelled() => break,
                fetched = self.engine.list(&all) => fetched,
            };
            self.record(fetched);

            let pause = jittered(self.settings.period, self.settings.jitter);
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        debug!("repository list refresh stopped");
    }

    /// Swap in a fetched list. Failures only replace the cache once they
    /// reach the threshold.
    fn record(&self, fetched: Result<NativeRepoList, SearchError>) {
        let mut inner = self.lock();
        match fetched {
            Ok(list) => {
                inner.consecutive_failures = 0;
                inner.cached = Some(Ok(Arc::new(list)));
            }
            Err(err) => {
                inner.consecutive_failures += 1;
                warn!(
                    error = %err,
                    failures = inner.consecutive_failures,
                    "repository list refresh failed"
                );
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    inner.cached = Some(Err(err));
                }
            }
        }
    }
}

/// `period` moved by a random offset in `[-jitter, +jitter]`
fn jittered(period: Duration, jitter: Duration) -> Duration {
    let span = jitter.as_millis() as u64;
    if span == 0 {
        return period;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(seed);
    let offset = hasher.finish() % (2 * span + 1);
    (period + Duration::from_millis(offset)).saturating_sub(jitter)
}
