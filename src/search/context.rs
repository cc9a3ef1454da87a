//! Cancelable search scope with an optional deadline
//!
//! Every search request carries one [`SearchContext`]. Children share the
//! parent's cancellation and never outlive its deadline, so canceling the
//! request root stops every shard derived from it.

use crate::search::SearchError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope: canceled with this one, cancelable on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope expiring after `timeout`, or at the parent deadline if
    /// that comes first
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) => parent.min(deadline),
                None => deadline,
            }),
        }
    }

    /// Child scope bounded by an optional wall time
    pub fn with_max_wall_time(&self, max_wall_time: Option<Duration>) -> Self {
        match max_wall_time {
            Some(wall) if !wall.is_zero() => self.with_timeout(wall),
            _ => self.child(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the scope ended, or `None` while it is live
    pub fn err(&self) -> Option<SearchError> {
        if self.token.is_cancelled() {
            return Some(SearchError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SearchError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the scope is canceled or its deadline passes
    pub async fn done(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = expired(self.deadline) => {}
        }
    }

    /// Run `fut` inside the scope. The future is dropped as soon as the
    /// scope ends.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, SearchError>
    where
        F: Future<Output = Result<T, SearchError>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SearchError::Canceled),
            _ = expired(self.deadline) => Err(SearchError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
