//! Explicit run context: the concurrency limiter and the handles every run
//! is executed against.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::RetryPolicy;
use crate::cancellation::CancellationToken;
use crate::events::{EventSink, NoOpEventSink};
use crate::schema::SchemaValidator;
use crate::store::PipelineStore;

/// Default number of stage attempts in flight at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Bounds the number of stage attempts in flight. Clones share the same
/// bound, so one limiter can span every run of a service.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter admitting `limit` attempts (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free slot. `None` once the limiter has been closed.
    pub async fn acquire(&self) -> Option<LimiterPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Some(LimiterPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Stops admitting new attempts; pending and future acquires get `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// The configured bound.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Attempts currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY_LIMIT)
    }
}

/// A held limiter slot, released on drop.
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything a run executes against, passed explicitly.
#[derive(Clone)]
pub struct RunContext {
    /// Shared concurrency bound.
    pub limiter: ConcurrencyLimiter,
    /// Cancellation for this run.
    pub cancellation: Arc<CancellationToken>,
    /// Where run snapshots go.
    pub store: Arc<dyn PipelineStore>,
    /// Lifecycle event receiver.
    pub events: Arc<dyn EventSink>,
    /// Shared output validator.
    pub validator: Arc<SchemaValidator>,
    /// Retry policy for store writes.
    pub persistence_retry: RetryPolicy,
}

impl RunContext {
    /// Creates a context with a fresh token, a default limiter, no-op events
    /// and a default persistence policy.
    #[must_use]
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            limiter: ConcurrencyLimiter::default(),
            cancellation: Arc::new(CancellationToken::new()),
            store,
            events: Arc::new(NoOpEventSink),
            validator: Arc::new(SchemaValidator::new()),
            persistence_retry: RetryPolicy::default(),
        }
    }

    /// Sets the limiter.
    #[must_use]
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Sets the persistence retry policy.
    #[must_use]
    pub fn with_persistence_retry(mut self, policy: RetryPolicy) -> Self {
        self.persistence_retry = policy;
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("limit", &self.limiter.limit())
            .field("in_flight", &self.limiter.in_flight())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limiter_bounds_and_tracks_peak() {
        let limiter = ConcurrencyLimiter::new(2);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(blocked.is_err());

        drop(first);
        assert_eq!(limiter.in_flight(), 1);
        let _third = limiter.acquire().await.unwrap();
        assert_eq!(limiter.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_limiter_shared_between_clones() {
        let limiter = ConcurrencyLimiter::new(1);
        let clone = limiter.clone();
        let _permit = limiter.acquire().await.unwrap();
        assert_eq!(clone.in_flight(), 1);
        assert!(tokio::time::timeout(Duration::from_millis(20), clone.acquire())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_limiter_close() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
        limiter.close();
        assert!(limiter.acquire().await.is_none());
    }
}
