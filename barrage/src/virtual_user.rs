use crate::aggregator::MetricsAggregator;
use crate::executor::Requester;
use governor::DefaultDirectRateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// One simulated client: issue, record, sleep, repeat until retired.
pub(crate) struct VirtualUser<R> {
    pub id: u64,
    pub requester: R,
    pub aggregator: MetricsAggregator,
    pub pacing: Duration,
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

/// Returned by a virtual user once it has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VuReport {
    pub id: u64,
    pub iterations: u64,
}

impl<R: Requester> VirtualUser<R> {
    /// Runs until `retire` fires or its sender is dropped.
    ///
    /// Retirement is only observed between requests; a request in flight always completes (or
    /// times out) and is recorded.
    pub async fn run(self, mut retire: oneshot::Receiver<()>) -> VuReport {
        let mut iterations = 0;

        loop {
            if !matches!(retire.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    biased;
                    _ = &mut retire => break,
                    _ = limiter.until_ready() => {}
                }
            }

            let outcome = self.requester.send().await;
            self.aggregator.record(outcome);
            iterations += 1;

            if self.pacing.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    biased;
                    _ = &mut retire => break,
                    _ = tokio::time::sleep(self.pacing) => {}
                }
            }
        }

        trace!("Virtual user {} retired after {iterations} iterations", self.id);
        VuReport {
            id: self.id,
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage_core::{RequestOutcome, Response};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Instant;

    fn ok() -> RequestOutcome {
        RequestOutcome {
            timestamp: Instant::now(),
            latency: Duration::from_millis(1),
            response: Response::Status(200),
            success: true,
        }
    }

    fn vu<R: Requester>(requester: R, aggregator: &MetricsAggregator) -> VirtualUser<R> {
        VirtualUser {
            id: 0,
            requester,
            aggregator: aggregator.clone(),
            pacing: Duration::from_millis(10),
            limiter: None,
        }
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn runs_until_retired() {
        let aggregator = MetricsAggregator::new("vu", Instant::now());
        let requester = || async { ok() };

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(vu(requester, &aggregator).run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        let report = task.await.unwrap();

        assert!(report.iterations > 0);
        assert_eq!(aggregator.snapshot().unwrap().count(), report.iterations);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn in_flight_request_completes_after_retirement() {
        let aggregator = MetricsAggregator::new("vu", Instant::now());
        let started = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU64::new(0));

        let requester = {
            let started = started.clone();
            let completed = completed.clone();
            move || {
                let started = started.clone();
                let completed = completed.clone();
                async move {
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    ok()
                }
            }
        };

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(vu(requester, &aggregator).run(rx));

        while !started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        drop(tx);
        let report = task.await.unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(aggregator.snapshot().unwrap().count(), 1);
    }

    #[tokio::test]
    async fn retired_before_start_issues_nothing() {
        let aggregator = MetricsAggregator::new("vu", Instant::now());
        let sent = Arc::new(AtomicU64::new(0));
        let requester = {
            let sent = sent.clone();
            move || {
                sent.fetch_add(1, Ordering::SeqCst);
                async { ok() }
            }
        };

        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let report = vu(requester, &aggregator).run(rx).await;

        assert_eq!(report.iterations, 0);
        assert_eq!(sent.load(Ordering::SeqCst), 0);
    }
}
