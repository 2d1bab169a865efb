use crate::telemetry::Telemetry;
use barrage_core::{MetricsSnapshot, RequestOutcome, SnapshotError};
use metrics_util::AtomicBucket;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Collects outcomes from every virtual user of one workload.
///
/// Recording is a lock-free push. [`snapshot`](Self::snapshot) drains the pending outcomes into
/// the running [`MetricsSnapshot`] under a short lock and hands back a copy.
#[derive(Clone)]
pub struct MetricsAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    start: Instant,
    pending: AtomicBucket<RequestOutcome>,
    snapshot: Mutex<MetricsSnapshot>,
    telemetry: Telemetry,
}

impl MetricsAggregator {
    pub fn new(workload: &str, start: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                start,
                pending: AtomicBucket::new(),
                snapshot: Mutex::new(MetricsSnapshot::empty()),
                telemetry: Telemetry::new(workload),
            }),
        }
    }

    pub fn record(&self, outcome: RequestOutcome) {
        self.inner.telemetry.record(&outcome);
        self.inner.pending.push(outcome);
    }

    /// Point-in-time copy of everything recorded so far.
    pub fn snapshot(&self) -> Result<MetricsSnapshot, SnapshotError> {
        let mut snapshot = self
            .inner
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut result = Ok(());
        self.inner.pending.clear_with(|outcomes| {
            for outcome in outcomes {
                if result.is_ok() {
                    result = snapshot.record(outcome);
                }
            }
        });
        result?;

        Ok(snapshot.clone().with_elapsed(self.inner.start.elapsed()))
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.inner.telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barrage_core::Response;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use std::time::Duration;

    fn outcome(status: u16, latency_ms: u64) -> RequestOutcome {
        RequestOutcome {
            timestamp: Instant::now(),
            latency: Duration::from_millis(latency_ms),
            response: Response::Status(status),
            success: status < 400,
        }
    }

    #[test]
    fn snapshot_drains_pending_outcomes() {
        let aggregator = MetricsAggregator::new("test", Instant::now());

        aggregator.record(outcome(200, 10));
        aggregator.record(outcome(500, 20));
        let first = aggregator.snapshot().unwrap();
        assert_eq!(first.count(), 2);
        assert_eq!(first.errors(), 1);

        aggregator.record(outcome(200, 30));
        let second = aggregator.snapshot().unwrap();
        assert_eq!(second.count(), 3);
        assert!(second.count() >= first.count());
        assert!(second.elapsed() >= first.elapsed());
    }

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers() {
        let aggregator = MetricsAggregator::new("test", Instant::now());

        let mut tasks = vec![];
        for seed in 0..8 {
            let aggregator = aggregator.clone();
            tasks.push(tokio::spawn(async move {
                let mut rng = SmallRng::seed_from_u64(seed);
                for _ in 0..1_000 {
                    let status = if rng.gen_bool(0.1) { 503 } else { 200 };
                    aggregator.record(outcome(status, rng.gen_range(1..100)));
                }
            }));
        }

        let mut last = 0;
        for task in tasks {
            task.await.unwrap();
            let count = aggregator.snapshot().unwrap().count();
            assert!(count >= last);
            last = count;
        }

        let snapshot = aggregator.snapshot().unwrap();
        assert_eq!(snapshot.count(), 8_000);
        assert_eq!(snapshot.latency_samples(), 8_000);
        assert!((0. ..=1.).contains(&snapshot.error_rate()));
    }
}
