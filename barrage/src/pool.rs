use crate::aggregator::MetricsAggregator;
use crate::error::InternalError;
use crate::executor::Requester;
use crate::virtual_user::{VirtualUser, VuReport};
use barrage_core::{MetricsSnapshot, Workload};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

struct VuHandle {
    retire: oneshot::Sender<()>,
    task: JoinHandle<VuReport>,
}

/// The virtual users of one workload.
///
/// Scaling down signals the most recently spawned users to retire; they keep running until
/// their current request finishes and are reaped on later ticks.
pub(crate) struct VuPool<R> {
    workload: Workload,
    requester: R,
    aggregator: MetricsAggregator,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    live: Vec<VuHandle>,
    retiring: Vec<JoinHandle<VuReport>>,
    next_id: u64,
    iterations: u64,
}

impl<R: Requester> VuPool<R> {
    pub fn new(workload: Workload, requester: R, start: Instant) -> Self {
        let aggregator = MetricsAggregator::new(&workload.name, start);
        let limiter = workload.rps.map(|rps| Arc::new(rate_limiter(rps)));

        Self {
            workload,
            requester,
            aggregator,
            limiter,
            live: vec![],
            retiring: vec![],
            next_id: 0,
            iterations: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.workload.name
    }

    /// Users that have not been asked to retire.
    pub fn active(&self) -> usize {
        self.live.len()
    }

    /// Users that were asked to retire and have not exited yet.
    pub fn retiring(&self) -> usize {
        self.retiring.len()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Converges on the scheduler's target at `elapsed` into the run.
    pub fn scale_at(&mut self, elapsed: Duration) {
        let target = self.workload.executor.target_at(elapsed);
        self.set_concurrency(usize::try_from(target).unwrap_or(usize::MAX));
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        if self.live.len() == concurrency {
            return;
        }

        debug!(
            "Scaling {} from {} to {concurrency} virtual users",
            self.workload.name,
            self.live.len()
        );

        if self.live.len() > concurrency {
            for handle in self.live.drain(concurrency..).rev() {
                // A send error means the user already exited; it is reaped either way.
                let _ = handle.retire.send(());
                self.retiring.push(handle.task);
            }
        } else {
            while self.live.len() < concurrency {
                let (retire, rx) = oneshot::channel();
                let vu = VirtualUser {
                    id: self.next_id,
                    requester: self.requester.clone(),
                    aggregator: self.aggregator.clone(),
                    pacing: self.workload.pacing,
                    limiter: self.limiter.clone(),
                };
                self.next_id += 1;

                self.live.push(VuHandle {
                    retire,
                    task: tokio::spawn(vu.run(rx)),
                });
            }
        }

        self.aggregator.telemetry().set_active_vus(self.live.len());
    }

    /// Collects users that finished retiring.
    pub async fn reap(&mut self) -> Result<(), InternalError> {
        let (finished, pending): (Vec<_>, Vec<_>) = self
            .retiring
            .drain(..)
            .partition(|task| task.is_finished());
        self.retiring = pending;

        for task in finished {
            self.join(task).await?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<MetricsSnapshot, InternalError> {
        self.aggregator
            .snapshot()
            .map_err(|source| InternalError::Aggregation {
                workload: self.workload.name.clone(),
                source,
            })
    }

    /// Retires every user and waits for all of them to exit.
    pub async fn shutdown(&mut self) -> Result<(), InternalError> {
        self.set_concurrency(0);

        let mut result = Ok(());
        for task in std::mem::take(&mut self.retiring) {
            let joined = self.join(task).await;
            if result.is_ok() {
                result = joined;
            }
        }

        debug!(
            "{} drained after {} iterations",
            self.workload.name, self.iterations
        );
        result
    }

    async fn join(&mut self, task: JoinHandle<VuReport>) -> Result<(), InternalError> {
        match task.await {
            Ok(report) => {
                self.iterations += report.iterations;
                Ok(())
            }
            Err(source) => {
                error!("Virtual user of {} failed: {source}", self.workload.name);
                Err(InternalError::VirtualUser {
                    workload: self.workload.name.clone(),
                    source,
                })
            }
        }
    }
}

fn rate_limiter(rps: NonZeroU32) -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(rps).allow_burst(NonZeroU32::MIN))
}
