//! Run orchestration.
use crate::error::{InternalError, RunError};
use crate::executor::{RequestExecutor, Requester};
use crate::pool::VuPool;
use crate::timer::Timer;
use arc_swap::ArcSwap;
use barrage_core::{
    evaluate_run, AbortReason, ConfigError, RunMetrics, RunResult, RunState, ScenarioSpec,
    Violation, Workload, DEFAULT_TICK_INTERVAL,
};
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Cancels a run from outside, e.g. on an operator interrupt.
#[derive(Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

#[derive(Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortHandle {
    pub fn abort(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            info!("Abort requested");
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        loop {
            // NOTE: Register before checking the flag so a concurrent abort is not missed.
            let notified = self.inner.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Live view of a run, refreshed every controller tick.
#[derive(Debug, Clone)]
pub struct Progress {
    pub state: RunState,
    pub elapsed: Duration,
    pub active_vus: BTreeMap<String, usize>,
    pub metrics: RunMetrics,
}

/// Read-only handle on a run's [`Progress`].
#[derive(Clone)]
pub struct RunMonitor {
    progress: Arc<ArcSwap<Progress>>,
}

impl RunMonitor {
    pub fn progress(&self) -> Arc<Progress> {
        self.progress.load_full()
    }

    pub fn state(&self) -> RunState {
        self.progress.load().state
    }
}

/// Drives one [`ScenarioSpec`] from `Idle` to `Completed` or `Aborted`.
///
/// Every tick each workload's pool is scaled to the scheduler's target and the aggregators are
/// drained. Once the longest workload's duration has elapsed, or an abort arrives, every virtual
/// user is retired and awaited before thresholds are evaluated.
///
/// # Example
/// ```no_run
/// use barrage::prelude::*;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), RunError> {
///     let spec = load_scenario("vus: 5\nduration: 30s")?;
///     let result = RunController::new(spec)?
///         .tick_interval(Duration::from_millis(500))
///         .run()
///         .await?;
///     std::process::exit(result.exit_code().into());
/// }
/// ```
pub struct RunController<R> {
    spec: ScenarioSpec,
    requesters: Vec<R>,
    tick_interval: Duration,
    abort: AbortHandle,
    progress: Arc<ArcSwap<Progress>>,
}

impl RunController<RequestExecutor> {
    /// Controller issuing real HTTP requests. All workloads share one connection pool.
    pub fn new(spec: ScenarioSpec) -> Result<Self, RunError> {
        let client = Client::builder()
            .build()
            .map_err(InternalError::HttpClient)?;
        Self::with_requesters(spec, |base_url, workload| {
            RequestExecutor::new(client.clone(), base_url, workload)
        })
    }
}

impl<R: Requester> RunController<R> {
    /// Controller whose virtual users call `build(base_url, workload)`'s requester.
    pub fn with_requesters<F>(spec: ScenarioSpec, mut build: F) -> Result<Self, RunError>
    where
        F: FnMut(&Url, &Workload) -> Result<R, ConfigError>,
    {
        spec.validate()?;
        let requesters = spec
            .workloads
            .iter()
            .map(|workload| build(&spec.base_url, workload))
            .collect::<Result<Vec<_>, _>>()?;

        let progress = Progress {
            state: RunState::Idle,
            elapsed: Duration::ZERO,
            active_vus: spec.workloads.iter().map(|w| (w.name.clone(), 0)).collect(),
            metrics: RunMetrics::default(),
        };

        Ok(Self {
            spec,
            requesters,
            tick_interval: DEFAULT_TICK_INTERVAL,
            abort: AbortHandle::default(),
            progress: Arc::new(ArcSwap::from_pointee(progress)),
        })
    }

    pub fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn monitor(&self) -> RunMonitor {
        RunMonitor {
            progress: self.progress.clone(),
        }
    }

    pub fn spec(&self) -> &ScenarioSpec {
        &self.spec
    }

    #[instrument(name = "scenario", skip_all, fields(name = %self.spec.name))]
    pub async fn run(mut self) -> Result<RunResult, RunError> {
        let total = self.spec.total_duration();
        info!(
            "Running {} against {} for {} with {} workload(s)",
            self.spec.name,
            self.spec.base_url,
            humantime::format_duration(total),
            self.spec.workloads.len()
        );

        let mut timer = Timer::new(self.tick_interval).await;
        let start = timer.start().into_std();
        let mut pools: Vec<_> = self
            .spec
            .workloads
            .iter()
            .cloned()
            .zip(std::mem::take(&mut self.requesters))
            .map(|(workload, requester)| VuPool::new(workload, requester, start))
            .collect();
        debug!("Ticking every {timer}");

        let driven = self.drive(&mut pools, &mut timer).await;

        self.set_state(RunState::Draining);
        info!("Draining virtual users");
        let mut drained = Ok(());
        for pool in pools.iter_mut() {
            let res = pool.shutdown().await;
            if drained.is_ok() {
                drained = res;
            }
        }

        let outcome = driven.and_then(|reason| drained.map(|_| reason));
        let abort_reason = match outcome {
            Ok(reason) => reason,
            Err(err) => {
                error!("Run failed: {err}");
                self.set_state(RunState::Aborted);
                return Err(err.into());
            }
        };

        let metrics = collect(&pools)?;
        let violations = evaluate_run(&metrics, &self.spec.thresholds);
        let elapsed = timer.elapsed();

        let result = match abort_reason {
            None => RunResult::completed(&self.spec.name, metrics, violations, elapsed),
            Some(reason) => {
                warn!("Run aborted: {reason}");
                RunResult::aborted(&self.spec.name, reason, metrics, violations, elapsed)
            }
        };
        self.publish(result.state, elapsed, &pools, result.metrics.clone());

        for violation in &result.violations {
            warn!("Threshold failed: {violation}");
        }
        info!(
            "Scenario {} after {}: {}",
            if result.passed { "passed" } else { "failed" },
            humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)),
            result.metrics.total
        );

        Ok(result)
    }

    /// The `Running` state. Returns why it stopped early, if it did.
    async fn drive(
        &self,
        pools: &mut [VuPool<R>],
        timer: &mut Timer,
    ) -> Result<Option<AbortReason>, InternalError> {
        let total = self.spec.total_duration();
        // `None` when the run is longer than the clock can represent.
        let deadline = timer.start().checked_add(total);

        loop {
            if self.abort.is_aborted() {
                return Ok(Some(AbortReason::Interrupted));
            }

            let elapsed = timer.elapsed();
            if elapsed >= total {
                return Ok(None);
            }

            for pool in pools.iter_mut() {
                pool.scale_at(elapsed);
                pool.reap().await?;
            }

            let metrics = collect(pools)?;
            trace!("{}", metrics.total);
            let violation = self.abort_violation(elapsed, &metrics);
            self.publish(RunState::Running, elapsed, pools, metrics);

            if let Some(violation) = violation {
                return Ok(Some(AbortReason::Threshold(violation)));
            }

            tokio::select! {
                biased;
                _ = self.abort.aborted() => {}
                _ = sleep_until(deadline) => {}
                _ = timer.tick() => {}
            }
        }
    }

    /// First breached `abortOnFail` threshold whose evaluation delay has passed.
    ///
    /// A scope without any recorded request is not evaluated.
    fn abort_violation(&self, elapsed: Duration, metrics: &RunMetrics) -> Option<Violation> {
        self.spec
            .thresholds
            .iter()
            .filter(|t| t.abort_on_fail && elapsed >= t.delay_abort_eval)
            .find_map(|t| {
                let snapshot = metrics.for_scope(t.scenario.as_deref());
                if snapshot.count() == 0 {
                    None
                } else {
                    t.check(snapshot)
                }
            })
    }

    fn publish(&self, state: RunState, elapsed: Duration, pools: &[VuPool<R>], metrics: RunMetrics) {
        self.progress.store(Arc::new(Progress {
            state,
            elapsed,
            active_vus: pools
                .iter()
                .map(|p| (p.name().to_string(), p.active()))
                .collect(),
            metrics,
        }));
    }

    fn set_state(&self, state: RunState) {
        let mut progress = Progress::clone(&self.progress.load());
        progress.state = state;
        self.progress.store(Arc::new(progress));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn collect<R: Requester>(pools: &[VuPool<R>]) -> Result<RunMetrics, InternalError> {
    let snapshots = pools
        .iter()
        .map(|pool| Ok((pool.name().to_string(), pool.snapshot()?)))
        .collect::<Result<Vec<_>, InternalError>>()?;
    RunMetrics::from_workloads(snapshots).map_err(InternalError::Merge)
}
