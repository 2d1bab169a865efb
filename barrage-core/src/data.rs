use crate::{HISTOGRAM_HIGHEST_US, HISTOGRAM_LOWEST_US, HISTOGRAM_SIGFIG};
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Result of a single request, classified by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub timestamp: Instant,
    pub latency: Duration,
    pub response: Response,
    pub success: bool,
}

impl RequestOutcome {
    pub fn status(&self) -> Option<u16> {
        match self.response {
            Response::Status(code) => Some(code),
            Response::Transport(_) => None,
        }
    }

    pub fn failure(&self) -> Option<FailureReason> {
        if self.success {
            return None;
        }

        Some(match self.response {
            Response::Status(code) => FailureReason::UnexpectedStatus(code),
            Response::Transport(kind) => kind.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Status(u16),
    Transport(TransportError),
}

/// Ways a request can fail before a status line is read in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportError {
    Timeout,
    ConnectionRefused,
    Dns,
    Connect,
    Body,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureReason {
    Timeout,
    ConnectionRefused,
    Dns,
    Connect,
    Body,
    UnexpectedStatus(u16),
    Other,
}

impl From<TransportError> for FailureReason {
    fn from(kind: TransportError) -> Self {
        match kind {
            TransportError::Timeout => Self::Timeout,
            TransportError::ConnectionRefused => Self::ConnectionRefused,
            TransportError::Dns => Self::Dns,
            TransportError::Connect => Self::Connect,
            TransportError::Body => Self::Body,
            TransportError::Other => Self::Other,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionRefused => write!(f, "connection_refused"),
            Self::Dns => write!(f, "dns"),
            Self::Connect => write!(f, "connect"),
            Self::Body => write!(f, "body"),
            Self::UnexpectedStatus(code) => write!(f, "status_{code}"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("request counter overflowed")]
    CountOverflow,

    #[error("latency histograms have incompatible bounds")]
    IncompatibleHistogram,
}

/// Streaming summary of request outcomes.
///
/// Latencies live in an HDR histogram (microseconds, 3 significant digits), so memory is fixed
/// regardless of how many requests were recorded and merging is exact.
#[derive(Debug, Clone, Serialize)]
#[serde(into = "SnapshotSummary")]
pub struct MetricsSnapshot {
    count: u64,
    errors: u64,
    elapsed: Duration,
    latency: Histogram<u64>,
    statuses: BTreeMap<u16, u64>,
    failures: BTreeMap<FailureReason, u64>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for MetricsSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count
            && self.errors == other.errors
            && self.elapsed == other.elapsed
            && self.statuses == other.statuses
            && self.failures == other.failures
            && self.latency == other.latency
    }
}

impl MetricsSnapshot {
    pub fn empty() -> Self {
        Self {
            count: 0,
            errors: 0,
            elapsed: Duration::ZERO,
            latency: new_histogram(),
            statuses: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Folds one outcome in. Transport failures carry no latency sample.
    pub fn record(&mut self, outcome: &RequestOutcome) -> Result<(), SnapshotError> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or(SnapshotError::CountOverflow)?;

        if let Some(reason) = outcome.failure() {
            self.errors += 1;
            *self.failures.entry(reason).or_insert(0) += 1;
        }

        if let Some(code) = outcome.status() {
            *self.statuses.entry(code).or_insert(0) += 1;
            let micros = u64::try_from(outcome.latency.as_micros()).unwrap_or(u64::MAX);
            self.latency.saturating_record(micros.max(HISTOGRAM_LOWEST_US));
        }

        Ok(())
    }

    /// Adds another snapshot's counts; elapsed becomes the longer of the two.
    pub fn merge(&mut self, other: &MetricsSnapshot) -> Result<(), SnapshotError> {
        self.count = self
            .count
            .checked_add(other.count)
            .ok_or(SnapshotError::CountOverflow)?;
        self.errors += other.errors;
        self.elapsed = self.elapsed.max(other.elapsed);
        self.latency
            .add(&other.latency)
            .map_err(|_| SnapshotError::IncompatibleHistogram)?;
        for (code, n) in &other.statuses {
            *self.statuses.entry(*code).or_insert(0) += n;
        }
        for (reason, n) in &other.failures {
            *self.failures.entry(*reason).or_insert(0) += n;
        }
        Ok(())
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// `errors / count`, or 0 before any request was recorded.
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.errors as f64 / self.count as f64
        }
    }

    /// Requests per second over the elapsed window.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0. {
            self.count as f64 / secs
        } else {
            0.
        }
    }

    pub fn latency_samples(&self) -> u64 {
        self.latency.len()
    }

    pub fn latency(&self, quantile: f64) -> Duration {
        if self.latency.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency.value_at_quantile(quantile.clamp(0., 1.)))
    }

    pub fn p50(&self) -> Duration {
        self.latency(0.5)
    }

    pub fn p95(&self) -> Duration {
        self.latency(0.95)
    }

    pub fn p99(&self) -> Duration {
        self.latency(0.99)
    }

    pub fn latency_mean(&self) -> Duration {
        if self.latency.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.latency.mean() / 1e6)
    }

    pub fn latency_min(&self) -> Duration {
        if self.latency.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency.min())
    }

    pub fn latency_max(&self) -> Duration {
        if self.latency.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency.max())
    }

    pub fn statuses(&self) -> &BTreeMap<u16, u64> {
        &self.statuses
    }

    pub fn failures(&self) -> &BTreeMap<FailureReason, u64> {
        &self.failures
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reqs={}, rate={:.2}/s, errors={:.2}%, p50={:?}, p95={:?}, p99={:?}",
            self.count,
            self.throughput(),
            self.error_rate() * 100.,
            self.p50(),
            self.p95(),
            self.p99(),
        )
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(HISTOGRAM_LOWEST_US, HISTOGRAM_HIGHEST_US, HISTOGRAM_SIGFIG)
        .expect("Invalid histogram bounds.")
}

/// Serialized view of a [`MetricsSnapshot`]. Latencies are in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub count: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub throughput: f64,
    pub elapsed_secs: f64,
    pub latency_ms: LatencySummary,
    pub statuses: BTreeMap<u16, u64>,
    pub failures: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl From<MetricsSnapshot> for SnapshotSummary {
    fn from(snapshot: MetricsSnapshot) -> Self {
        Self::from(&snapshot)
    }
}

impl From<&MetricsSnapshot> for SnapshotSummary {
    fn from(s: &MetricsSnapshot) -> Self {
        let ms = |d: Duration| d.as_secs_f64() * 1e3;
        Self {
            count: s.count,
            errors: s.errors,
            error_rate: s.error_rate(),
            throughput: s.throughput(),
            elapsed_secs: s.elapsed.as_secs_f64(),
            latency_ms: LatencySummary {
                avg: ms(s.latency_mean()),
                min: ms(s.latency_min()),
                med: ms(s.p50()),
                max: ms(s.latency_max()),
                p90: ms(s.latency(0.9)),
                p95: ms(s.p95()),
                p99: ms(s.p99()),
            },
            statuses: s.statuses.clone(),
            failures: s
                .failures
                .iter()
                .map(|(reason, n)| (reason.to_string(), *n))
                .collect(),
        }
    }
}
