use crate::{
    MetricsSnapshot, SnapshotError, Violation, EXIT_ABORTED, EXIT_OK, EXIT_THRESHOLDS_FAILED,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Metrics for a whole run: the merged total plus one snapshot per workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub total: MetricsSnapshot,
    pub workloads: BTreeMap<String, MetricsSnapshot>,
}

impl RunMetrics {
    /// Merges per-workload snapshots. The total's elapsed time is the longest workload's.
    pub fn from_workloads<I>(workloads: I) -> Result<Self, SnapshotError>
    where
        I: IntoIterator<Item = (String, MetricsSnapshot)>,
    {
        let mut total = MetricsSnapshot::empty();
        let mut per_workload = BTreeMap::new();
        for (name, snapshot) in workloads {
            total.merge(&snapshot)?;
            per_workload.insert(name, snapshot);
        }

        Ok(Self {
            total,
            workloads: per_workload,
        })
    }

    /// Snapshot a threshold with the given scope is checked against.
    ///
    /// Scopes are validated at load, so an unknown one falls back to the total.
    pub fn for_scope(&self, scope: Option<&str>) -> &MetricsSnapshot {
        scope
            .and_then(|name| self.workloads.get(name))
            .unwrap_or(&self.total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// External cancellation through an abort handle.
    Interrupted,
    /// An `abortOnFail` threshold was breached mid-run.
    Threshold(Violation),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "interrupted"),
            Self::Threshold(violation) => write!(f, "threshold breached: {violation}"),
        }
    }
}

/// Final outcome of a run. Built once after draining.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub name: String,
    pub passed: bool,
    pub state: RunState,
    pub abort_reason: Option<AbortReason>,
    pub metrics: RunMetrics,
    pub violations: Vec<Violation>,
    pub duration: Duration,
}

impl RunResult {
    pub fn completed(
        name: &str,
        metrics: RunMetrics,
        violations: Vec<Violation>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            passed: violations.is_empty(),
            state: RunState::Completed,
            abort_reason: None,
            metrics,
            violations,
            duration,
        }
    }

    /// An aborted run never passes, even if no threshold was violated.
    pub fn aborted(
        name: &str,
        reason: AbortReason,
        metrics: RunMetrics,
        violations: Vec<Violation>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            state: RunState::Aborted,
            abort_reason: Some(reason),
            metrics,
            violations,
            duration,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }

    pub fn exit_code(&self) -> u8 {
        match &self.abort_reason {
            Some(AbortReason::Interrupted) => EXIT_ABORTED,
            Some(AbortReason::Threshold(_)) => EXIT_THRESHOLDS_FAILED,
            None if self.passed => EXIT_OK,
            None => EXIT_THRESHOLDS_FAILED,
        }
    }
}
