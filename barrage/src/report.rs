//! Human and machine-readable run summaries.
use barrage_core::{Comparison, MetricsSnapshot, RunMetrics, RunResult, RunState, Threshold};
use serde::Serialize;
use std::fmt;

/// Rendering of a [`RunResult`] together with every declared threshold.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub scenario: &'a str,
    pub passed: bool,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub exit_code: u8,
    pub duration_secs: f64,
    pub thresholds: Vec<ThresholdReport>,
    pub metrics: &'a RunMetrics,
}

#[derive(Debug, Serialize)]
pub struct ThresholdReport {
    pub expression: String,
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub comparison: Comparison,
    pub bound: f64,
    pub observed: f64,
    pub passed: bool,
}

impl<'a> Report<'a> {
    pub fn new(result: &'a RunResult, thresholds: &[Threshold]) -> Self {
        let thresholds = thresholds
            .iter()
            .map(|t| ThresholdReport {
                expression: t.expression.clone(),
                metric: t.metric.to_string(),
                scenario: t.scenario.clone(),
                comparison: t.comparison,
                bound: t.bound,
                observed: t
                    .metric
                    .value(result.metrics.for_scope(t.scenario.as_deref())),
                passed: !result.violations.iter().any(|v| &v.threshold == t),
            })
            .collect();

        Self {
            scenario: &result.name,
            passed: result.passed,
            state: result.state,
            abort_reason: result.abort_reason.as_ref().map(ToString::to_string),
            exit_code: result.exit_code(),
            duration_secs: result.duration.as_secs_f64(),
            thresholds,
            metrics: &result.metrics,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASSED" } else { "FAILED" };
        writeln!(
            f,
            "{}: {verdict} ({} after {:.1}s)",
            self.scenario, self.state, self.duration_secs
        )?;
        if let Some(reason) = &self.abort_reason {
            writeln!(f, "  aborted: {reason}")?;
        }

        write_snapshot(f, "  ", &self.metrics.total)?;

        if !self.thresholds.is_empty() {
            writeln!(f, "  thresholds:")?;
            for t in &self.thresholds {
                let mark = if t.passed { "ok  " } else { "FAIL" };
                writeln!(f, "    {mark} {} (observed {:.4})", t.expression, t.observed)?;
            }
        }

        if self.metrics.workloads.len() > 1 {
            for (name, snapshot) in &self.metrics.workloads {
                writeln!(f, "  scenario {name}:")?;
                write_snapshot(f, "    ", snapshot)?;
            }
        }

        Ok(())
    }
}

fn write_snapshot(f: &mut fmt::Formatter<'_>, indent: &str, s: &MetricsSnapshot) -> fmt::Result {
    let ms = |d: std::time::Duration| d.as_secs_f64() * 1e3;

    writeln!(
        f,
        "{indent}http_reqs: {} ({:.2}/s)",
        s.count(),
        s.throughput()
    )?;
    writeln!(
        f,
        "{indent}http_req_failed: {:.2}% ({} of {})",
        s.error_rate() * 100.,
        s.errors(),
        s.count()
    )?;
    writeln!(
        f,
        "{indent}http_req_duration: avg={:.2}ms min={:.2}ms med={:.2}ms p(95)={:.2}ms p(99)={:.2}ms max={:.2}ms",
        ms(s.latency_mean()),
        ms(s.latency_min()),
        ms(s.p50()),
        ms(s.p95()),
        ms(s.p99()),
        ms(s.latency_max()),
    )?;

    if !s.failures().is_empty() {
        let failures: Vec<_> = s
            .failures()
            .iter()
            .map(|(reason, n)| format!("{reason}={n}"))
            .collect();
        writeln!(f, "{indent}failures: {}", failures.join(" "))?;
    }

    Ok(())
}
