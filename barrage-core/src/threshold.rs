//! Pass/fail assertions over aggregated metrics.
use crate::{ConfigError, MetricsSnapshot, RunMetrics};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// An aggregated value a threshold can be declared against.
///
/// Latency metrics are expressed in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    ErrorRate,
    Count,
    Throughput,
    LatencyAvg,
    LatencyMin,
    LatencyMax,
    LatencyQuantile(f64),
}

impl Metric {
    /// Resolves a full selector such as `error_rate`, `http_req_failed.rate` or
    /// `http_req_duration.p(95)`.
    pub fn parse(selector: &str) -> Result<Self, ConfigError> {
        let selector = selector.trim();
        if let Some(metric) = bare_metric(selector) {
            return Ok(metric);
        }
        if let Some((name, aggregation)) = selector.split_once('.') {
            return Self::from_parts(name, aggregation);
        }
        Err(ConfigError::UnknownMetric {
            metric: selector.to_string(),
        })
    }

    /// Resolves a metric name plus aggregation, e.g. (`http_req_duration`, `p(95)`).
    pub fn from_parts(name: &str, aggregation: &str) -> Result<Self, ConfigError> {
        let aggregation = aggregation.trim();
        let metric = match name.trim() {
            "http_req_failed" if aggregation == "rate" => Some(Self::ErrorRate),
            "http_reqs" if aggregation == "count" => Some(Self::Count),
            "http_reqs" if aggregation == "rate" => Some(Self::Throughput),
            "http_req_duration" => latency_aggregation(aggregation),
            _ => None,
        };

        metric.ok_or_else(|| ConfigError::UnknownMetric {
            metric: format!("{}.{aggregation}", name.trim()),
        })
    }

    pub fn value(&self, snapshot: &MetricsSnapshot) -> f64 {
        let ms = |d: Duration| d.as_secs_f64() * 1e3;
        match self {
            Self::ErrorRate => snapshot.error_rate(),
            Self::Count => snapshot.count() as f64,
            Self::Throughput => snapshot.throughput(),
            Self::LatencyAvg => ms(snapshot.latency_mean()),
            Self::LatencyMin => ms(snapshot.latency_min()),
            Self::LatencyMax => ms(snapshot.latency_max()),
            Self::LatencyQuantile(q) => ms(snapshot.latency(*q)),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorRate => write!(f, "http_req_failed.rate"),
            Self::Count => write!(f, "http_reqs.count"),
            Self::Throughput => write!(f, "http_reqs.rate"),
            Self::LatencyAvg => write!(f, "http_req_duration.avg"),
            Self::LatencyMin => write!(f, "http_req_duration.min"),
            Self::LatencyMax => write!(f, "http_req_duration.max"),
            Self::LatencyQuantile(q) => {
                write!(f, "http_req_duration.p({})", (q * 1e6).round() / 1e4)
            }
        }
    }
}

fn bare_metric(selector: &str) -> Option<Metric> {
    match selector {
        "error_rate" => Some(Metric::ErrorRate),
        "count" => Some(Metric::Count),
        "throughput" => Some(Metric::Throughput),
        other => latency_aggregation(other),
    }
}

fn latency_aggregation(aggregation: &str) -> Option<Metric> {
    let percentile = match aggregation {
        "avg" => return Some(Metric::LatencyAvg),
        "min" => return Some(Metric::LatencyMin),
        "max" => return Some(Metric::LatencyMax),
        "med" => return Some(Metric::LatencyQuantile(0.5)),
        other => other
            .strip_prefix("p(")
            .and_then(|p| p.strip_suffix(')'))
            .or_else(|| other.strip_prefix('p'))?,
    };

    match percentile.trim().parse::<f64>() {
        // Rounded to 1e-6 so `p(99.9)` is exactly 0.999.
        Ok(p) if (0. ..=100.).contains(&p) => {
            Some(Metric::LatencyQuantile((p * 1e4).round() / 1e6))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
}

impl Comparison {
    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Le => observed <= bound,
            Self::Gt => observed > bound,
            Self::Ge => observed >= bound,
            Self::Eq => observed == bound,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
        }
    }

    /// Splits `lhs <op> rhs` at the first comparison operator.
    fn split(expression: &str) -> Option<(&str, Self, &str)> {
        let bytes = expression.as_bytes();
        let idx = bytes.iter().position(|b| matches!(b, b'<' | b'>' | b'='))?;
        let followed_by_eq = bytes.get(idx + 1) == Some(&b'=');

        let (op, len) = match (bytes[idx], followed_by_eq) {
            (b'<', true) => (Self::Le, 2),
            (b'<', false) => (Self::Lt, 1),
            (b'>', true) => (Self::Ge, 2),
            (b'>', false) => (Self::Gt, 1),
            (b'=', true) => (Self::Eq, 2),
            _ => return None,
        };

        Some((&expression[..idx], op, &expression[idx + len..]))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `metric <op> bound` assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: Metric,
    pub comparison: Comparison,
    pub bound: f64,
    /// Restricts evaluation to one workload's metrics.
    pub scenario: Option<String>,
    /// Evaluate while the run is in progress and abort on the first violation.
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
    /// Source text, kept for reporting.
    pub expression: String,
}

impl Threshold {
    pub fn new(metric: Metric, comparison: Comparison, bound: f64) -> Self {
        Self {
            metric,
            comparison,
            bound,
            scenario: None,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
            expression: format!("{metric}{comparison}{bound}"),
        }
    }

    /// Parses a full expression such as `error_rate < 0.01` or `http_req_duration.p(95)<300`.
    pub fn parse(expression: &str) -> Result<Self, ConfigError> {
        let (selector, comparison, bound) = split_expression(expression)?;
        Ok(Self {
            expression: expression.trim().to_string(),
            ..Self::new(Metric::parse(selector)?, comparison, bound)
        })
    }

    /// Parses one entry of a threshold map: `metric_key` is the map key (optionally scoped as
    /// `metric{scenario:name}`) and `expression` an aggregation expression like `p(95)<300`.
    pub fn parse_entry(metric_key: &str, expression: &str) -> Result<Self, ConfigError> {
        let (name, scenario) = split_metric_key(metric_key)?;
        let expression = expression.trim();

        // `error_rate: ["<0.01"]` names the whole selector in the key.
        let threshold = if expression.starts_with(['<', '>', '=']) {
            Self::parse(&format!("{name} {expression}"))?
        } else {
            let (aggregation, comparison, bound) = split_expression(expression)?;
            Self::new(Metric::from_parts(name, aggregation)?, comparison, bound)
        };

        Ok(Self {
            scenario,
            expression: format!("{}: {expression}", metric_key.trim()),
            ..threshold
        })
    }

    pub fn scoped(mut self, scenario: &str) -> Self {
        self.scenario = Some(scenario.to_string());
        self
    }

    pub fn abort_on_fail(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }

    /// Returns the violation if `snapshot` does not satisfy this threshold.
    pub fn check(&self, snapshot: &MetricsSnapshot) -> Option<Violation> {
        let observed = self.metric.value(snapshot);
        if self.comparison.holds(observed, self.bound) {
            None
        } else {
            Some(Violation {
                threshold: self.clone(),
                observed,
            })
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn split_expression(expression: &str) -> Result<(&str, Comparison, f64), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidThreshold {
        expression: expression.to_string(),
        reason: reason.to_string(),
    };

    let (lhs, comparison, rhs) =
        Comparison::split(expression).ok_or_else(|| invalid("missing comparison operator"))?;
    let lhs = lhs.trim();
    if lhs.is_empty() {
        return Err(invalid("missing metric"));
    }
    let bound = rhs
        .trim()
        .parse::<f64>()
        .map_err(|_| invalid("bound is not a number"))?;
    if !bound.is_finite() {
        return Err(invalid("bound must be finite"));
    }

    Ok((lhs, comparison, bound))
}

fn split_metric_key(key: &str) -> Result<(&str, Option<String>), ConfigError> {
    let key = key.trim();
    let Some((name, selector)) = key.split_once('{') else {
        return Ok((key, None));
    };

    let invalid = |reason: &str| ConfigError::InvalidThreshold {
        expression: key.to_string(),
        reason: reason.to_string(),
    };

    let selector = selector
        .strip_suffix('}')
        .ok_or_else(|| invalid("unterminated tag selector"))?;
    let (tag, value) = selector
        .split_once(':')
        .or_else(|| selector.split_once('='))
        .ok_or_else(|| invalid("tag selector must look like `{scenario:name}`"))?;

    if tag.trim() != "scenario" {
        return Err(invalid("only the `scenario` tag can be selected"));
    }
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid("empty scenario name"));
    }

    Ok((name.trim(), Some(value.to_string())))
}

/// A threshold that did not hold, with the value that was measured.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub threshold: Threshold,
    pub observed: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (observed {:.4})", self.threshold, self.observed)
    }
}

/// Checks every threshold against one snapshot, ignoring scopes. An empty result is a pass.
pub fn evaluate(snapshot: &MetricsSnapshot, thresholds: &[Threshold]) -> Vec<Violation> {
    thresholds.iter().filter_map(|t| t.check(snapshot)).collect()
}

/// Checks every threshold against the snapshot it is scoped to.
pub fn evaluate_run(metrics: &RunMetrics, thresholds: &[Threshold]) -> Vec<Violation> {
    thresholds
        .iter()
        .filter_map(|t| t.check(metrics.for_scope(t.scenario.as_deref())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RequestOutcome, Response};
    use std::time::Instant;

    fn snapshot_with(count: u64, errors: u64) -> MetricsSnapshot {
        let mut s = MetricsSnapshot::empty().with_elapsed(Duration::from_secs(1));
        for idx in 0..count {
            let failed = idx < errors;
            s.record(&RequestOutcome {
                timestamp: Instant::now(),
                latency: Duration::from_millis(10),
                response: Response::Status(if failed { 500 } else { 200 }),
                success: !failed,
            })
            .unwrap();
        }
        s
    }

    #[test]
    fn error_rate_threshold() {
        let threshold = Threshold::parse("error_rate < 0.01").unwrap();

        let violations = evaluate(&snapshot_with(100, 2), &[threshold.clone()]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].observed, 0.02);

        assert!(evaluate(&snapshot_with(1000, 5), &[threshold]).is_empty());
    }

    #[test]
    fn parses_selectors() {
        assert_eq!(
            Metric::parse("http_req_failed.rate").unwrap(),
            Metric::ErrorRate
        );
        assert_eq!(Metric::parse("http_reqs.count").unwrap(), Metric::Count);
        assert_eq!(Metric::parse("http_reqs.rate").unwrap(), Metric::Throughput);
        assert_eq!(
            Metric::parse("http_req_duration.p(95)").unwrap(),
            Metric::LatencyQuantile(0.95)
        );
        assert_eq!(
            Metric::parse("http_req_duration.p(99.9)").unwrap(),
            Metric::LatencyQuantile(0.999)
        );
        assert_eq!(
            Metric::parse("http_req_duration.p(99.99)").unwrap(),
            Metric::LatencyQuantile(0.9999)
        );
        assert_eq!(Metric::parse("p99").unwrap(), Metric::LatencyQuantile(0.99));
        assert_eq!(Metric::parse("med").unwrap(), Metric::LatencyQuantile(0.5));
        assert_eq!(
            Metric::parse("http_req_duration.avg").unwrap(),
            Metric::LatencyAvg
        );
    }

    #[test]
    fn unknown_metric_is_a_config_error() {
        assert!(matches!(
            Threshold::parse("iterations < 10"),
            Err(ConfigError::UnknownMetric { .. })
        ));
        assert!(matches!(
            Threshold::parse("http_req_duration.p(150) < 10"),
            Err(ConfigError::UnknownMetric { .. })
        ));
        assert!(matches!(
            Threshold::parse_entry("http_req_failed", "count<1"),
            Err(ConfigError::UnknownMetric { .. })
        ));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["error_rate", "error_rate = 1", "< 3", "error_rate < x", "p95 < inf"] {
            assert!(
                matches!(
                    Threshold::parse(expr),
                    Err(ConfigError::InvalidThreshold { .. })
                ),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn every_operator() {
        let s = snapshot_with(10, 0);
        let check = |expr: &str| evaluate(&s, &[Threshold::parse(expr).unwrap()]).is_empty();

        assert!(check("count == 10"));
        assert!(check("count >= 10"));
        assert!(check("count <= 10"));
        assert!(!check("count > 10"));
        assert!(!check("count < 10"));
        assert!(check("p(95) < 11"));
        assert!(!check("http_req_duration.max <= 9"));
    }

    #[test]
    fn parses_map_entries() {
        let t = Threshold::parse_entry("http_req_duration", "p(95)<300").unwrap();
        assert_eq!(t.metric, Metric::LatencyQuantile(0.95));
        assert_eq!(t.comparison, Comparison::Lt);
        assert_eq!(t.bound, 300.);
        assert_eq!(t.scenario, None);
        assert_eq!(t.to_string(), "http_req_duration: p(95)<300");

        let t = Threshold::parse_entry("http_req_failed{scenario:smoke}", "rate<0.01").unwrap();
        assert_eq!(t.metric, Metric::ErrorRate);
        assert_eq!(t.scenario.as_deref(), Some("smoke"));

        let t = Threshold::parse_entry("error_rate", "<= 0.05").unwrap();
        assert_eq!(t.metric, Metric::ErrorRate);
        assert_eq!(t.comparison, Comparison::Le);

        assert!(Threshold::parse_entry("http_req_failed{method:GET}", "rate<0.01").is_err());
        assert!(Threshold::parse_entry("http_req_failed{scenario:smoke", "rate<0.01").is_err());
    }
}
