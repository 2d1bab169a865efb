//! Per-workload `metrics` handles. Compiled to no-ops without the `metrics` feature.
use barrage_core::RequestOutcome;

#[cfg(feature = "metrics")]
#[derive(Clone)]
pub(crate) struct Telemetry {
    requests: metrics::Counter,
    failures: metrics::Counter,
    latency: metrics::Histogram,
    active_vus: metrics::Gauge,
}

#[cfg(feature = "metrics")]
impl Telemetry {
    pub fn new(workload: &str) -> Self {
        metrics::describe_counter!("barrage_http_reqs", "Requests issued.");
        metrics::describe_counter!("barrage_http_req_failed", "Requests classified as failures.");
        metrics::describe_histogram!(
            "barrage_http_req_duration",
            metrics::Unit::Seconds,
            "Send to full-response latency."
        );
        metrics::describe_gauge!("barrage_vus", "Active virtual users.");

        Self {
            requests: metrics::counter!("barrage_http_reqs", "scenario" => workload.to_string()),
            failures: metrics::counter!("barrage_http_req_failed", "scenario" => workload.to_string()),
            latency: metrics::histogram!("barrage_http_req_duration", "scenario" => workload.to_string()),
            active_vus: metrics::gauge!("barrage_vus", "scenario" => workload.to_string()),
        }
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        self.requests.increment(1);
        if !outcome.success {
            self.failures.increment(1);
        }
        if outcome.status().is_some() {
            self.latency.record(outcome.latency.as_secs_f64());
        }
    }

    pub fn set_active_vus(&self, active: usize) {
        self.active_vus.set(active as f64);
    }
}

#[cfg(not(feature = "metrics"))]
#[derive(Clone)]
pub(crate) struct Telemetry;

#[cfg(not(feature = "metrics"))]
impl Telemetry {
    pub fn new(_workload: &str) -> Self {
        Self
    }

    pub fn record(&self, _outcome: &RequestOutcome) {}

    pub fn set_active_vus(&self, _active: usize) {}
}
