mod utils;

use barrage::prelude::*;
use barrage_core::{AbortReason, FailureReason};
use std::time::Duration;
use utils::base_url;

fn scenario(document: &str) -> ScenarioSpec {
    ScenarioDocument::parse(document)
        .unwrap()
        .resolve(Some(base_url()))
        .unwrap()
}

async fn run(spec: ScenarioSpec) -> RunResult {
    RunController::new(spec)
        .unwrap()
        .tick_interval(Duration::from_millis(100))
        .run()
        .await
        .unwrap()
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn healthy_target_passes() {
    let spec = scenario(
        r#"
name: healthy
vus: 5
duration: 1s
sleep: 100ms
request: { path: /health }
thresholds:
  http_req_failed: ["rate<0.01"]
  http_req_duration: ["p(95)<1000"]
"#,
    );

    let result = run(spec).await;
    let total = &result.metrics.total;

    assert!(result.passed, "{:?}", result.violations);
    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.exit_code(), 0);
    assert!(total.count() >= 5, "{} requests", total.count());
    assert_eq!(total.error_rate(), 0.);
    assert_eq!(total.statuses().get(&200), Some(&total.count()));
    assert_eq!(total.latency_samples(), total.count());
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn failing_target_fails_thresholds() {
    let spec = scenario(
        r#"
name: broken
vus: 2
duration: 500ms
sleep: 50ms
request: { path: /status/500 }
thresholds:
  http_req_failed: ["rate<0.01"]
"#,
    );

    let result = run(spec).await;
    let total = &result.metrics.total;

    assert!(!result.passed);
    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.exit_code(), 99);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].observed, 1.0);
    assert_eq!(
        total.failures().get(&FailureReason::UnexpectedStatus(500)),
        Some(&total.count())
    );
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn expected_status_overrides_success() {
    let spec = scenario(
        r#"
vus: 1
duration: 300ms
sleep: 50ms
request:
  path: /status/404
  expectedStatus: 404
thresholds:
  http_req_failed: ["rate==0"]
"#,
    );

    let result = run(spec).await;

    assert!(result.passed, "{:?}", result.violations);
    assert!(result.metrics.total.count() > 0);
    assert_eq!(result.metrics.total.errors(), 0);
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn ramping_never_exceeds_stage_targets() {
    let spec = scenario(
        r#"
sleep: 20ms
startVUs: 0
stages:
  - { duration: 600ms, target: 4 }
  - { duration: 400ms, target: 0 }
"#,
    );

    let controller = RunController::new(spec)
        .unwrap()
        .tick_interval(Duration::from_millis(20));
    let monitor = controller.monitor();
    let run = tokio::spawn(controller.run());

    let mut peak = 0;
    while !run.is_finished() {
        let progress = monitor.progress();
        peak = peak.max(progress.active_vus.get("default").copied().unwrap_or(0));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result = run.await.unwrap().unwrap();

    assert!((1..=4).contains(&peak), "peak of {peak} virtual users");
    assert_eq!(result.state, RunState::Completed);
    assert_eq!(monitor.state(), RunState::Completed);
    assert!(result.metrics.total.count() > 0);
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn external_abort_drains_and_reports() {
    let spec = scenario(
        r#"
vus: 3
duration: 1m
sleep: 50ms
"#,
    );

    let controller = RunController::new(spec).unwrap();
    let abort = controller.abort_handle();
    let run = tokio::spawn(controller.run());

    tokio::time::sleep(Duration::from_millis(300)).await;
    abort.abort();
    let result = run.await.unwrap().unwrap();

    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.abort_reason, Some(AbortReason::Interrupted));
    assert_eq!(result.exit_code(), 105);
    assert!(result.duration < Duration::from_secs(10));
    assert!(result.metrics.total.count() > 0);

    let report = Report::new(&result, &[]);
    assert!(report.to_string().contains("aborted: interrupted"));
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn breached_abort_threshold_stops_the_run() {
    let spec = scenario(
        r#"
vus: 2
duration: 1m
sleep: 20ms
request: { path: /status/503 }
thresholds:
  http_req_failed:
    - threshold: "rate<0.5"
      abortOnFail: true
      delayAbortEval: 100ms
"#,
    );

    let result = run(spec).await;

    assert_eq!(result.state, RunState::Aborted);
    assert!(matches!(
        result.abort_reason,
        Some(AbortReason::Threshold(_))
    ));
    assert_eq!(result.exit_code(), 99);
    assert!(result.duration < Duration::from_secs(10));
    assert_eq!(result.violations.len(), 1);
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn scoped_thresholds_only_see_their_workload() {
    let spec = scenario(
        r#"
name: mixed
sleep: 50ms
scenarios:
  ok:
    vus: 2
    duration: 500ms
    request: { path: /health }
  bad:
    vus: 1
    duration: 300ms
    request: { path: /status/500 }
thresholds:
  "http_req_failed{scenario:ok}": ["rate<0.01"]
"#,
    );
    let thresholds = spec.thresholds.clone();

    let result = run(spec).await;
    let workloads = &result.metrics.workloads;

    assert!(result.passed, "{:?}", result.violations);
    assert_eq!(workloads.len(), 2);
    assert_eq!(workloads["ok"].error_rate(), 0.);
    assert_eq!(workloads["bad"].error_rate(), 1.);
    assert!(result.metrics.total.error_rate() > 0.);
    assert_eq!(
        result.metrics.total.count(),
        workloads["ok"].count() + workloads["bad"].count()
    );

    let report = Report::new(&result, &thresholds);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["scenario"], "mixed");
    assert_eq!(json["passed"], true);
    assert_eq!(json["thresholds"][0]["scenario"], "ok");
}

#[tokio::test]
#[ntest::timeout(20_000)]
async fn rate_cap_keeps_under_server_limit() {
    let capped = scenario(
        r#"
vus: 4
duration: 1s
sleep: 10ms
rps: 5
request: { path: /limited/10/name/capped }
"#,
    );
    let result = run(capped).await;
    let total = &result.metrics.total;

    assert!(result.passed);
    assert!(total.count() > 0 && total.count() <= 8, "{} requests", total.count());
    assert_eq!(total.error_rate(), 0.);

    let uncapped = scenario(
        r#"
vus: 4
duration: 1s
sleep: 10ms
request: { path: /limited/10/name/uncapped }
"#,
    );
    let result = run(uncapped).await;
    let total = &result.metrics.total;

    assert!(total.count() > 20, "{} requests", total.count());
    assert!(total.error_rate() > 0.);
    assert!(total
        .failures()
        .contains_key(&FailureReason::UnexpectedStatus(429)));
}
