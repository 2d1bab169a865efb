mod utils;

use barrage::RequestExecutor;
use barrage_core::{
    ExpectedStatus, FailureReason, RequestTemplate, Response, TransportError, Workload,
};
use barrage_core::{Executor, MetricsSnapshot};
use reqwest::{Client, Url};
use std::time::Duration;
use utils::base_url;

fn executor(request: RequestTemplate, timeout: Duration) -> RequestExecutor {
    let base_url = Url::parse(&base_url()).unwrap();
    let workload = Workload::new("probe", Executor::constant(1, Duration::from_secs(1)))
        .request(request)
        .timeout(timeout);
    RequestExecutor::new(Client::new(), &base_url, &workload).unwrap()
}

#[tracing_test::traced_test]
#[tokio::test]
#[ntest::timeout(10_000)]
async fn classifies_responses() {
    let ok = executor(RequestTemplate::get("/health"), Duration::from_secs(5))
        .execute()
        .await;
    assert_eq!(ok.response, Response::Status(200));
    assert!(ok.success);
    assert_eq!(ok.failure(), None);

    let server_error = executor(RequestTemplate::get("/status/500"), Duration::from_secs(5))
        .execute()
        .await;
    assert_eq!(server_error.status(), Some(500));
    assert!(!server_error.success);
    assert_eq!(
        server_error.failure(),
        Some(FailureReason::UnexpectedStatus(500))
    );

    let not_found = executor(
        RequestTemplate::get("/status/404").expect(ExpectedStatus::Codes(vec![404])),
        Duration::from_secs(5),
    )
    .execute()
    .await;
    assert!(not_found.success);
}

#[tracing_test::traced_test]
#[tokio::test]
#[ntest::timeout(10_000)]
async fn slow_response_times_out() {
    let outcome = executor(
        RequestTemplate::get("/delay/ms/2000"),
        Duration::from_millis(100),
    )
    .execute()
    .await;

    assert_eq!(outcome.response, Response::Transport(TransportError::Timeout));
    assert!(!outcome.success);
    assert!(outcome.latency >= Duration::from_millis(100));
    assert!(outcome.latency < Duration::from_millis(2000));

    let mut snapshot = MetricsSnapshot::empty();
    snapshot.record(&outcome).unwrap();
    assert_eq!(snapshot.errors(), 1);
    assert_eq!(snapshot.latency_samples(), 0);
    assert_eq!(snapshot.failures().get(&FailureReason::Timeout), Some(&1));
}

#[tracing_test::traced_test]
#[tokio::test]
#[ntest::timeout(10_000)]
async fn jittered_latency_is_recorded() {
    let executor = executor(RequestTemplate::get("/jitter/ms/20"), Duration::from_secs(5));

    let mut snapshot = MetricsSnapshot::empty();
    for _ in 0..20 {
        snapshot.record(&executor.execute().await).unwrap();
    }

    assert_eq!(snapshot.count(), 20);
    assert_eq!(snapshot.errors(), 0);
    assert!(snapshot.latency_min() >= Duration::from_millis(1));
    assert!(snapshot.p50() <= snapshot.p95());
    assert!(snapshot.p95() <= snapshot.latency_max());
}
