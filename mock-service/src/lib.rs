use axum::{debug_handler, extract::Path, http::StatusCode, routing::get, Router};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lazy_static::lazy_static;
use metrics::counter;
use rand_distr::{Distribution, SkewNormal};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Health-check style target for load tests.
///
/// - `/health`: 200
/// - `/status/:code`: responds with `code`
/// - `/delay/ms/:delay_ms`: 200 after a fixed delay
/// - `/jitter/ms/:mean_ms`: 200 after a skewed random delay around `mean_ms`
/// - `/limited/:max_rps/name/:name`: 429 once `name` exceeds `max_rps`
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/", get(health))
        .route("/status/:code", get(status))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/jitter/ms/:mean_ms", get(jitter))
        .route("/limited/:max_rps/name/:name", get(limited))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener).await
}

pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    debug!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router()).await?;
    Ok(())
}

#[debug_handler]
async fn health() -> &'static str {
    counter!("mock_service.requests", "route" => "health").increment(1);
    "ok"
}

#[debug_handler]
async fn status(Path(code): Path<u16>) -> StatusCode {
    counter!("mock_service.requests", "route" => "status").increment(1);
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

#[debug_handler]
async fn delay(Path(delay_ms): Path<u64>) {
    counter!("mock_service.requests", "route" => "delay").increment(1);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[debug_handler]
async fn jitter(Path(mean_ms): Path<u64>) -> Result<(), StatusCode> {
    counter!("mock_service.requests", "route" => "jitter").increment(1);
    let mean = mean_ms as f64;
    let normal = SkewNormal::new(mean, mean / 4., 4.).map_err(|_| StatusCode::BAD_REQUEST)?;
    let v: f64 = normal.sample(&mut rand::thread_rng()).max(0.);
    tokio::time::sleep(Duration::from_secs_f64(v / 1e3)).await;
    Ok(())
}

lazy_static! {
    static ref LIMITED_MAP: Arc<RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

#[debug_handler]
async fn limited(Path((max_rps, name)): Path<(u32, String)>) -> StatusCode {
    counter!("mock_service.requests", "route" => "limited").increment(1);
    let Some(max_rps) = NonZeroU32::new(max_rps) else {
        return StatusCode::BAD_REQUEST;
    };

    let read = LIMITED_MAP
        .read()
        .ok()
        .and_then(|map| map.get(&name).cloned());
    let limiter = match read {
        Some(limiter) => limiter,
        None => {
            let limiter = Arc::new(RateLimiter::direct(Quota::per_second(max_rps)));
            if let Ok(mut map) = LIMITED_MAP.write() {
                map.entry(name).or_insert_with(|| limiter.clone()).clone()
            } else {
                limiter
            }
        }
    };

    match limiter.check() {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::TOO_MANY_REQUESTS,
    }
}
