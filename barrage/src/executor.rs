//! Issues one HTTP request and classifies what came back.
use barrage_core::{
    ConfigError, ExpectedStatus, RequestOutcome, Response, TransportError, Workload,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::error::Error as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Something a virtual user can call once per iteration.
///
/// Implemented for [`RequestExecutor`] and for any `Fn() -> impl Future<Output = RequestOutcome>`
/// closure, which is how tests drive the engine without a network.
pub trait Requester: Clone + Send + Sync + 'static {
    type Future: Future<Output = RequestOutcome> + Send;

    fn send(&self) -> Self::Future;
}

impl<T, F> Requester for T
where
    T: Fn() -> F + Clone + Send + Sync + 'static,
    F: Future<Output = RequestOutcome> + Send,
{
    type Future = F;

    fn send(&self) -> F {
        self()
    }
}

/// HTTP request executor for one workload.
///
/// Cheap to clone; every clone shares the same connection pool.
#[derive(Clone, Debug)]
pub struct RequestExecutor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: Client,
    method: Method,
    url: Url,
    headers: HeaderMap,
    expected: ExpectedStatus,
    timeout: Duration,
}

impl RequestExecutor {
    /// Resolves the workload's request template against `base_url`.
    pub fn new(client: Client, base_url: &Url, workload: &Workload) -> Result<Self, ConfigError> {
        let template = &workload.request;
        let field = |suffix: &str| format!("scenarios.{}.request.{suffix}", workload.name);

        let method = Method::from_bytes(template.method.as_bytes()).map_err(|_| {
            ConfigError::invalid(
                field("method"),
                format!("`{}` is not an HTTP method", template.method),
            )
        })?;

        let raw = format!(
            "{}{}",
            base_url.as_str().trim_end_matches('/'),
            template.path
        );
        let url = Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { url: raw, source })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &template.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::invalid(field("headers"), format!("invalid header name `{name}`"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ConfigError::invalid(
                    field("headers"),
                    format!("invalid value for header `{name}`"),
                )
            })?;
            headers.append(name, value);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                method,
                url,
                headers,
                expected: template.expected_status.clone(),
                timeout: workload.timeout,
            }),
        })
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Sends the request and reads the full body. Never fails: every problem is encoded in the
    /// returned outcome.
    pub async fn execute(&self) -> RequestOutcome {
        let inner = &self.inner;
        let request = inner
            .client
            .request(inner.method.clone(), inner.url.clone())
            .headers(inner.headers.clone());

        let timestamp = Instant::now();
        let result = tokio::time::timeout(inner.timeout, async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            response.bytes().await?;
            Ok::<_, reqwest::Error>(status)
        })
        .await;
        let latency = timestamp.elapsed();

        let response = match result {
            Ok(Ok(status)) => Response::Status(status),
            Ok(Err(err)) => Response::Transport(classify(&err)),
            Err(_) => Response::Transport(TransportError::Timeout),
        };
        let success = matches!(response, Response::Status(code) if inner.expected.matches(code));

        RequestOutcome {
            timestamp,
            latency,
            response,
            success,
        }
    }
}

impl Requester for RequestExecutor {
    type Future = Pin<Box<dyn Future<Output = RequestOutcome> + Send>>;

    fn send(&self) -> Self::Future {
        let executor = self.clone();
        Box::pin(async move { executor.execute().await })
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    let mut dns = false;
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return TransportError::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return TransportError::Timeout,
                _ => {}
            }
        }
        dns |= cause.to_string().contains("dns error");
        source = cause.source();
    }

    if dns {
        TransportError::Dns
    } else if err.is_connect() {
        TransportError::Connect
    } else if err.is_body() || err.is_decode() {
        TransportError::Body
    } else {
        TransportError::Other
    }
}
