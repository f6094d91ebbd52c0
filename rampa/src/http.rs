//! HTTP requests issued from inside an iteration.
//!
//! [`HttpExecutor`] wraps a shared `reqwest` client, bounds every request with a
//! timeout and records what happened into the [`MetricsSink`]:
//!
//! - `http_reqs`: one per request, whatever the outcome;
//! - `http_req_duration`: latency in milliseconds of requests that got a response;
//! - `http_req_failed`: rate of requests that failed at the transport level;
//! - `transport_errors`: count of the same failures.
//!
//! A response with a 4xx or 5xx status is not a failure here. It is handed back to
//! the iteration, which decides with [`checks`](crate::check) whether it is acceptable.
use std::{borrow::Cow, time::Duration};

use bytes::Bytes;
use reqwest::{Client, Method, header::HeaderMap};
use tokio::time::Instant;

use crate::{error::TransportError, metric::names, metrics::MetricsSink};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub latency: Duration,
}

impl HttpResponse {
    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Issues single HTTP requests and records their outcome.
///
/// Clone it into the iteration closure; clones share the connection pool and the
/// metrics sink. Build it once, outside the iteration: creating a client per
/// request throws away connection reuse.
#[derive(Clone, Debug)]
pub struct HttpExecutor {
    client: Client,
    metrics: MetricsSink,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(metrics: MetricsSink) -> Result<Self, TransportError> {
        Self::with_timeout(metrics, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(metrics: MetricsSink, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self::with_client(client, metrics, timeout))
    }

    pub fn with_client(client: Client, metrics: MetricsSink, timeout: Duration) -> Self {
        Self {
            client,
            metrics,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` and read the whole response body.
    ///
    /// The timeout covers connecting, sending and reading the body.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.send(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        };
        let latency = start.elapsed();

        self.metrics.add(names::HTTP_REQS, 1.0);
        self.metrics.rate(names::HTTP_REQ_FAILED, outcome.is_err());
        match outcome {
            Ok((status, headers, body)) => {
                self.metrics
                    .record(names::HTTP_REQ_DURATION, latency.as_secs_f64() * 1_000.0);
                Ok(HttpResponse {
                    status,
                    headers,
                    body,
                    latency,
                })
            }
            Err(e) => {
                self.metrics.add(names::TRANSPORT_ERRORS, 1.0);
                tracing::debug!(error = %e, ?latency, "HTTP request failed");
                Err(e)
            }
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<(u16, HeaderMap, Bytes), TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok((status, headers, body))
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_builder() {
            TransportError::Request(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::mpsc,
    };

    use super::*;

    /// Answer every connection with `response`, forwarding the request head.
    async fn serve(response: &'static [u8]) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (addr, rx)
    }

    #[tokio::test]
    async fn server_errors_are_responses_not_failures() {
        let (addr, _) = serve(
            b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\noops",
        )
        .await;
        let metrics = MetricsSink::new();
        let http = HttpExecutor::new(metrics.clone()).unwrap();

        let response = http
            .execute(HttpRequest::get(format!("http://{addr}/api/stocks/42")))
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert!(!response.is_success());
        assert_eq!(response.text(), "oops");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(names::HTTP_REQS), 1.0);
        assert_eq!(snapshot.get(names::HTTP_REQ_FAILED).unwrap().rate, Some(0.0));
        assert_eq!(snapshot.counter(names::TRANSPORT_ERRORS), 0.0);
        assert_eq!(snapshot.get(names::HTTP_REQ_DURATION).unwrap().count, 1);
    }

    #[tokio::test]
    async fn sends_method_and_headers() {
        let (addr, mut requests) =
            serve(b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n").await;
        let http = HttpExecutor::new(MetricsSink::new()).unwrap();

        let response = http
            .execute(
                HttpRequest::new(Method::POST, format!("http://{addr}/orders"))
                    .header("x-request-id", "abc123")
                    .body("{}"),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert!(response.is_success());

        let head = requests.recv().await.unwrap().to_lowercase();
        assert!(head.starts_with("post /orders http/1.1"), "{head}");
        assert!(head.contains("x-request-id: abc123"), "{head}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let metrics = MetricsSink::new();
        let http = HttpExecutor::new(metrics.clone()).unwrap();
        let err = http
            .execute(HttpRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{err}");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counter(names::TRANSPORT_ERRORS), 1.0);
        assert_eq!(snapshot.get(names::HTTP_REQ_FAILED).unwrap().rate, Some(1.0));
        assert!(snapshot.get(names::HTTP_REQ_DURATION).is_none());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and hold connections without ever answering
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timeout = Duration::from_millis(200);
        let http = HttpExecutor::with_timeout(MetricsSink::new(), timeout).unwrap();
        let start = Instant::now();
        let err = http
            .execute(HttpRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(t) if t == timeout), "{err}");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn malformed_url_is_a_request_error() {
        let http = HttpExecutor::new(MetricsSink::new()).unwrap();
        let err = http
            .execute(HttpRequest::get("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Request(_)), "{err}");
    }
}
