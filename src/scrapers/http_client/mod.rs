//! HTTP transport used by the fetch orchestrator.
//!
//! The orchestrator talks to a `Transport`, which performs exactly one HTTP
//! request per call. `HttpClient` is the reqwest-backed implementation; tests
//! substitute scripted transports.

pub mod identity;
mod response;

pub use response::{parse_retry_after, FetchRequest, HttpResponse, Method};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;

use super::error::FetchError;

/// A single-request HTTP transport.
///
/// Implementations return `Ok` for every HTTP response (whatever its status)
/// and `Err` only for transport faults.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &FetchRequest,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, FetchError>;
}

fn extract_response_headers(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

/// Builder for constructing `HttpClient`.
pub struct HttpClientBuilder {
    timeout: Duration,
    max_idle_per_host: usize,
    follow_redirects: bool,
}

impl HttpClientBuilder {
    /// Maximum idle keep-alive connections per host.
    pub fn max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Build the `HttpClient`.
    pub fn build(self) -> Result<HttpClient, FetchError> {
        let redirect = if self.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .redirect(redirect)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| FetchError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpClient { client })
    }
}

/// reqwest-backed transport.
///
/// Each request carries its own timeout; a timeout surfaces as
/// `FetchError::Timeout` so the retry executor treats it as transient.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a builder with the per-request timeout.
    pub fn builder(timeout: Duration) -> HttpClientBuilder {
        HttpClientBuilder {
            timeout,
            max_idle_per_host: 5,
            follow_redirects: true,
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(
        &self,
        request: &FetchRequest,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, FetchError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let response_headers = extract_response_headers(&response);
        let body = response.bytes().await?.to_vec();

        debug!(
            "{} {} -> {} ({} bytes, {:?})",
            request.method.as_str(),
            request.url,
            status,
            body.len(),
            start.elapsed()
        );

        Ok(HttpResponse::new(status, response_headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_basic() {
        let client = HttpClient::builder(Duration::from_secs(5))
            .max_idle_per_host(2)
            .follow_redirects(false)
            .build();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_advertised_encodings_are_decoded() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        // zlib stream of "hello"
        const DEFLATED: &[u8] = &[120, 156, 203, 72, 205, 201, 201, 7, 0, 6, 44, 2, 21];

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Encoding: deflate\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n",
                DEFLATED.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(DEFLATED).await.unwrap();
        });

        let client = HttpClient::builder(Duration::from_secs(5)).build().unwrap();
        let headers = identity::browser_headers(None, None);
        assert!(headers["Accept-Encoding"].contains("deflate"));

        let request = FetchRequest::get(format!("http://{}/", addr));
        let response = client.send(&request, &headers).await.unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body, b"hello");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = HttpClient::builder(Duration::from_secs(2)).build().unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let request = FetchRequest::get("http://127.0.0.1:9/");
        let err = client.send(&request, &HashMap::new()).await.unwrap_err();
        assert!(err.is_transient(), "expected transient error, got {:?}", err);
    }
}
