//! HTTP request and response types exchanged with a `Transport`.

use std::collections::HashMap;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// HTTP method for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
        }
    }
}

/// Description of a single outbound request.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    /// Extra headers; these override generated identity headers.
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub referer: Option<String>,
    /// Accept header override (defaults to an HTML accept string).
    pub accept: Option<String>,
}

impl FetchRequest {
    /// A GET request for the given URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// A POST request with a JSON body.
    pub fn post_json<T: serde::Serialize + ?Sized>(
        url: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Ok(Self {
            method: Method::Post,
            url: url.into(),
            headers,
            body: Some(serde_json::to_vec(body)?),
            referer: None,
            accept: Some("application/json".to_string()),
        })
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// HTTP response with a fully buffered body.
///
/// Header names are stored lowercase.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body,
        }
    }

    /// Check if the response is 304 Not Modified.
    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Get the ETag header.
    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    /// Get the Last-Modified header.
    pub fn last_modified(&self) -> Option<&str> {
        self.header("last-modified")
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Parse the Retry-After header (delta-seconds form only).
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        parse_retry_after(self.header("retry-after"))
    }

    /// Body decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Parse a Retry-After header value given in seconds.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<std::time::Duration> {
    header_value?
        .trim()
        .parse::<u64>()
        .ok()
        .map(std::time::Duration::from_secs)
}
