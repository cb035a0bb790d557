//! HTTP requester abstraction for UPnP device communication
//!
//! The description builder and the event handler never talk to a concrete
//! HTTP client. They send an [`HttpRequest`] through a [`Requester`] and get
//! an [`HttpResponse`] back, whatever the status code. Connectivity failures
//! are reported as distinct [`RequesterError`] kinds so callers can tell an
//! offline device from a device that answered with an error.
//!
//! [`ReqwestRequester`] is the default implementation.

mod error;

pub use error::RequesterError;
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use async_trait::async_trait;
use std::time::Duration;

/// Convenience Result alias for requester operations.
pub type Result<T> = std::result::Result<T, RequesterError>;

/// An HTTP request towards (or from) a UPnP device.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method, may be an extension method such as `SUBSCRIBE` or `NOTIFY`
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Add a header, silently skipping names or values that are not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => tracing::debug!("Skipping invalid header {}: {}", name, value),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The response to an [`HttpRequest`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Add a header; invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::debug!("Skipping invalid response header {}", name),
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Turn a non-2xx response into [`RequesterError::Response`].
    pub fn error_for_status(self) -> Result<Self> {
        if (200..300).contains(&self.status) {
            Ok(self)
        } else {
            Err(RequesterError::Response {
                status: self.status,
                headers: self.headers,
                body: self.body,
            })
        }
    }
}

/// Performs HTTP requests on behalf of the description builder and event handler.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Send `request` and return the response for any status code.
    async fn http_request(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Requester`] backed by an async `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestRequester {
    client: reqwest::Client,
}

impl ReqwestRequester {
    /// Default timeout for a single request
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a requester with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// Create a requester whose requests time out after `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RequesterError::InvalidRequest(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn map_error(error: reqwest::Error) -> RequesterError {
        if error.is_timeout() {
            RequesterError::Timeout(error.to_string())
        } else if error.is_builder() {
            RequesterError::InvalidRequest(error.to_string())
        } else {
            RequesterError::Connection(error.to_string())
        }
    }
}

#[async_trait]
impl Requester for ReqwestRequester {
    async fn http_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| RequesterError::InvalidRequest(format!("{}: {e}", request.method)))?;

        tracing::debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(Self::map_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(Self::map_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body: if body.is_empty() { None } else { Some(body) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::new("SUBSCRIBE", "http://192.168.1.2:1400/evt")
            .with_header("NT", "upnp:event")
            .with_header("TIMEOUT", "Second-1800")
            .with_header("bad header", "x");

        assert_eq!(request.header("nt"), Some("upnp:event"));
        assert_eq!(request.header("Timeout"), Some("Second-1800"));
        assert_eq!(request.headers.len(), 2);
        assert!(request.body.is_none());
    }

    #[rstest]
    #[case(200, true)]
    #[case(204, true)]
    #[case(400, false)]
    #[case(412, false)]
    #[case(500, false)]
    fn test_error_for_status(#[case] status: u16, #[case] ok: bool) {
        assert_eq!(HttpResponse::new(status).error_for_status().is_ok(), ok);
    }

    #[tokio::test]
    async fn test_custom_method_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("SUBSCRIBE", "/evt")
            .match_header("nt", "upnp:event")
            .with_status(200)
            .with_header("SID", "uuid:sub-1")
            .with_header("TIMEOUT", "Second-300")
            .create_async()
            .await;

        let requester = ReqwestRequester::new().unwrap();
        let request = HttpRequest::new("SUBSCRIBE", format!("{}/evt", server.url()))
            .with_header("NT", "upnp:event");
        let response = requester.http_request(request).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, 200);
        assert_eq!(response.header("sid"), Some("uuid:sub-1"));
        assert_eq!(response.header("timeout"), Some("Second-300"));
    }

    #[tokio::test]
    async fn test_error_status_is_returned_not_raised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.xml")
            .with_status(404)
            .with_body("nope")
            .create_async()
            .await;

        let requester = ReqwestRequester::new().unwrap();
        let response = requester
            .http_request(HttpRequest::new("GET", format!("{}/missing.xml", server.url())))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_unreachable_device_is_connectivity_error() {
        let requester = ReqwestRequester::with_timeout(Duration::from_secs(2)).unwrap();
        let error = requester
            .http_request(HttpRequest::new("GET", "http://127.0.0.1:1/desc.xml"))
            .await
            .unwrap_err();
        assert!(error.is_connectivity(), "unexpected error: {error:?}");
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let requester = ReqwestRequester::new().unwrap();
        let error = requester
            .http_request(HttpRequest::new("BAD METHOD", "http://127.0.0.1/"))
            .await
            .unwrap_err();
        assert!(matches!(error, RequesterError::InvalidRequest(_)));
    }
}
