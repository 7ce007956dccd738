//! Outbound HTTP used for discovery, JWKS, token and userinfo requests
//!
//! Requests go through the [`HttpTransport`] trait so the protocol engine
//! never depends on a concrete client. [`ReqwestTransport`] is the
//! production implementation; timeouts are its responsibility.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::ACCEPT};
use tracing::debug;

use crate::{Error, Result};

/// HTTP method subset needed by the OIDC flows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST with a form-encoded body
    Post,
}

/// A single outbound request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Form body (POST only)
    pub form: Vec<(String, String)>,
}

impl HttpRequest {
    /// Build a GET request
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
        }
    }

    /// Build a form POST request
    #[must_use]
    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            form,
        }
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of a form field, if present
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking request/response exchange with a remote server.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and return the raw response. Non-2xx statuses are
    /// returned, not raised.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an already configured client
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        builder = builder.header(ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Fetches provider documents, adding the client's custom headers to every
/// request.
#[derive(Clone)]
pub struct UrlFetcher {
    transport: Arc<dyn HttpTransport>,
    custom_headers: BTreeMap<String, String>,
}

impl UrlFetcher {
    /// Create a fetcher over `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, custom_headers: BTreeMap<String, String>) -> Self {
        Self {
            transport,
            custom_headers,
        }
    }

    /// GET `url` and return the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`] on a non-2xx status, or the transport
    /// error.
    pub async fn fetch_url(&self, url: &str, headers: &[(&str, &str)]) -> Result<String> {
        debug!(url, "Fetching URL");
        let mut request = HttpRequest::get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(Error::HttpStatus {
                status: response.status,
                url: url.to_string(),
            });
        }
        Ok(response.body)
    }

    /// POST a form to `url`, returning the response regardless of status.
    ///
    /// # Errors
    ///
    /// Returns the transport error.
    pub async fn post_form(&self, url: &str, form: Vec<(String, String)>) -> Result<HttpResponse> {
        debug!(url, "Posting form");
        self.send(HttpRequest::post_form(url, form)).await
    }

    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        for (name, value) in &self.custom_headers {
            if !request.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                request.headers.push((name.clone(), value.clone()));
            }
        }
        self.transport.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<HttpRequest>>,
        status: u16,
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().push(request);
            Ok(HttpResponse {
                status: self.status,
                body: "{}".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn custom_headers_added_without_overriding_explicit_ones() {
        let transport = Arc::new(RecordingTransport {
            status: 200,
            ..Default::default()
        });
        let headers = BTreeMap::from([
            ("X-Tenant".to_string(), "acme".to_string()),
            ("Authorization".to_string(), "Basic default".to_string()),
        ]);
        let fetcher = UrlFetcher::new(transport.clone(), headers);

        fetcher
            .fetch_url("https://idp.example/userinfo", &[("authorization", "Bearer abc")])
            .await
            .unwrap();

        let seen = transport.seen.lock();
        let sent = &seen[0].headers;
        assert!(sent.contains(&("X-Tenant".to_string(), "acme".to_string())));
        assert!(sent.contains(&("authorization".to_string(), "Bearer abc".to_string())));
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let transport = Arc::new(RecordingTransport {
            status: 503,
            ..Default::default()
        });
        let fetcher = UrlFetcher::new(transport, BTreeMap::new());

        let err = fetcher.fetch_url("https://idp.example/jwks", &[]).await.unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn post_form_returns_error_statuses() {
        let transport = Arc::new(RecordingTransport {
            status: 400,
            ..Default::default()
        });
        let fetcher = UrlFetcher::new(transport.clone(), BTreeMap::new());

        let response = fetcher
            .post_form(
                "https://idp.example/token",
                vec![("grant_type".into(), "authorization_code".into())],
            )
            .await
            .unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(
            transport.seen.lock()[0].form_value("grant_type"),
            Some("authorization_code")
        );
    }
}
