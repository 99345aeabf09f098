//! Raw request/response transport.
//!
//! The rest of the crate talks to the controller through the [`Transport`]
//! trait so the session logic can be exercised against an in-memory double.
//! [`HttpTransport`] is the real implementation on top of `reqwest`.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single outbound request. `path` includes the query string.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A raw reply: status, the `Set-Cookie` header if any, and the body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub set_cookie: Option<String>,
    pub body: Bytes,
}

/// Sends one request and returns the raw reply.
///
/// Implementations must be safe to call from many tasks at once without
/// mixing up requests and replies.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// `reqwest`-backed transport for `https://<host>`.
///
/// The underlying client pools connections and never interleaves two
/// requests on one connection.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport for `base_url` (e.g. `https://10.0.0.1`).
    ///
    /// `verify_tls = false` accepts self-signed controller certificates.
    pub fn new(base_url: impl Into<String>, verify_tls: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!verify_tls)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = ?request.method, path = %request.path, "sending request");
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let set_cookie = resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.bytes().await?;
        Ok(HttpResponse {
            status,
            set_cookie,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(self.execute(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let t = HttpTransport::new("https://10.0.0.1/", true).unwrap();
        assert_eq!(t.base_url(), "https://10.0.0.1");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest::get("/api/aaaRefresh.json").header("APIC-challenge", "U1");
        assert_eq!(req.header_value("apic-challenge"), Some("U1"));
        assert_eq!(req.header_value("Cookie"), None);
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let t = HttpTransport::new(format!("http://{addr}"), true).unwrap();
        let err = t.send(HttpRequest::get("/api/mo/uni.json?")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
    }
}
