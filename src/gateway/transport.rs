//! Backend transport: dispatch one prepared request and normalize the result.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::request::{Method, PreparedRequest};
use crate::error::GatewayError;

/// Sends prepared requests to the backend.
///
/// Tests substitute deterministic fakes; production uses [`HttpTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dispatch once. 2xx yields the parsed JSON body (`Null` when empty);
    /// any other status yields [`GatewayError::Status`].
    async fn dispatch(&self, request: &PreparedRequest) -> Result<Value, GatewayError>;
}

/// Build an HTTP client with timeout applied.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    // Fall back to reqwest defaults if builder creation fails for any reason.
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("admin-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// reqwest-backed transport rooted at the backend base URL.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &PreparedRequest) -> Result<Value, GatewayError> {
        let url = self.url_for(&request.path);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::status(status.as_u16(), text));
        }
        parse_body(&text)
    }
}

fn parse_body(text: &str) -> Result<Value, GatewayError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
        .map_err(|err| GatewayError::InvalidResponse(format!("response body is not JSON: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::OneShotHttpServer;
    use serde_json::json;

    #[test]
    fn url_join_handles_slashes() {
        let transport = HttpTransport::new(reqwest::Client::new(), "http://host/base/");
        assert_eq!(transport.url_for("/api/admin"), "http://host/base/api/admin");
        assert_eq!(transport.url_for("api/admin"), "http://host/base/api/admin");
        assert_eq!(transport.url_for("https://other/x"), "https://other/x");
    }

    #[test]
    fn empty_body_parses_as_null() {
        assert_eq!(parse_body("  ").unwrap(), Value::Null);
        assert!(matches!(
            parse_body("<html>"),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_sends_headers_and_maps_status_errors() {
        let server = OneShotHttpServer::start(vec![
            (200, r#"{"items":[1,2]}"#.to_string()),
            (404, r#"{"message":"banner not found"}"#.to_string()),
        ])
        .await;
        let transport = HttpTransport::new(build_http_client(Duration::from_secs(5)), &server.base_url());
        let request = PreparedRequest {
            method: Method::Post,
            path: "/api/admin/banners".to_string(),
            headers: vec![("x-api-key".to_string(), "k".to_string())],
            body: Some(json!({ "title": "hello" })),
        };

        let ok = transport.dispatch(&request).await.expect("success");
        assert_eq!(ok, json!({ "items": [1, 2] }));

        let err = transport.dispatch(&request).await.expect_err("404");
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(err.message(), Some("banner not found"));

        let requests = server.requests().await;
        assert!(requests[0].starts_with("POST /api/admin/banners"), "{}", requests[0]);
        assert!(requests[0].to_ascii_lowercase().contains("x-api-key: k"));
        assert!(requests[0].contains(r#"{"title":"hello"}"#));
    }
}
