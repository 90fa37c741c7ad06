//! Outbound HTTP for notifiers.
//!
//! Notifiers never open connections themselves; they hand a [`WebhookRequest`]
//! to an injected [`WebhookSender`]. [`ReqwestSender`] is the production
//! implementation, tests substitute a recording fake.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use tracing::{debug, error};
use url::Url;

use crate::error::{AlertmanagerError, Result};

/// Default timeout for a single outbound request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method used for a webhook call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    /// `POST`
    #[default]
    Post,
    /// `PUT`
    Put,
}

impl HttpMethod {
    /// Parses a method name, case-insensitively. Only `POST` and `PUT` are allowed.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    /// Returns the method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// A single outbound webhook call.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    /// Target URL.
    pub url: String,
    /// Request body.
    pub body: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// Content type of the body.
    pub content_type: String,
    /// Basic auth credentials.
    pub basic_auth: Option<(String, String)>,
}

impl WebhookRequest {
    /// Creates a `POST` request carrying `payload` as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SerializationError` if the payload can't be encoded.
    pub fn json<T: Serialize>(url: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            body: serde_json::to_string(payload)?,
            method: HttpMethod::Post,
            headers: BTreeMap::new(),
            content_type: "application/json".to_string(),
            basic_auth: None,
        })
    }

    /// Sets the HTTP method.
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets basic auth credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Parses the body back as JSON.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::SerializationError` if the body isn't JSON.
    pub fn json_body(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

impl fmt::Debug for WebhookRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookRequest")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("basic_auth", &self.basic_auth.as_ref().map(|(user, _)| user))
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Response to a webhook call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// Boxed future returned by [`WebhookSender::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<WebhookResponse>> + Send + 'a>>;

/// Capability to perform outbound webhook calls.
pub trait WebhookSender: Send + Sync + fmt::Debug {
    /// Sends the request.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NotificationFailed` on transport errors and
    /// non-2xx responses.
    fn send<'a>(&'a self, request: WebhookRequest) -> SendFuture<'a>;
}

/// [`WebhookSender`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: Client,
    timeout: Duration,
}

impl ReqwestSender {
    /// Creates a sender with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NotificationFailed` if the client can't be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .user_agent(concat!("claw-alertmanager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                error!(error = %e, "failed to build http client");
                AlertmanagerError::NotificationFailed {
                    reason: format!("http client build failed: {e}"),
                }
            })?;
        Ok(Self { client, timeout })
    }

    fn describe(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "request timed out".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else {
            format!("request failed: {error}")
        }
    }
}

impl WebhookSender for ReqwestSender {
    fn send<'a>(&'a self, request: WebhookRequest) -> SendFuture<'a> {
        Box::pin(async move {
            let url = Url::parse(&request.url).map_err(|e| AlertmanagerError::NotificationFailed {
                reason: format!("invalid webhook url: {e}"),
            })?;

            let method = match request.method {
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
            };

            let mut builder = self
                .client
                .request(method, url)
                .timeout(self.timeout)
                .header(reqwest::header::CONTENT_TYPE, &request.content_type)
                .body(request.body);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some((user, password)) = &request.basic_auth {
                builder = builder.basic_auth(user, Some(password));
            }

            let response = builder
                .send()
                .await
                .map_err(|e| AlertmanagerError::NotificationFailed {
                    reason: Self::describe(&e),
                })?;

            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "webhook response");

            if !status.is_success() {
                return Err(AlertmanagerError::NotificationFailed {
                    reason: format!("webhook response status {status}"),
                });
            }

            Ok(WebhookResponse {
                status: status.as_u16(),
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing() {
        assert_eq!(HttpMethod::parse("post"), Some(HttpMethod::Post));
        assert_eq!(HttpMethod::parse("PUT"), Some(HttpMethod::Put));
        assert_eq!(HttpMethod::parse("GET"), None);
        assert_eq!(HttpMethod::default().as_str(), "POST");
    }

    #[test]
    fn json_request() {
        let req = WebhookRequest::json("http://example.com", &serde_json::json!({"a": 1}))
            .unwrap()
            .with_method(HttpMethod::Put)
            .with_header("X-Test", "1");
        assert_eq!(req.body, r#"{"a":1}"#);
        assert_eq!(req.content_type, "application/json");
        assert_eq!(req.json_body().unwrap()["a"], 1);
        assert_eq!(req.headers.get("X-Test"), Some(&"1".to_string()));
    }

    #[test]
    fn debug_hides_password() {
        let req = WebhookRequest::json("http://example.com", &serde_json::json!({}))
            .unwrap()
            .with_basic_auth("admin", "hunter2");
        let debug = format!("{req:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn invalid_url_fails_without_network() {
        let sender = ReqwestSender::new(Duration::from_secs(1)).unwrap();
        let req = WebhookRequest::json("not a url", &serde_json::json!({})).unwrap();
        let err = sender.send(req).await.unwrap_err();
        assert!(matches!(err, AlertmanagerError::NotificationFailed { .. }));
    }
}
