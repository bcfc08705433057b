//! Resilient access to Microsoft Graph.
//!
//! Every call goes through [`GraphClient::request`], which attaches a bearer token,
//! bounds the wait with a timeout, retries throttling and server errors with jittered
//! exponential backoff and recovers from one 401 by forcing a token refresh.

pub mod pages;
pub mod retry;
pub mod site;
pub mod types;

pub use pages::Pages;
pub use retry::RetryPolicy;
pub use site::{LibraryReference, Location, SiteReference, SiteResolver};

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::config::Settings;
use crate::error::ConnectorError;
use retry::{is_retryable_status, parse_retry_after};

/// Request payloads are kept owned so a retry can rebuild the request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Bytes { content: Vec<u8>, content_type: String },
}

#[derive(Debug, Clone)]
pub struct GraphResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl GraphResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ConnectorError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            ConnectorError::permanent(
                Some(self.status),
                format!("unexpected response shape from Graph: {}", e),
            )
        })
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

struct Failure {
    status: Option<u16>,
    message: String,
    retry_after: Option<Duration>,
}

#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    tokens: TokenManager,
    base_url: String,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(
        tokens: TokenManager,
        base_url: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sharepoint_core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConnectorError::InternalError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn from_settings(settings: &Settings, tokens: TokenManager) -> Result<Self, ConnectorError> {
        Self::new(
            tokens,
            &settings.graph_base_url,
            settings.request_timeout,
            settings.retry_policy(),
        )
    }

    /// Absolute URLs (continuation links) pass through untouched.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&RequestBody>,
        query: &[(&str, &str)],
    ) -> Result<GraphResponse, ConnectorError> {
        let mut retried = 0;
        self.request_counting_retries(method, path, body, query, &mut retried)
            .await
    }

    /// Like [`request`](Self::request), recording in `retried` how many attempts
    /// failed with a retryable error. Callers of non-idempotent requests use it to
    /// tell a genuine conflict from one caused by their own earlier attempt.
    pub async fn request_counting_retries(
        &self,
        method: Method,
        path: &str,
        body: Option<&RequestBody>,
        query: &[(&str, &str)],
        retried: &mut u32,
    ) -> Result<GraphResponse, ConnectorError> {
        let url = self.url_for(path);
        let mut attempts = 0u32;
        let mut refreshed_after_401 = false;

        loop {
            let token = self.tokens.get_token().await?;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(token.secret());
            if !query.is_empty() {
                req = req.query(query);
            }
            req = match body {
                Some(RequestBody::Json(value)) => req.json(value),
                Some(RequestBody::Bytes {
                    content,
                    content_type,
                }) => req
                    .header(CONTENT_TYPE, content_type.as_str())
                    .body(content.clone()),
                None => req,
            };

            debug!(%method, %url, "graph request");
            let failure = match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if resp.status().is_success() {
                        let headers = resp.headers().clone();
                        match resp.bytes().await {
                            Ok(bytes) => {
                                return Ok(GraphResponse {
                                    status,
                                    headers,
                                    body: bytes.to_vec(),
                                })
                            }
                            Err(err) => Failure {
                                status: None,
                                message: describe_transport_error(&err),
                                retry_after: None,
                            },
                        }
                    } else if status == 401 {
                        if refreshed_after_401 {
                            return Err(ConnectorError::permanent(
                                Some(401),
                                "request is still unauthorized after refreshing the access token",
                            ));
                        }
                        refreshed_after_401 = true;
                        warn!(%url, "graph returned 401, forcing token refresh");
                        self.tokens.invalidate(&token);
                        continue;
                    } else {
                        let retry_after = parse_retry_after(resp.headers());
                        let message = graph_error_message(resp).await;
                        if status == 404 {
                            return Err(ConnectorError::NotFound(message));
                        }
                        if !is_retryable_status(status) {
                            return Err(ConnectorError::permanent(Some(status), message));
                        }
                        Failure {
                            status: Some(status),
                            message,
                            retry_after,
                        }
                    }
                }
                Err(err) => Failure {
                    status: None,
                    message: describe_transport_error(&err),
                    retry_after: None,
                },
            };

            attempts += 1;
            *retried = attempts;
            if !self.retry.has_attempts_left(attempts) {
                warn!(
                    %url,
                    attempts,
                    status = ?failure.status,
                    "graph request failed after retries"
                );
                return Err(ConnectorError::transient(
                    failure.status,
                    format!("{} (gave up after {} attempts)", failure.message, attempts),
                ));
            }
            let delay = self.retry.delay_for(attempts, failure.retry_after);
            warn!(
                %url,
                attempt = attempts,
                status = ?failure.status,
                delay_ms = delay.as_millis() as u64,
                "retrying graph request: {}",
                failure.message
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ConnectorError> {
        self.request(Method::GET, path, None, query).await?.json()
    }

    /// Downloads raw content, returning the bytes and the served content type.
    pub async fn get_bytes(&self, path: &str) -> Result<(Vec<u8>, Option<String>), ConnectorError> {
        let resp = self.request(Method::GET, path, None, &[]).await?;
        let content_type = resp.content_type().map(|s| s.to_string());
        Ok((resp.body, content_type))
    }

    /// Lazily walks a collection one page per pull.
    pub fn paginate<T>(&self, path: &str, query: &[(&str, &str)]) -> Pages<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Pages::new(self.clone(), path, query)
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request to Graph timed out".to_string()
    } else if err.is_connect() {
        "could not connect to Graph".to_string()
    } else {
        "network error while talking to Graph".to_string()
    }
}

/// Graph errors look like `{"error": {"code": "...", "message": "..."}}`.
async fn graph_error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let fallback = format!(
        "Graph returned {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string();
    match resp.json::<Value>().await {
        Ok(body) => {
            let error = body.get("error");
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.trim().is_empty());
            let code = error.and_then(|e| e.get("code")).and_then(|c| c.as_str());
            match (code, message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (None, Some(message)) => message.to_string(),
                (Some(code), None) => format!("{} ({})", fallback, code),
                (None, None) => fallback,
            }
        }
        Err(_) => fallback,
    }
}
