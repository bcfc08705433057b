//! Client-credentials token acquisition and caching.
//!
//! [`TokenManager`] owns the only copy of the cached token. Callers get an
//! `Arc<AccessToken>` that stays valid for the duration of their request; a refresh
//! swaps the cached `Arc` under a short lock and never blocks across the network call.
//! Concurrent callers that find the cache stale all await the same in-flight refresh.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::ConnectorError;
use crate::graph::retry::{is_retryable_status, RetryPolicy};

pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Fallback lifetime when the identity provider omits `expires_in`.
const DEFAULT_LIFETIME_SECS: i64 = 3599;

#[derive(Clone)]
pub struct Credential {
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
    pub token_endpoint: String,
}

impl Credential {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str, authority_url: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_endpoint: format!(
                "{}/{}/oauth2/v2.0/token",
                authority_url.trim_end_matches('/'),
                tenant_id
            ),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_endpoint", &self.token_endpoint)
            .finish()
    }
}

#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
    scopes: Vec<String>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>, scopes: Vec<String>) -> Self {
        Self {
            value: value.into(),
            expires_at,
            scopes,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// True while more than `margin` remains before expiry.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        match (self.expires_at - Utc::now()).to_std() {
            Ok(remaining) => remaining > margin,
            Err(_) => false,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    scope: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> AccessToken {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS).max(0);
        let scopes = match self.scope {
            Some(scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(|s| s.to_string()).collect()
            }
            _ => vec![GRAPH_SCOPE.to_string()],
        };
        AccessToken::new(
            self.access_token,
            Utc::now() + chrono::Duration::seconds(lifetime),
            scopes,
        )
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Arc<AccessToken>, String>>>;

#[derive(Default)]
struct TokenState {
    current: Option<Arc<AccessToken>>,
    refresh: Option<(u64, RefreshFuture)>,
    next_refresh_id: u64,
}

struct Inner {
    credential: Credential,
    http: reqwest::Client,
    margin: Duration,
    retry: RetryPolicy,
    state: Mutex<TokenState>,
}

#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(
        credential: Credential,
        timeout: Duration,
        retry: RetryPolicy,
        margin: Duration,
    ) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::InternalError(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            inner: Arc::new(Inner {
                credential,
                http,
                margin,
                retry,
                state: Mutex::new(TokenState::default()),
            }),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConnectorError> {
        Self::new(
            settings.credential(),
            settings.request_timeout,
            settings.retry_policy(),
            settings.token_expiry_margin,
        )
    }

    /// Returns a token with more than the safety margin left, refreshing if needed.
    pub async fn get_token(&self) -> Result<Arc<AccessToken>, ConnectorError> {
        let refresh = {
            let mut state = self.inner.lock_state();
            if let Some(token) = state.current.as_ref() {
                if token.is_fresh(self.inner.margin) {
                    return Ok(Arc::clone(token));
                }
            }
            match &state.refresh {
                Some((_, in_flight)) => {
                    debug!("joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let id = state.next_refresh_id;
                    state.next_refresh_id += 1;
                    let fut = Arc::clone(&self.inner).refresh(id).boxed().shared();
                    state.refresh = Some((id, fut.clone()));
                    fut
                }
            }
        };
        refresh.await.map_err(ConnectorError::Auth)
    }

    /// Drops the cached token if it is still the one the caller used.
    ///
    /// A 401 seen by several concurrent requests therefore leads to a single refresh.
    pub fn invalidate(&self, seen: &Arc<AccessToken>) {
        let mut state = self.inner.lock_state();
        if state
            .current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, seen))
        {
            debug!("invalidating cached token after 401");
            state.current = None;
        }
    }

    #[cfg(test)]
    fn seed(&self, token: AccessToken) {
        self.inner.lock_state().current = Some(Arc::new(token));
    }

    #[cfg(test)]
    fn cached(&self) -> Option<Arc<AccessToken>> {
        self.inner.lock_state().current.clone()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(self: Arc<Self>, id: u64) -> Result<Arc<AccessToken>, String> {
        let outcome = self.request_token().await;

        let mut state = self.lock_state();
        if matches!(&state.refresh, Some((current, _)) if *current == id) {
            state.refresh = None;
        }
        match outcome {
            Ok(token) => {
                info!(
                    expires_at = %token.expires_at(),
                    "obtained access token for tenant {}",
                    self.credential.tenant_id
                );
                let token = Arc::new(token);
                state.current = Some(Arc::clone(&token));
                Ok(token)
            }
            Err(message) => {
                // A stale but unexpired token stays cached for the next attempt.
                warn!("token refresh failed: {}", message);
                Err(message)
            }
        }
    }

    async fn request_token(&self) -> Result<AccessToken, String> {
        let credential = &self.credential;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ];

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let failure = match self
                .http
                .post(&credential.token_endpoint)
                .form(&form)
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: TokenResponse = resp.json().await.map_err(|e| {
                            format!("token endpoint returned an unreadable response: {}", e)
                        })?;
                        return Ok(body.into_token());
                    }
                    let code = status.as_u16();
                    let detail = describe_idp_error(resp).await;
                    if !is_retryable_status(code) {
                        return Err(format!("token request rejected ({}): {}", code, detail));
                    }
                    format!("token endpoint returned {}: {}", code, detail)
                }
                Err(err) if err.is_timeout() => "token request timed out".to_string(),
                Err(err) => format!("identity provider unreachable: {}", err),
            };

            if !self.retry.has_attempts_left(attempt) {
                return Err(format!("{} (after {} attempts)", failure, attempt));
            }
            let delay = self.retry.backoff(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "token request failed, retrying: {}",
                failure
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn describe_idp_error(resp: reqwest::Response) -> String {
    let fallback = resp
        .status()
        .canonical_reason()
        .unwrap_or("unknown error")
        .to_string();
    match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("error_description")
            .or_else(|| body.get("error"))
            .and_then(|v| v.as_str())
            .map(|s| s.lines().next().unwrap_or(s).to_string())
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

    fn manager(server: &MockServer) -> TokenManager {
        TokenManager::new(
            Credential::new("tenant-1", "client-1", "secret-1", &server.uri()),
            Duration::from_secs(5),
            RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            Duration::from_secs(300),
        )
        .unwrap()
    }

    fn token_body(value: &str) -> serde_json::Value {
        json!({"access_token": value, "expires_in": 3600, "token_type": "Bearer"})
    }

    #[tokio::test]
    async fn cached_token_is_reused_within_margin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = manager(&server);
        let first = tokens.get_token().await.unwrap();
        let second = tokens.get_token().await.unwrap();
        assert_eq!(first.secret(), "tok-1");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn expired_token_triggers_exactly_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-2")))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = manager(&server);
        tokens.seed(AccessToken::new(
            "expired",
            Utc::now() - chrono::Duration::minutes(1),
            vec![GRAPH_SCOPE.to_string()],
        ));

        assert_eq!(tokens.get_token().await.unwrap().secret(), "tok-2");
        assert_eq!(tokens.get_token().await.unwrap().secret(), "tok-2");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("tok-shared"))
                    .set_delay(Duration::from_millis(150)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = manager(&server);
        let calls = (0..8).map(|_| tokens.get_token());
        let results = futures::future::join_all(calls).await;
        for result in results {
            assert_eq!(result.unwrap().secret(), "tok-shared");
        }
    }

    #[tokio::test]
    async fn rejected_credentials_keep_unexpired_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided.\r\nTrace ID: x"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = manager(&server);
        tokens.seed(AccessToken::new(
            "still-valid",
            Utc::now() + chrono::Duration::seconds(60),
            vec![],
        ));

        match tokens.get_token().await {
            Err(ConnectorError::Auth(msg)) => assert!(msg.contains("Invalid client secret")),
            other => panic!("expected auth error, got {:?}", other),
        }
        assert_eq!(tokens.cached().unwrap().secret(), "still-valid");
    }

    #[tokio::test]
    async fn transient_idp_failures_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-3")))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = manager(&server);
        assert_eq!(tokens.get_token().await.unwrap().secret(), "tok-3");
    }

    #[tokio::test]
    async fn unreachable_idp_surfaces_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let tokens = manager(&server);
        assert!(matches!(
            tokens.get_token().await,
            Err(ConnectorError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn invalidate_ignores_tokens_already_replaced() {
        let server = MockServer::start().await;
        let tokens = manager(&server);
        tokens.seed(AccessToken::new(
            "current",
            Utc::now() + chrono::Duration::hours(1),
            vec![],
        ));
        let other = Arc::new(AccessToken::new(
            "older",
            Utc::now() + chrono::Duration::hours(1),
            vec![],
        ));
        tokens.invalidate(&other);
        assert_eq!(tokens.cached().unwrap().secret(), "current");

        let current = tokens.cached().unwrap();
        tokens.invalidate(&current);
        assert!(tokens.cached().is_none());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let token = AccessToken::new("eyJhbGciOi", Utc::now(), vec![]);
        assert!(!format!("{:?}", token).contains("eyJ"));
        let credential = Credential::new("t", "c", "hunter2", "https://login.example");
        assert!(!format!("{:?}", credential).contains("hunter2"));
        assert_eq!(
            credential.token_endpoint,
            "https://login.example/t/oauth2/v2.0/token"
        );
    }
}
