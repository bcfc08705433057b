//! Runtime settings for the SharePoint server.
//!
//! Everything is read from environment variables once at startup. A `.env` file in
//! the working directory is honoured for local development.

use std::time::Duration;

use crate::auth::Credential;
use crate::graph::RetryPolicy;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone)]
pub struct Settings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Site used when a tool call does not name one.
    pub site_url: String,
    pub graph_base_url: String,
    pub authority_url: String,
    pub max_folder_depth: u32,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub token_expiry_margin: Duration,
    pub max_text_chars: usize,
    pub max_rows: usize,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("site_url", &self.site_url)
            .field("graph_base_url", &self.graph_base_url)
            .field("authority_url", &self.authority_url)
            .field("max_folder_depth", &self.max_folder_depth)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("token_expiry_margin", &self.token_expiry_margin)
            .field("max_text_chars", &self.max_text_chars)
            .field("max_rows", &self.max_rows)
            .finish()
    }
}

impl Settings {
    /// Loads settings from the process environment.
    ///
    /// The `.env` file is skipped under `cfg(test)` so unit tests stay hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingVar(key.to_string()))
        };

        let tenant_id = required("TENANT_ID")?;
        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;

        let site_url = required("SITE_URL")?;
        url::Url::parse(&site_url)
            .map_err(|e| ConfigError::InvalidValue("SITE_URL".to_string(), e.to_string()))?;

        let graph_base_url = lookup("GRAPH_BASE_URL")
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let authority_url = lookup("AUTHORITY_URL")
            .unwrap_or_else(|| DEFAULT_AUTHORITY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let max_folder_depth = parse_or("MAX_FOLDER_DEPTH", lookup("MAX_FOLDER_DEPTH"), 10u32)?;
        let timeout_secs = parse_or("REQUEST_TIMEOUT_SECS", lookup("REQUEST_TIMEOUT_SECS"), 30u64)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "REQUEST_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let max_attempts = parse_or("MAX_RETRIES", lookup("MAX_RETRIES"), 4u32)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_RETRIES".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let margin_secs = parse_or(
            "TOKEN_EXPIRY_MARGIN_SECS",
            lookup("TOKEN_EXPIRY_MARGIN_SECS"),
            300u64,
        )?;
        let max_text_chars = parse_or("MAX_TEXT_CHARS", lookup("MAX_TEXT_CHARS"), 5000usize)?;
        let max_rows = parse_or("MAX_ROWS", lookup("MAX_ROWS"), 50usize)?;

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            site_url,
            graph_base_url,
            authority_url,
            max_folder_depth,
            request_timeout: Duration::from_secs(timeout_secs),
            max_attempts,
            token_expiry_margin: Duration::from_secs(margin_secs),
            max_text_chars,
            max_rows,
        })
    }

    pub fn credential(&self) -> Credential {
        Credential::new(
            &self.tenant_id,
            &self.client_id,
            &self.client_secret,
            &self.authority_url,
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("'{}': {}", value, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TENANT_ID", "tenant"),
            ("CLIENT_ID", "client"),
            ("CLIENT_SECRET", "s3cret"),
            ("SITE_URL", "https://contoso.sharepoint.com/sites/Marketing"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Settings, ConfigError> {
        Settings::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let settings = load(&base_env()).unwrap();
        assert_eq!(settings.max_folder_depth, 10);
        assert_eq!(settings.max_attempts, 4);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.token_expiry_margin, Duration::from_secs(300));
        assert_eq!(settings.max_text_chars, 5000);
        assert_eq!(settings.max_rows, 50);
        assert_eq!(settings.graph_base_url, DEFAULT_GRAPH_BASE_URL);
    }

    #[test]
    fn missing_secret_is_reported_by_name() {
        let mut env = base_env();
        env.remove("CLIENT_SECRET");
        match load(&env) {
            Err(ConfigError::MissingVar(name)) => assert_eq!(name, "CLIENT_SECRET"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn overrides_are_parsed() {
        let mut env = base_env();
        env.insert("MAX_FOLDER_DEPTH", "3");
        env.insert("MAX_RETRIES", "2");
        env.insert("GRAPH_BASE_URL", "http://127.0.0.1:9000/v1.0/");
        let settings = load(&env).unwrap();
        assert_eq!(settings.max_folder_depth, 3);
        assert_eq!(settings.retry_policy().max_attempts, 2);
        assert_eq!(settings.graph_base_url, "http://127.0.0.1:9000/v1.0");
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let mut env = base_env();
        env.insert("MAX_RETRIES", "many");
        assert!(matches!(load(&env), Err(ConfigError::InvalidValue(key, _)) if key == "MAX_RETRIES"));

        let mut env = base_env();
        env.insert("MAX_RETRIES", "0");
        assert!(load(&env).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let settings = load(&base_env()).unwrap();
        assert!(!format!("{:?}", settings).contains("s3cret"));
    }
}
