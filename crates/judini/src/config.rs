//! Client configuration.
//!
//! Resolution order for [`ClientConfig::from_env`]:
//! 1. `CODEGPT_API_KEY` (required)
//! 2. `CODEGPT_ORG_ID` (optional)
//! 3. `CODEGPT_API_URL` (optional, defaults to [`DEFAULT_BASE_URL`])
//!
//! Empty variables are treated as unset.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default API host. Paths are joined under `api/v1/`.
pub const DEFAULT_BASE_URL: &str = "https://api.codegpt.co/";

/// Default timeout for requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for streaming requests.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "CODEGPT_API_KEY";

/// Environment variable holding the organization id.
pub const ORG_ID_ENV: &str = "CODEGPT_ORG_ID";

/// Environment variable overriding the API host.
pub const BASE_URL_ENV: &str = "CODEGPT_API_URL";

/// Settings needed to talk to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bearer token.
    pub api_key: String,
    /// Organization id, sent as a header when present.
    pub org_id: Option<String>,
    /// API host.
    pub base_url: String,
    /// Timeout for buffered requests.
    pub timeout: Duration,
    /// Timeout for streaming requests.
    pub stream_timeout: Duration,
}

impl ClientConfig {
    /// Create a config with default host and timeouts.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            org_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }

    /// Resolve a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = non_empty(API_KEY_ENV)
            .ok_or_else(|| Error::Config(format!("{} is not set", API_KEY_ENV)))?;

        let mut config = Self::new(api_key);
        config.org_id = non_empty(ORG_ID_ENV);
        if let Some(url) = non_empty(BASE_URL_ENV) {
            config.base_url = url;
        }

        tracing::debug!(
            base_url = %config.base_url,
            has_org = config.org_id.is_some(),
            "resolved client config from environment"
        );

        Ok(config)
    }

    /// Set the organization id.
    pub fn with_org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Set the API host.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the streaming timeout.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("key");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.stream_timeout, DEFAULT_STREAM_TIMEOUT);
        assert!(config.org_id.is_none());
    }

    #[test]
    fn test_from_lookup_full() {
        let config = ClientConfig::from_lookup(lookup(&[
            (API_KEY_ENV, "secret"),
            (ORG_ID_ENV, "org-1"),
            (BASE_URL_ENV, "http://localhost:9000"),
        ]))
        .unwrap();

        assert_eq!(config.api_key, "secret");
        assert_eq!(config.org_id.as_deref(), Some("org-1"));
        assert_eq!(config.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_from_lookup_missing_key() {
        let err = ClientConfig::from_lookup(lookup(&[(ORG_ID_ENV, "org-1")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_lookup_blank_values_are_unset() {
        let err = ClientConfig::from_lookup(lookup(&[(API_KEY_ENV, "  ")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config =
            ClientConfig::from_lookup(lookup(&[(API_KEY_ENV, "k"), (ORG_ID_ENV, "")])).unwrap();
        assert!(config.org_id.is_none());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_builder_style_setters() {
        let config = ClientConfig::new("k")
            .with_org_id("org")
            .with_base_url("http://x")
            .with_timeout(Duration::from_secs(5))
            .with_stream_timeout(Duration::from_secs(10));
        assert_eq!(config.org_id.as_deref(), Some("org"));
        assert_eq!(config.base_url, "http://x");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.stream_timeout, Duration::from_secs(10));
    }
}
