use serde::Serialize;
use std::time::Duration;

use crate::error::{RagError, RagResult};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 11434;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variables consulted for the backend address, highest priority first.
pub const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";
pub const HOST_ENV: &str = "OLLAMA_HOST";

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub running: bool,
    pub base_url: String,
}

/// Where the local inference service lives and how long we wait for it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl BackendConfig {
    /// Build a config for an explicit address. A bare `host:port` gets `http://`.
    pub fn new(base_url: &str) -> RagResult<Self> {
        let normalized = normalize_base_url(base_url);
        url::Url::parse(&normalized)
            .map_err(|e| RagError::Validation(format!("Invalid backend URL '{base_url}': {e}")))?;
        Ok(Self {
            base_url: normalized,
            ..Self::default()
        })
    }

    /// Resolve the address from `OLLAMA_BASE_URL`, then `OLLAMA_HOST`, then the loopback default.
    pub fn from_env() -> RagResult<Self> {
        let base = std::env::var(BASE_URL_ENV).ok();
        let host = std::env::var(HOST_ENV).ok();
        match resolve_base_url(base, host) {
            Some(url) => Self::new(&url),
            None => Ok(Self::default()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an API path such as `/api/generate`.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Client shared by every call of one component. Requests are not given a
    /// global timeout so that long streams are not cut off.
    pub fn http_client(&self) -> RagResult<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| RagError::Validation(format!("Failed to build HTTP client: {e}")))
    }

    pub async fn is_healthy(&self) -> bool {
        let client = match self.http_client() {
            Ok(c) => c,
            Err(_) => return false,
        };
        match client
            .get(self.endpoint("/api/version"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn status(&self) -> BackendStatus {
        BackendStatus {
            running: self.is_healthy().await,
            base_url: self.base_url.clone(),
        }
    }
}

fn resolve_base_url(base_url: Option<String>, host: Option<String>) -> Option<String> {
    base_url
        .into_iter()
        .chain(host)
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ipv4_loopback() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.base_url(), "http://127.0.0.1:11434");
        assert_eq!(cfg.endpoint("/api/generate"), "http://127.0.0.1:11434/api/generate");
        assert_eq!(cfg.endpoint("api/embed"), "http://127.0.0.1:11434/api/embed");
    }

    #[test]
    fn test_base_url_env_wins_over_host() {
        let resolved = resolve_base_url(
            Some("http://gpu-box:11434".into()),
            Some("0.0.0.0:9999".into()),
        );
        assert_eq!(resolved.as_deref(), Some("http://gpu-box:11434"));
    }

    #[test]
    fn test_blank_values_fall_through() {
        assert_eq!(
            resolve_base_url(Some("  ".into()), Some("localhost:8080".into())).as_deref(),
            Some("localhost:8080")
        );
        assert_eq!(resolve_base_url(None, None), None);
    }

    #[test]
    fn test_scheme_added_and_trailing_slash_removed() {
        let cfg = BackendConfig::new("localhost:8080/").unwrap();
        assert_eq!(cfg.base_url(), "http://localhost:8080");
        let cfg = BackendConfig::new("https://llm.internal/").unwrap();
        assert_eq!(cfg.base_url(), "https://llm.internal");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = BackendConfig::new("http://exa mple:11434").unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_health_probe_against_mock() {
        let router = axum::Router::new().route(
            "/api/version",
            axum::routing::get(|| async { axum::Json(serde_json::json!({"version": "0.5.0"})) }),
        );
        let base = crate::test_support::spawn_backend(router).await;
        let cfg = BackendConfig::new(&base).unwrap();
        let status = cfg.status().await;
        assert!(status.running);
        assert_eq!(status.base_url, base);
    }

    #[tokio::test]
    async fn test_health_probe_dead_port() {
        let base = crate::test_support::dead_backend().await;
        let cfg = BackendConfig::new(&base).unwrap();
        assert!(!cfg.is_healthy().await);
    }
}
