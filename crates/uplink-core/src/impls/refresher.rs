//! Token refreshers: the backend refresh endpoint and test doubles.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::domain::{ApiRequest, ClientError, TokenPair, parse_envelope};
use crate::ports::{HttpClient, TokenRefresher};

/// Refresh response payload after key canonicalization.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    #[serde(alias = "token", alias = "jwt")]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// `POST {refresh_url}` with `{"RefreshToken": ...}`.
///
/// Talks to the HTTP port directly: a refresh must never itself trigger the
/// auto-refresh path.
pub struct HttpTokenRefresher {
    http: Arc<dyn HttpClient>,
    url: String,
}

impl HttpTokenRefresher {
    pub fn new(http: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: Option<String>) -> Result<TokenPair, ClientError> {
        let Some(refresh_token) = refresh_token.filter(|t| !t.is_empty()) else {
            return Err(ClientError::RefreshFailed("no refresh token".into()));
        };

        let request = ApiRequest::post(&self.url, json!({ "RefreshToken": refresh_token }));
        let response = self.http.send(&request).await?;
        let envelope = parse_envelope(response.status, &response.body);
        if !envelope.success {
            return Err(ClientError::RefreshFailed(envelope.message));
        }

        let payload: RefreshPayload = envelope
            .result_as()
            .map_err(|e| ClientError::RefreshFailed(e.to_string()))?;
        if payload.access_token.is_empty() {
            return Err(ClientError::RefreshFailed("empty access token".into()));
        }
        debug!(rotated = payload.refresh_token.is_some(), "refresh endpoint answered");
        Ok(TokenPair::new(payload.access_token, payload.refresh_token))
    }
}

/// Always hands back the same pair.
pub struct StaticRefresher {
    tokens: TokenPair,
    latency: Duration,
    calls: AtomicU32,
}

impl StaticRefresher {
    pub fn new(tokens: TokenPair) -> Self {
        Self {
            tokens,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(&self, _refresh_token: Option<String>) -> Result<TokenPair, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.tokens.clone())
    }
}

/// Refresh always rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingRefresher;

#[async_trait]
impl TokenRefresher for FailingRefresher {
    async fn refresh(&self, _refresh_token: Option<String>) -> Result<TokenPair, ClientError> {
        Err(ClientError::RefreshFailed("refresh rejected".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApiResponse;
    use crate::impls::ScriptedHttpClient;
    use rstest::rstest;

    const URL: &str = "http://api.test/api/auth/refresh";

    #[rstest]
    #[case::pascal(json!({"Success": true, "Result": {"AccessToken": "a2", "RefreshToken": "r2"}}), Some("r2"))]
    #[case::token_alias(json!({"data": {"token": "a2"}}), None)]
    #[tokio::test]
    async fn exchanges_refresh_token(#[case] body: serde_json::Value, #[case] rotated: Option<&str>) {
        let http = Arc::new(ScriptedHttpClient::new(move |req| {
            assert_eq!(req.url, URL);
            assert_eq!(req.body.as_ref().unwrap()["RefreshToken"], "r1");
            assert!(req.header("Authorization").is_none());
            Ok(ApiResponse::json(200, &body))
        }));
        let refresher = HttpTokenRefresher::new(http, URL);

        let pair = refresher.refresh(Some("r1".into())).await.unwrap();

        assert_eq!(pair.access_token.as_str(), "a2");
        assert_eq!(pair.refresh_token.as_deref(), rotated);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_network() {
        let http = Arc::new(ScriptedHttpClient::new(|_| Ok(ApiResponse::new(200, "{}"))));
        let refresher = HttpTokenRefresher::new(http.clone(), URL);

        let err = refresher.refresh(None).await.unwrap_err();

        assert_eq!(err, ClientError::RefreshFailed("no refresh token".into()));
        assert_eq!(http.call_count(), 0);
    }

    #[rstest]
    #[case::rejected(ApiResponse::json(401, &json!({"message": "refresh token revoked"})), "refresh token revoked")]
    #[case::no_token(ApiResponse::json(200, &json!({"Result": {"Other": 1}})), "decode error")]
    #[tokio::test]
    async fn backend_refusal_is_refresh_failure(#[case] response: ApiResponse, #[case] needle: &str) {
        let http = Arc::new(ScriptedHttpClient::new(move |_| Ok(response.clone())));
        let err = HttpTokenRefresher::new(http, URL)
            .refresh(Some("r1".into()))
            .await
            .unwrap_err();
        assert!(matches!(&err, ClientError::RefreshFailed(msg) if msg.contains(needle)), "{err}");
    }
}
