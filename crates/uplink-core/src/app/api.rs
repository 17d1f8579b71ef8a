//! ApiClient - バックエンド呼び出しの共通ヘルパー
//!
//! AuthFetch・RetryPolicy・Throttle を組み合わせ、すべてのレスポンスを
//! 境界で一度だけ ResponseEnvelope に正規化します。
//!
//! # 方針
//! - 冪等なリクエストだけ自動リトライ（GET と明示的に tag されたもの）
//! - GET は "GET <url>" キーで重複排除
//! - 最終的に 401 が残ったら `ClientError::Unauthorized`

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::auth_fetch::AuthFetch;
use super::retry::{RetryPolicy, retry_request};
use super::single_flight::Throttle;
use crate::domain::{
    ApiRequest, ClientError, HttpMethod, Idempotency, ResponseEnvelope, parse_envelope,
};

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    fetch: AuthFetch,
    retry: RetryPolicy,
    throttle: Throttle<ResponseEnvelope>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, fetch: AuthFetch, retry: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fetch,
            retry,
            throttle: Throttle::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthFetch {
        &self.fetch
    }

    /// Absolute URL for `path`; absolute inputs are returned unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    /// Send `request` (retrying only if idempotent) and normalize the body.
    pub async fn send(&self, request: ApiRequest) -> Result<ResponseEnvelope, ClientError> {
        let response = retry_request(&self.retry, request.idempotency, || {
            self.fetch.fetch_with_auto_refresh(&request)
        })
        .await?;

        if response.is_unauthorized() {
            return Err(ClientError::Unauthorized);
        }
        let envelope = parse_envelope(response.status, &response.body);
        debug!(
            request_id = %request.id,
            status = response.status,
            success = envelope.success,
            "response normalized"
        );
        Ok(envelope)
    }

    /// Throttled, retried GET.
    pub async fn get(&self, path: &str) -> Result<ResponseEnvelope, ClientError> {
        let url = self.url(path);
        let key = format!("{} {url}", HttpMethod::Get);
        let this = self.clone();
        self.throttle
            .throttle_request(key, move || async move { this.send(ApiRequest::get(url)).await })
            .await
    }

    pub async fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let envelope = self.get(path).await?;
        decode(envelope)
    }

    /// List payload decoded item by item (`Result.Items`, `Data`, ...).
    pub async fn get_items<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ClientError> {
        let envelope = self.get(path).await?;
        if !envelope.success {
            return Err(status_error(envelope));
        }
        envelope
            .items()
            .into_iter()
            .map(|item| T::deserialize(item).map_err(ClientError::from))
            .collect()
    }

    /// POST; never retried unless `idempotency` says so.
    pub async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        idempotency: Idempotency,
    ) -> Result<ResponseEnvelope, ClientError> {
        let body = serde_json::to_value(body)?;
        self.send(ApiRequest::post(self.url(path), body).with_idempotency(idempotency))
            .await
    }

    pub async fn post_as<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        idempotency: Idempotency,
    ) -> Result<T, ClientError> {
        let envelope = self.post(path, body, idempotency).await?;
        decode(envelope)
    }

    pub async fn put<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ResponseEnvelope, ClientError> {
        let body = serde_json::to_value(body)?;
        self.send(ApiRequest::put(self.url(path), body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ResponseEnvelope, ClientError> {
        self.send(ApiRequest::delete(self.url(path))).await
    }
}

fn decode<T: DeserializeOwned>(envelope: ResponseEnvelope) -> Result<T, ClientError> {
    if !envelope.success {
        return Err(status_error(envelope));
    }
    envelope.result_as()
}

fn status_error(envelope: ResponseEnvelope) -> ClientError {
    ClientError::Status {
        status: envelope.status,
        message: envelope.message,
    }
}
