//! AuthFetch - 401 を一度だけ透過的に回復する認証付き呼び出し
//!
//! # 状態遷移
//! ```text
//! Initial --(401)--> Retrying --(refresh ok, 再送)--> Done
//!    |                   |
//!    +--(その他)--> Done  +--(refresh 失敗)--> Done（元の 401 を返す）
//! ```
//! 1 回の呼び出しで refresh と再送は最大 1 サイクル。再送が 401 でもそのまま返す。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{AccessToken, ApiRequest, ApiResponse, ClientError};
use crate::ports::{HttpClient, TokenStore};

enum FetchState {
    Initial,
    Retrying {
        rejected: Option<AccessToken>,
        original: ApiResponse,
    },
    Done(ApiResponse),
}

/// Authenticated HTTP calls with a single refresh-and-retry on 401.
#[derive(Clone)]
pub struct AuthFetch {
    http: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenStore>,
}

impl AuthFetch {
    pub fn new(http: Arc<dyn HttpClient>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { http, tokens }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Issue `request` with the current token; on 401 refresh once and
    /// re-issue once.
    ///
    /// Returns `Err` only when no response was received. A 401 that survives
    /// the refresh (or a failed refresh) is returned as the response.
    pub async fn fetch_with_auto_refresh(
        &self,
        request: &ApiRequest,
    ) -> Result<ApiResponse, ClientError> {
        let mut state = FetchState::Initial;
        loop {
            state = match state {
                FetchState::Initial => {
                    let token = self.tokens.token().await;
                    debug!(
                        request_id = %request.id,
                        method = %request.method,
                        url = %request.url,
                        authenticated = token.is_some(),
                        "issuing request"
                    );
                    let response = self.http.send(&request.authorized(token.as_ref())).await?;
                    if response.is_unauthorized() {
                        FetchState::Retrying {
                            rejected: token,
                            original: response,
                        }
                    } else {
                        FetchState::Done(response)
                    }
                }
                FetchState::Retrying { rejected, original } => {
                    info!(
                        request_id = %request.id,
                        url = %request.url,
                        "401 received, refreshing token"
                    );
                    if !self.tokens.refresh_rejected(rejected.as_ref()).await {
                        warn!(
                            request_id = %request.id,
                            "token refresh failed, returning original 401"
                        );
                        FetchState::Done(original)
                    } else {
                        let token = self.tokens.token().await;
                        let response = self.http.send(&request.authorized(token.as_ref())).await?;
                        if response.is_unauthorized() {
                            warn!(request_id = %request.id, "401 after refresh, giving up");
                        }
                        FetchState::Done(response)
                    }
                }
                FetchState::Done(response) => return Ok(response),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TokenPair;
    use crate::impls::{
        FailingRefresher, InMemoryTokenPersistence, ScriptedHttpClient, SharedTokenStore,
        StaticRefresher,
    };
    use std::time::Duration;

    const OLD: &str = "old-token";
    const NEW: &str = "new-token";

    fn store_with(refresher: Arc<dyn crate::ports::TokenRefresher>) -> Arc<SharedTokenStore> {
        let persistence = InMemoryTokenPersistence::with_tokens(TokenPair::new(
            OLD,
            Some("refresh".into()),
        ));
        Arc::new(SharedTokenStore::new(refresher, Arc::new(persistence)))
    }

    /// 401 for the old token, 200 for the new one.
    fn expiring_backend() -> ScriptedHttpClient {
        ScriptedHttpClient::new(|req| {
            let status = match req.header("Authorization") {
                Some(h) if h == format!("Bearer {NEW}") => 200,
                _ => 401,
            };
            Ok(ApiResponse::new(status, "{}"))
        })
    }

    #[tokio::test]
    async fn passes_through_non_401() {
        let http = Arc::new(ScriptedHttpClient::new(|_| Ok(ApiResponse::new(200, "{}"))));
        let refresher = Arc::new(StaticRefresher::new(TokenPair::new(NEW, None)));
        let fetch = AuthFetch::new(http.clone(), store_with(refresher.clone()));

        let res = fetch
            .fetch_with_auto_refresh(&ApiRequest::get("http://api/courses"))
            .await
            .unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(http.call_count(), 1);
        assert_eq!(refresher.calls(), 0);
        assert_eq!(
            http.calls()[0].header("Authorization"),
            Some(format!("Bearer {OLD}").as_str())
        );
    }

    #[tokio::test]
    async fn refreshes_once_and_retries_with_new_token() {
        let http = Arc::new(expiring_backend());
        let refresher = Arc::new(StaticRefresher::new(TokenPair::new(NEW, None)));
        let fetch = AuthFetch::new(http.clone(), store_with(refresher.clone()));

        let res = fetch
            .fetch_with_auto_refresh(&ApiRequest::get("http://api/courses"))
            .await
            .unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(http.call_count(), 2);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn second_401_is_returned_without_another_refresh() {
        let http = Arc::new(ScriptedHttpClient::new(|_| Ok(ApiResponse::new(401, ""))));
        let refresher = Arc::new(StaticRefresher::new(TokenPair::new(NEW, None)));
        let fetch = AuthFetch::new(http.clone(), store_with(refresher.clone()));

        let res = fetch
            .fetch_with_auto_refresh(&ApiRequest::get("http://api/courses"))
            .await
            .unwrap();

        assert_eq!(res.status, 401);
        assert_eq!(http.call_count(), 2);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_returns_original_401_and_clears_token() {
        let http = Arc::new(expiring_backend());
        let store = store_with(Arc::new(FailingRefresher));
        let fetch = AuthFetch::new(http.clone(), store.clone());

        let res = fetch
            .fetch_with_auto_refresh(&ApiRequest::get("http://api/courses"))
            .await
            .unwrap();

        assert_eq!(res.status, 401);
        assert_eq!(http.call_count(), 1);
        assert!(store.token().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let http = Arc::new(expiring_backend().with_latency(Duration::from_millis(5)));
        let refresher = Arc::new(
            StaticRefresher::new(TokenPair::new(NEW, None)).with_latency(Duration::from_millis(50)),
        );
        let fetch = AuthFetch::new(http.clone(), store_with(refresher.clone()));

        let calls = (0..5).map(|i| {
            let fetch = fetch.clone();
            tokio::spawn(async move {
                fetch
                    .fetch_with_auto_refresh(&ApiRequest::get(format!("http://api/item/{i}")))
                    .await
            })
        });
        let results = futures::future::join_all(calls).await;

        for res in results {
            assert_eq!(res.unwrap().unwrap().status, 200);
        }
        assert_eq!(refresher.calls(), 1);
        // 5 rejected + 5 retried
        assert_eq!(http.call_count(), 10);
    }

    #[tokio::test]
    async fn network_error_propagates() {
        let http = Arc::new(ScriptedHttpClient::new(|_| {
            Err(ClientError::Network("connection refused".into()))
        }));
        let refresher = Arc::new(StaticRefresher::new(TokenPair::new(NEW, None)));
        let fetch = AuthFetch::new(http, store_with(refresher));

        let err = fetch
            .fetch_with_auto_refresh(&ApiRequest::get("http://api/courses"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
