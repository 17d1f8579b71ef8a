//! SharedTokenStore - single-flight リフレッシュ付きのトークンストア
//!
//! # 学習ポイント
//! - 状態は `Arc<RwLock<..>>`、リフレッシュは `SingleFlight<(), bool>` で直列化
//! - 永続化からのハイドレーションは最初のアクセス時に一度だけ
//! - 拒否されたトークンが既に置き換わっていればネットワーク呼び出しを省く
//!
//! # リフレッシュ結果
//! - 成功: 新しいペアを保存（refresh token が返らなければ既存のものを維持）
//! - 失敗: セッション終了。トークンと永続化コピーを消して false
//! - 実行中に store/clear があれば結果は捨てる（世代番号で判定）

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::app::SingleFlight;
use crate::domain::{AccessToken, ClientError, TokenPair};
use crate::ports::{TokenPersistence, TokenRefresher, TokenStore};

#[derive(Debug, Default)]
struct TokenState {
    tokens: Option<TokenPair>,
    hydrated: bool,
    /// Bumped by every login and logout.
    generation: u64,
}

#[derive(Clone)]
pub struct SharedTokenStore {
    state: Arc<RwLock<TokenState>>,
    refresher: Arc<dyn TokenRefresher>,
    persistence: Arc<dyn TokenPersistence>,
    flights: SingleFlight<(), bool>,
}

impl SharedTokenStore {
    pub fn new(refresher: Arc<dyn TokenRefresher>, persistence: Arc<dyn TokenPersistence>) -> Self {
        Self {
            state: Arc::new(RwLock::new(TokenState::default())),
            refresher,
            persistence,
            flights: SingleFlight::new(),
        }
    }

    /// Snapshot of the current pair.
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.hydrate().await;
        self.state.read().await.tokens.clone()
    }

    async fn hydrate(&self) {
        if self.state.read().await.hydrated {
            return;
        }
        let mut state = self.state.write().await;
        if state.hydrated {
            return;
        }
        match self.persistence.load() {
            Ok(tokens) => {
                debug!(found = tokens.is_some(), "hydrated token store");
                state.tokens = tokens;
            }
            Err(err) => warn!(error = %err, "could not load persisted tokens"),
        }
        state.hydrated = true;
    }
}

async fn run_refresh(
    state: Arc<RwLock<TokenState>>,
    refresher: Arc<dyn TokenRefresher>,
    persistence: Arc<dyn TokenPersistence>,
) -> bool {
    let (refresh_token, generation) = {
        let state = state.read().await;
        let refresh_token = state.tokens.as_ref().and_then(|t| t.refresh_token.clone());
        (refresh_token, state.generation)
    };

    let outcome = refresher.refresh(refresh_token.clone()).await;

    let mut state = state.write().await;
    if state.generation != generation {
        debug!("session changed during refresh, discarding result");
        return state.tokens.is_some();
    }
    match outcome {
        Ok(mut tokens) => {
            if tokens.refresh_token.is_none() {
                tokens.refresh_token = refresh_token;
            }
            if let Err(err) = persistence.save(&tokens) {
                warn!(error = %err, "refreshed token not persisted");
            }
            state.tokens = Some(tokens);
            state.hydrated = true;
            info!("access token refreshed");
            true
        }
        Err(err) => {
            warn!(error = %err, "token refresh failed, ending session");
            state.tokens = None;
            state.hydrated = true;
            if let Err(err) = persistence.clear() {
                warn!(error = %err, "persisted tokens not cleared");
            }
            false
        }
    }
}

#[async_trait]
impl TokenStore for SharedTokenStore {
    async fn token(&self) -> Option<AccessToken> {
        self.hydrate().await;
        self.state
            .read()
            .await
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    async fn refresh(&self) -> bool {
        self.hydrate().await;
        let state = Arc::clone(&self.state);
        let refresher = Arc::clone(&self.refresher);
        let persistence = Arc::clone(&self.persistence);
        self.flights
            .run((), move || run_refresh(state, refresher, persistence))
            .await
            .unwrap_or(false)
    }

    async fn refresh_rejected(&self, rejected: Option<&AccessToken>) -> bool {
        let current = self.token().await;
        match (current, rejected) {
            (Some(current), Some(rejected)) if current != *rejected => {
                debug!("rejected token already replaced, skipping refresh");
                true
            }
            (Some(_), None) => true,
            _ => self.refresh().await,
        }
    }

    async fn store(&self, tokens: TokenPair) -> Result<(), ClientError> {
        let mut state = self.state.write().await;
        self.persistence.save(&tokens)?;
        state.tokens = Some(tokens);
        state.hydrated = true;
        state.generation += 1;
        info!("tokens stored");
        Ok(())
    }

    async fn clear(&self) {
        let mut state = self.state.write().await;
        state.tokens = None;
        state.hydrated = true;
        state.generation += 1;
        if let Err(err) = self.persistence.clear() {
            warn!(error = %err, "persisted tokens not cleared");
        }
        info!("tokens cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{FailingRefresher, InMemoryTokenPersistence, StaticRefresher};
    use std::time::Duration;

    fn pair(access: &str, refresh: Option<&str>) -> TokenPair {
        TokenPair::new(access, refresh.map(str::to_string))
    }

    #[tokio::test]
    async fn hydrates_lazily_from_persistence() {
        let persistence = Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r"))));
        let store = SharedTokenStore::new(
            Arc::new(StaticRefresher::new(pair("b", None))),
            persistence,
        );
        assert_eq!(store.token().await, Some(AccessToken::new("a")));
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let persistence = Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r"))));
        let store = SharedTokenStore::new(
            Arc::new(StaticRefresher::new(pair("b", None))),
            persistence.clone(),
        );

        assert!(store.refresh().await);
        assert_eq!(store.tokens().await, Some(pair("b", Some("r"))));
        assert_eq!(persistence.load().unwrap(), Some(pair("b", Some("r"))));
    }

    #[tokio::test]
    async fn refresh_failure_ends_session() {
        let persistence = Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r"))));
        let store = SharedTokenStore::new(Arc::new(FailingRefresher), persistence.clone());

        assert!(!store.refresh().await);
        assert!(store.token().await.is_none());
        assert_eq!(persistence.load().unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_call() {
        let refresher = Arc::new(
            StaticRefresher::new(pair("b", None)).with_latency(Duration::from_millis(50)),
        );
        let store = SharedTokenStore::new(
            refresher.clone(),
            Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r")))),
        );

        let handles = (0..10).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.refresh().await })
        });
        let results = futures::future::join_all(handles).await;

        assert!(results.into_iter().all(|r| r.unwrap()));
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn sequential_refreshes_each_hit_the_network() {
        let refresher = Arc::new(StaticRefresher::new(pair("b", None)));
        let store = SharedTokenStore::new(
            refresher.clone(),
            Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r")))),
        );
        assert!(store.refresh().await);
        assert!(store.refresh().await);
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test]
    async fn stale_rejection_skips_refresh() {
        let refresher = Arc::new(StaticRefresher::new(pair("b", None)));
        let store = SharedTokenStore::new(
            refresher.clone(),
            Arc::new(InMemoryTokenPersistence::with_tokens(pair("new", Some("r")))),
        );

        assert!(store.refresh_rejected(Some(&AccessToken::new("old"))).await);
        assert_eq!(refresher.calls(), 0);

        assert!(store.refresh_rejected(Some(&AccessToken::new("new"))).await);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn store_and_clear_round_trip_persistence() {
        let persistence = Arc::new(InMemoryTokenPersistence::new());
        let store = SharedTokenStore::new(Arc::new(FailingRefresher), persistence.clone());

        assert!(store.token().await.is_none());
        store.store(pair("login", Some("r"))).await.unwrap();
        assert_eq!(store.token().await, Some(AccessToken::new("login")));
        assert_eq!(persistence.load().unwrap(), Some(pair("login", Some("r"))));

        store.clear().await;
        assert!(store.token().await.is_none());
        assert_eq!(persistence.load().unwrap(), None);
    }

    #[tokio::test]
    async fn logout_during_refresh_stays_logged_out() {
        let refresher = Arc::new(
            StaticRefresher::new(pair("b", Some("r2"))).with_latency(Duration::from_millis(50)),
        );
        let persistence = Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r"))));
        let store = SharedTokenStore::new(refresher.clone(), persistence.clone());
        store.token().await;

        let refreshing = {
            let store = store.clone();
            tokio::spawn(async move { store.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.clear().await;

        assert!(!refreshing.await.unwrap());
        assert_eq!(refresher.calls(), 1);
        assert!(store.token().await.is_none());
        assert_eq!(persistence.load().unwrap(), None);
    }

    #[tokio::test]
    async fn cancelled_refresh_still_settles() {
        let refresher = Arc::new(
            StaticRefresher::new(pair("b", None)).with_latency(Duration::from_millis(20)),
        );
        let store = SharedTokenStore::new(
            refresher.clone(),
            Arc::new(InMemoryTokenPersistence::with_tokens(pair("a", Some("r")))),
        );

        let cancelled = tokio::time::timeout(Duration::from_millis(5), store.refresh()).await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.token().await, Some(AccessToken::new("b")));
        assert!(store.refresh().await);
        assert_eq!(refresher.calls(), 2);
    }
}
