//! TokenStore port - アクセストークンの所有者
//!
//! # 不変条件
//! - `refresh()` はシステム全体で同時に 1 つしか実行されない
//! - 同時に呼んだ呼び出し元は同じ結果を待つ
//! - リフレッシュ失敗はセッション終了（トークンを消して false を返す）

use async_trait::async_trait;

use crate::domain::{AccessToken, ClientError, TokenPair};

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current access token, hydrating from persistence on first use.
    async fn token(&self) -> Option<AccessToken>;

    /// Refresh the access token. `true` on success; on failure the token is
    /// cleared and `false` is returned.
    async fn refresh(&self) -> bool;

    /// Refresh after `rejected` got a 401. Stores that track token
    /// generations skip the network call when `rejected` was already replaced.
    async fn refresh_rejected(&self, rejected: Option<&AccessToken>) -> bool {
        let _ = rejected;
        self.refresh().await
    }

    /// Login: replace the current tokens and persist them.
    async fn store(&self, tokens: TokenPair) -> Result<(), ClientError>;

    /// Logout: drop the token and its persisted copy.
    async fn clear(&self);
}
