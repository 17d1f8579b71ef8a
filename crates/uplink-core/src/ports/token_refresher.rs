//! TokenRefresher port - リフレッシュ API の呼び出し

use async_trait::async_trait;

use crate::domain::{ClientError, TokenPair};

/// TokenRefresher は refresh token を新しい TokenPair に交換する
///
/// 呼び出しの直列化（single-flight）は TokenStore 側の責務で、
/// ここでは 1 回のネットワーク呼び出しだけを行う。
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: Option<String>) -> Result<TokenPair, ClientError>;
}
