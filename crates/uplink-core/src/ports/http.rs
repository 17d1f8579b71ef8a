//! HttpClient port - バックエンドへの HTTP 呼び出し
//!
//! # 実装
//! - **ReqwestHttpClient**: reqwest ベース（本番用）
//! - **ScriptedHttpClient**: クロージャでレスポンスを返す（開発・テスト用）

use async_trait::async_trait;

use crate::domain::{ApiRequest, ApiResponse, ClientError};

/// HttpClient は 1 回の HTTP 呼び出しを行う
///
/// # エラーの扱い
/// - ステータスに関わらずレスポンスが返れば `Ok(ApiResponse)`
/// - レスポンスが返らなかった場合のみ `Err(ClientError::Network)`
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError>;
}
