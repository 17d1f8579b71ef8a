//! TokenPersistence port - トークンの永続化先
//!
//! # 実装
//! - **InMemoryTokenPersistence**: プロセス内（テスト用）
//! - **FileTokenPersistence**: JSON ファイル（CLI 用）

use crate::domain::{ClientError, TokenPair};

/// TokenPersistence は起動時のハイドレーション元であり、更新の書き込み先
pub trait TokenPersistence: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>, ClientError>;

    fn save(&self, tokens: &TokenPair) -> Result<(), ClientError>;

    fn clear(&self) -> Result<(), ClientError>;
}
