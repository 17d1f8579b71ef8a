//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（バックエンド API、ストレージエッジ、
//! トークンの永続化先）へのインターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - バックエンドはブラックボックス（HttpClient 経由でのみ触る）
//! - エッジへの直接アップロードはバックエンド認証と独立（UploadTransport）
//! - 共有される可変状態は TokenStore だけ

pub mod clock;
pub mod http;
pub mod token_persistence;
pub mod token_refresher;
pub mod token_store;
pub mod upload_transport;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::http::HttpClient;
pub use self::token_persistence::TokenPersistence;
pub use self::token_refresher::TokenRefresher;
pub use self::token_store::TokenStore;
pub use self::upload_transport::{UploadRequest, UploadTransport};
