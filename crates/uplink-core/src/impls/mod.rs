//! Impls - ports の実装
//!
//! # 本番用
//! - **ReqwestHttpClient**: バックエンド呼び出し
//! - **ReqwestUploadTransport**: エッジへの multipart ストリーミング
//! - **HttpTokenRefresher**: リフレッシュエンドポイント
//! - **FileTokenPersistence**: JSON ファイルへのトークン保存
//! - **SharedTokenStore**: single-flight リフレッシュ付きトークンストア
//!
//! # 開発用・テスト用
//! - **ScriptedHttpClient** / **ScriptedUploadTransport**: クロージャで応答
//! - **StaticRefresher** / **FailingRefresher**
//! - **InMemoryTokenPersistence**

pub mod persistence;
pub mod refresher;
pub mod reqwest_http;
pub mod reqwest_upload;
pub mod scripted;
pub mod token_store;

// 主要な型を再エクスポート
pub use self::persistence::{FileTokenPersistence, InMemoryTokenPersistence};
pub use self::refresher::{FailingRefresher, HttpTokenRefresher, StaticRefresher};
pub use self::reqwest_http::ReqwestHttpClient;
pub use self::reqwest_upload::ReqwestUploadTransport;
pub use self::scripted::{ScriptedHttpClient, ScriptedUploadTransport};
pub use self::token_store::SharedTokenStore;
