//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてクライアントの振る舞いを実装します。
//!
//! # 主要コンポーネント
//! - **ClientBuilder**: クライアントの構築とワイヤリング
//! - **RetryPolicy / retry_request**: 一時的な失敗のリトライ
//! - **SingleFlight / Throttle**: 同一キーの同時呼び出しの合流
//! - **AuthFetch**: 401 を一度だけ回復する認証付き呼び出し
//! - **ApiClient**: バックエンド呼び出しの共通ヘルパー
//! - **PresignNegotiator**: アップロードチケットの取得
//! - **DirectUploader**: エッジへの直接転送
//! - **Uploader**: presign + 転送の公開操作

pub mod api;
pub mod auth_fetch;
pub mod builder;
pub mod direct_upload;
pub mod presign;
pub mod retry;
pub mod single_flight;
pub mod uploader;

// 主要な型を再エクスポート
pub use self::api::ApiClient;
pub use self::auth_fetch::AuthFetch;
pub use self::builder::{BuildError, Client, ClientBuilder};
pub use self::direct_upload::DirectUploader;
pub use self::presign::{EdgeRouting, PresignNegotiator};
pub use self::retry::{Backoff, RetryPolicy, retry_request};
pub use self::single_flight::{SingleFlight, Throttle};
pub use self::uploader::{PRESIGN_FAILED, UploadOptions, Uploader};
