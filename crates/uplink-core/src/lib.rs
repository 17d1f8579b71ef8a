//! uplink-core
//!
//! Authenticated API and direct-upload client building blocks.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（request, envelope, token, ticket, upload, abort, errors）
//! - **ports**: 抽象化レイヤー（HttpClient, TokenStore, TokenRefresher, TokenPersistence, UploadTransport, Clock）
//! - **app**: アプリケーションロジック（builder, retry, single_flight, auth_fetch, api, presign, direct_upload, uploader）
//! - **impls**: 実装（reqwest ベースの本番用と、Scripted* の開発・テスト用）
//! - **config**: 設定（JSON ファイル・環境変数）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use self::app::{Client, ClientBuilder, UploadOptions};
pub use self::config::ClientConfig;
pub use self::domain::{ClientError, UploadResult};
