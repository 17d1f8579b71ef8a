//! UploadTransport port - ストレージエッジへの直接転送
//!
//! ブラウザの XHR 相当（進捗通知・中断）を最小のインターフェースに抽象化します。
//!
//! # 実装
//! - **ReqwestUploadTransport**: multipart をチャンク単位でストリーミング
//! - **ScriptedUploadTransport**: 開発・テスト用

use async_trait::async_trait;

use crate::domain::{AbortSignal, ApiResponse, ClientError, HttpMethod, ProgressFn, UploadFile};

/// Form field the edge worker reads the file from.
pub const FILE_FIELD: &str = "file";

/// One transfer to a presigned destination.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub method: HttpMethod,
    pub url: String,
    pub file: UploadFile,
    pub field_name: &'static str,
    pub signal: AbortSignal,
}

impl UploadRequest {
    pub fn new(url: impl Into<String>, file: UploadFile, signal: AbortSignal) -> Self {
        Self {
            method: HttpMethod::Put,
            url: url.into(),
            file,
            field_name: FILE_FIELD,
            signal,
        }
    }
}

/// UploadTransport は 1 回の転送を行う
///
/// # 契約
/// - `on_progress` は送信済みバイト数が単調非減少になるように呼ぶ
/// - `signal` が発火したら転送を打ち切り `Err(ClientError::Aborted)` を返す。
///   以降 `on_progress` は呼ばない
/// - リトライはしない（単一試行）
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn send(
        &self,
        request: UploadRequest,
        on_progress: ProgressFn,
    ) -> Result<ApiResponse, ClientError>;
}
