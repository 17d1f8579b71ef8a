//! DirectUploader - ストレージエッジへの直接転送
//!
//! バックエンド認証とは独立。チケット（URL に埋め込まれた署名）だけで転送します。
//!
//! # 最終 URL の優先順位
//! 1. エッジがレスポンスで返した `fileUrl`
//! 2. チケットの `publicUrl`
//! 3. `{edge}/{role}/{key}` から導出
//!
//! # 失敗メッセージの優先順位
//! `details.error` > `error` > `message` > ステータステキスト
//!
//! 転送は単一試行。失敗しても再送しない（再試行は呼び出し元が判断する）。

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use super::presign::EdgeRouting;
use crate::domain::{
    AbortSignal, ApiResponse, ClientError, PresignTicket, ProgressFn, UploadFile, UploadProgress,
    UploadResult, canonicalize_keys, find_message, parse_envelope,
};
use crate::ports::{UploadRequest, UploadTransport};

#[derive(Clone)]
pub struct DirectUploader {
    transport: Arc<dyn UploadTransport>,
    edge: EdgeRouting,
}

impl DirectUploader {
    pub fn new(transport: Arc<dyn UploadTransport>, edge: EdgeRouting) -> Self {
        Self { transport, edge }
    }

    /// Transfer `file` to `ticket.upload_url`. Never returns an error; every
    /// failure is folded into `UploadResult::error`.
    ///
    /// The ticket is consumed: one ticket, one transfer.
    pub async fn upload_file(
        &self,
        file: UploadFile,
        ticket: PresignTicket,
        on_progress: Option<ProgressFn>,
        signal: AbortSignal,
    ) -> UploadResult {
        if signal.is_aborted() {
            return UploadResult::failure(ClientError::Aborted.to_string())
                .with_object_key(&ticket.object_key);
        }

        let file_name = file.file_name.clone();
        let total_bytes = file.len();
        let progress = monotonic(on_progress, signal.clone());
        let request = UploadRequest::new(ticket.upload_url.clone(), file, signal);

        match self.transport.send(request, progress).await {
            Ok(response) if response.is_success() => {
                let public_url = self.final_url(&response, &ticket);
                info!(
                    file_name = %file_name,
                    object_key = %ticket.object_key,
                    bytes = total_bytes,
                    public_url = %public_url,
                    "upload complete"
                );
                UploadResult::succeeded(ticket.object_key, public_url)
            }
            Ok(response) => {
                let error = failure_message(&response);
                warn!(
                    file_name = %file_name,
                    status = response.status,
                    error = %error,
                    "upload rejected by edge"
                );
                UploadResult::failure(error).with_object_key(ticket.object_key)
            }
            Err(ClientError::Aborted) => {
                info!(file_name = %file_name, "upload aborted");
                UploadResult::failure(ClientError::Aborted.to_string())
                    .with_object_key(ticket.object_key)
            }
            Err(err) => {
                warn!(file_name = %file_name, error = %err, "upload transfer failed");
                UploadResult::failure(err.to_string()).with_object_key(ticket.object_key)
            }
        }
    }

    fn final_url(&self, response: &ApiResponse, ticket: &PresignTicket) -> String {
        if let Some(echoed) = echoed_file_url(response) {
            // the edge is authoritative, but it may still answer with its own
            // dev address
            return self.edge.rewrite(&echoed).unwrap_or(echoed);
        }
        ticket
            .public_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| {
                self.edge
                    .derive_public_url(ticket.access_role, &ticket.object_key)
            })
    }
}

/// Wrap the caller's callback so it only ever sees non-decreasing byte counts
/// and goes quiet after abort.
fn monotonic(on_progress: Option<ProgressFn>, signal: AbortSignal) -> ProgressFn {
    let high_water = AtomicU64::new(0);
    Arc::new(move |progress: UploadProgress| {
        let Some(callback) = on_progress.as_ref() else {
            return;
        };
        if signal.is_aborted() {
            return;
        }
        let previous = high_water.fetch_max(progress.bytes_sent, Ordering::SeqCst);
        if progress.bytes_sent >= previous {
            callback(progress);
        }
    })
}

fn echoed_file_url(response: &ApiResponse) -> Option<String> {
    if response.body.trim().is_empty() {
        return None;
    }
    let envelope = parse_envelope(response.status, &response.body);
    let raw = serde_json::from_str::<Value>(&response.body)
        .map(|v| canonicalize_keys(&v))
        .unwrap_or(Value::Null);

    [&envelope.result, &raw]
        .into_iter()
        .filter_map(|v| v.get("fileUrl").and_then(Value::as_str))
        .map(str::trim)
        .find(|u| !u.is_empty())
        .map(str::to_string)
}

fn failure_message(response: &ApiResponse) -> String {
    serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|body| find_message(&body))
        .or_else(|| Some(response.status_text.clone()).filter(|t| !t.trim().is_empty()))
        .unwrap_or_else(|| format!("upload failed with status {}", response.status))
}
