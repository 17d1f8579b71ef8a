//! Uploader - presign と直接転送をまとめた公開アップロード操作
//!
//! # フロー
//! ```text
//! upload_file_with_presign
//!   ├─ PresignNegotiator::get_presign_url  (None → "Failed to get presign URL", 中断と競争)
//!   ├─ チケット期限チェック                (期限切れ → TicketExpired)
//!   └─ DirectUploader::upload_file         (進捗・中断)
//! ```
//! 呼び出し 1 回ごとに新しいチケットを取得します。失敗した転送を再試行したい
//! 場合は、呼び出し元がこの操作ごとやり直してください。

use std::sync::Arc;
use tracing::{info, warn};

use super::direct_upload::DirectUploader;
use super::presign::PresignNegotiator;
use crate::domain::{
    AbortSignal, AccessRole, ClientError, PresignRequest, ProgressFn, UploadFile, UploadResult,
};
use crate::ports::Clock;

pub const PRESIGN_FAILED: &str = "Failed to get presign URL";

/// Per-call upload options.
#[derive(Clone, Default)]
pub struct UploadOptions {
    pub folder: String,
    pub access_role: AccessRole,
    pub on_progress: Option<ProgressFn>,
    pub signal: AbortSignal,
}

impl UploadOptions {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            ..Self::default()
        }
    }

    pub fn with_access_role(mut self, access_role: AccessRole) -> Self {
        self.access_role = access_role;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }
}

#[derive(Clone)]
pub struct Uploader {
    negotiator: PresignNegotiator,
    direct: DirectUploader,
    clock: Arc<dyn Clock>,
}

impl Uploader {
    pub fn new(
        negotiator: PresignNegotiator,
        direct: DirectUploader,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            negotiator,
            direct,
            clock,
        }
    }

    pub fn negotiator(&self) -> &PresignNegotiator {
        &self.negotiator
    }

    /// Negotiate a fresh ticket and transfer `file` with it.
    pub async fn upload_file_with_presign(
        &self,
        file: UploadFile,
        options: UploadOptions,
    ) -> UploadResult {
        let UploadOptions {
            folder,
            access_role,
            on_progress,
            mut signal,
        } = options;

        if signal.is_aborted() {
            return UploadResult::failure(ClientError::Aborted.to_string());
        }

        let request = PresignRequest {
            file_name: file.file_name.clone(),
            content_type: file.content_type.clone(),
            folder,
            access_role,
        };
        info!(
            file_name = %request.file_name,
            folder = %request.folder,
            role = %request.access_role,
            bytes = file.len(),
            "starting upload"
        );

        let negotiated = tokio::select! {
            biased;
            _ = signal.aborted() => {
                info!(file_name = %request.file_name, "upload aborted during presign");
                return UploadResult::failure(ClientError::Aborted.to_string());
            }
            ticket = self.negotiator.get_presign_url(&request) => ticket,
        };
        let Some(ticket) = negotiated else {
            return UploadResult::failure(PRESIGN_FAILED);
        };

        if ticket.is_expired(self.clock.now()) {
            warn!(object_key = %ticket.object_key, "presign ticket expired before transfer");
            return UploadResult::failure(ClientError::TicketExpired.to_string())
                .with_object_key(ticket.object_key);
        }

        self.direct
            .upload_file(file, ticket, on_progress, signal)
            .await
    }
}
