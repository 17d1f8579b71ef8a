//! ReqwestUploadTransport - multipart ストリーミング転送
//!
//! # 学習ポイント
//! - `Body::wrap_stream` でファイルをチャンク単位で送る
//! - reqwest がチャンクを取り出すたびに進捗を通知（送信済みバイト数の近似）
//! - `tokio::select!` で中断シグナルと競争させ、中断時はリクエストごと drop

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::time::Duration;
use tracing::debug;

use super::reqwest_http::{head, method, send_error};
use crate::domain::{ApiResponse, ClientError, ProgressFn, UploadProgress};
use crate::ports::{UploadRequest, UploadTransport};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ReqwestUploadTransport {
    client: Client,
    chunk_size: usize,
}

impl ReqwestUploadTransport {
    /// Only connecting is time-bounded; the transfer itself runs until done
    /// or aborted.
    pub fn new(connect_timeout: Duration, chunk_size: usize) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("upload client: {e}")))?;
        Ok(Self::with_client(client, chunk_size))
    }

    pub fn with_client(client: Client, chunk_size: usize) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
        }
    }
}

/// Split `data` into zero-copy chunks of at most `size` bytes.
pub(crate) fn chunks(data: &Bytes, size: usize) -> Vec<Bytes> {
    let size = size.max(1);
    (0..data.len())
        .step_by(size)
        .map(|start| data.slice(start..(start + size).min(data.len())))
        .collect()
}

#[async_trait]
impl UploadTransport for ReqwestUploadTransport {
    async fn send(
        &self,
        request: UploadRequest,
        on_progress: ProgressFn,
    ) -> Result<ApiResponse, ClientError> {
        let UploadRequest {
            method: http_method,
            url,
            file,
            field_name,
            mut signal,
        } = request;
        let total = file.len();
        if total == 0 {
            on_progress(UploadProgress::new(0, 0));
        }

        let progress_signal = signal.clone();
        let body = stream::iter(chunks(&file.data, self.chunk_size)).scan(
            0u64,
            move |sent, chunk| {
                *sent += chunk.len() as u64;
                if !progress_signal.is_aborted() {
                    on_progress(UploadProgress::new(*sent, total));
                }
                futures::future::ready(Some(Ok::<Bytes, std::io::Error>(chunk)))
            },
        );

        let part = Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| ClientError::Decode(format!("content type {}: {e}", file.content_type)))?;
        let form = Form::new().part(field_name, part);

        debug!(url = %url, bytes = total, "streaming upload");
        let pending = self
            .client
            .request(method(http_method), &url)
            .multipart(form)
            .send();

        let response = tokio::select! {
            biased;
            _ = signal.aborted() => return Err(ClientError::Aborted),
            response = pending => response.map_err(send_error)?,
        };
        let (status, status_text, headers) = head(&response);
        let body = tokio::select! {
            biased;
            _ = signal.aborted() => return Err(ClientError::Aborted),
            body = response.text() => body.map_err(|e| ClientError::Network(e.to_string()))?,
        };

        Ok(ApiResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}
