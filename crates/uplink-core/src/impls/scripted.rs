//! Scripted transports for development and tests.
//!
//! Responses come from a closure; every call is recorded.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{ApiRequest, ApiResponse, ClientError, ProgressFn, UploadProgress};
use crate::ports::{HttpClient, UploadRequest, UploadTransport};

type HttpResponder = dyn Fn(&ApiRequest) -> Result<ApiResponse, ClientError> + Send + Sync;
type UploadResponder = dyn Fn(&UploadRequest) -> Result<ApiResponse, ClientError> + Send + Sync;

pub struct ScriptedHttpClient {
    responder: Box<HttpResponder>,
    latency: Duration,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedHttpClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, ClientError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Requests as sent, Authorization header included.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(request)
    }
}

/// Emits one progress event per chunk, honoring the abort signal between
/// chunks, then answers with the scripted response.
pub struct ScriptedUploadTransport {
    responder: Box<UploadResponder>,
    chunk_size: usize,
    chunk_latency: Duration,
    urls: Mutex<Vec<String>>,
}

impl ScriptedUploadTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&UploadRequest) -> Result<ApiResponse, ClientError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            chunk_size: super::reqwest_upload::DEFAULT_CHUNK_SIZE,
            chunk_latency: Duration::ZERO,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chunk_latency(mut self, latency: Duration) -> Self {
        self.chunk_latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.urls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Destination of every transfer, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl UploadTransport for ScriptedUploadTransport {
    async fn send(
        &self,
        request: UploadRequest,
        on_progress: ProgressFn,
    ) -> Result<ApiResponse, ClientError> {
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.url.clone());

        let mut signal = request.signal.clone();
        let total = request.file.len();
        let mut sent = 0u64;
        for chunk in super::reqwest_upload::chunks(&request.file.data, self.chunk_size) {
            if signal.is_aborted() {
                return Err(ClientError::Aborted);
            }
            if !self.chunk_latency.is_zero() {
                tokio::select! {
                    biased;
                    _ = signal.aborted() => return Err(ClientError::Aborted),
                    _ = tokio::time::sleep(self.chunk_latency) => {}
                }
            }
            sent += chunk.len() as u64;
            on_progress(UploadProgress::new(sent, total));
        }
        if signal.is_aborted() {
            return Err(ClientError::Aborted);
        }
        if total == 0 {
            on_progress(UploadProgress::new(0, 0));
        }
        (self.responder)(&request)
    }
}
