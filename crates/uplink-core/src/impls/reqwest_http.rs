//! ReqwestHttpClient - reqwest ベースの HttpClient

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use std::time::Duration;
use tracing::trace;

use crate::domain::{ApiRequest, ApiResponse, ClientError, HttpMethod};
use crate::ports::HttpClient;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut builder = self
            .client
            .request(method(request.method), &request.url)
            .header(REQUEST_ID_HEADER, request.id.to_string());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(send_error)?;
        let (status, status_text, headers) = head(&response);
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        trace!(request_id = %request.id, status, bytes = body.len(), "response received");

        Ok(ApiResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

pub(crate) fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Builder failures are caller mistakes; everything else means no response.
pub(crate) fn send_error(err: reqwest::Error) -> ClientError {
    if err.is_builder() {
        ClientError::InvalidUrl(err.to_string())
    } else {
        ClientError::Network(err.to_string())
    }
}

pub(crate) fn head(response: &Response) -> (u16, String, Vec<(String, String)>) {
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    (
        status.as_u16(),
        status.canonical_reason().unwrap_or_default().to_string(),
        headers,
    )
}
