//! ClientBuilder - クライアントの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 差し替え可能な ports（未指定なら本番用の実装を使う）

use std::sync::Arc;
use tracing::info;

use super::api::ApiClient;
use super::auth_fetch::AuthFetch;
use super::direct_upload::DirectUploader;
use super::presign::{EdgeRouting, PresignNegotiator};
use super::uploader::{UploadOptions, Uploader};
use crate::config::ClientConfig;
use crate::domain::{
    ClientError, PresignRequest, PresignTicket, TokenPair, UploadFile, UploadResult,
};
use crate::impls::{
    FileTokenPersistence, HttpTokenRefresher, InMemoryTokenPersistence, ReqwestHttpClient,
    ReqwestUploadTransport, SharedTokenStore,
};
use crate::ports::{
    Clock, HttpClient, SystemClock, TokenPersistence, TokenRefresher, TokenStore, UploadTransport,
};

/// ClientBuilder は Client を構築
///
/// # 使用例
/// ```ignore
/// let client = ClientBuilder::new(ClientConfig::from_env()?)
///     .with_persistence(Arc::new(InMemoryTokenPersistence::new()))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定を検証（URL、試行回数、チャンクサイズ）
/// - 不正なら BuildError を返し、最初のリクエストまで問題を持ち越さない
pub struct ClientBuilder {
    config: ClientConfig,
    http: Option<Arc<dyn HttpClient>>,
    transport: Option<Arc<dyn UploadTransport>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    persistence: Option<Arc<dyn TokenPersistence>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はクライアント構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialize {component}: {reason}")]
    Init {
        component: &'static str,
        reason: String,
    },
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: None,
            transport: None,
            refresher: None,
            persistence: None,
            clock: None,
        }
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn UploadTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn TokenPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and wire every component.
    pub fn build(self) -> Result<Client, BuildError> {
        let config = self.config;
        config.validate().map_err(invalid)?;
        let edge = EdgeRouting::new(&config.edge_public_url, &config.local_hosts).map_err(invalid)?;

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(
                ReqwestHttpClient::new(config.request_timeout()).map_err(init("http client"))?,
            ),
        };
        let transport: Arc<dyn UploadTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestUploadTransport::new(config.request_timeout(), config.upload_chunk_size)
                    .map_err(init("upload transport"))?,
            ),
        };
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => {
                let url = format!(
                    "{}/{}",
                    config.api_base_url.trim_end_matches('/'),
                    config.refresh_path.trim_start_matches('/')
                );
                Arc::new(HttpTokenRefresher::new(Arc::clone(&http), url))
            }
        };
        let persistence: Arc<dyn TokenPersistence> = match (self.persistence, &config.token_file) {
            (Some(persistence), _) => persistence,
            (None, Some(path)) => Arc::new(FileTokenPersistence::new(path)),
            (None, None) => Arc::new(InMemoryTokenPersistence::new()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let tokens = Arc::new(SharedTokenStore::new(refresher, persistence));
        let api = ApiClient::new(
            config.api_base_url.clone(),
            AuthFetch::new(http, tokens.clone()),
            config.retry.policy(),
        );
        let negotiator = PresignNegotiator::new(
            api.clone(),
            config.presign_path.clone(),
            edge.clone(),
            Arc::clone(&clock),
        );
        let uploader = Uploader::new(negotiator, DirectUploader::new(transport, edge), clock);

        info!(
            api = %config.api_base_url,
            edge = %config.edge_public_url,
            persisted = config.token_file.is_some(),
            "client ready"
        );
        Ok(Client {
            config,
            api,
            uploader,
            tokens,
        })
    }
}

fn invalid(err: ClientError) -> BuildError {
    match err {
        ClientError::Config(msg) => BuildError::InvalidConfig(msg),
        other => BuildError::InvalidConfig(other.to_string()),
    }
}

fn init(component: &'static str) -> impl Fn(ClientError) -> BuildError {
    move |err| BuildError::Init {
        component,
        reason: err.to_string(),
    }
}

/// Client は構築済みの API・アップロードクライアント
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    api: ApiClient,
    uploader: Uploader,
    tokens: Arc<SharedTokenStore>,
}

impl Client {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    pub fn tokens(&self) -> &Arc<SharedTokenStore> {
        &self.tokens
    }

    pub async fn login(&self, tokens: TokenPair) -> Result<(), ClientError> {
        self.tokens.store(tokens).await
    }

    pub async fn logout(&self) {
        self.tokens.clear().await;
    }

    pub async fn get_presign_url(&self, request: &PresignRequest) -> Option<PresignTicket> {
        self.uploader.negotiator().get_presign_url(request).await
    }

    pub async fn upload_file_with_presign(
        &self,
        file: UploadFile,
        options: UploadOptions,
    ) -> UploadResult {
        self.uploader.upload_file_with_presign(file, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccessRole, AccessToken, ApiResponse};
    use crate::impls::{ScriptedHttpClient, ScriptedUploadTransport, StaticRefresher};
    use serde_json::json;

    #[test]
    fn builds_with_default_ports() {
        let client = ClientBuilder::new(ClientConfig::default()).build();
        assert!(client.is_ok());
    }

    #[test]
    fn invalid_config_fails_fast() {
        let config = ClientConfig {
            upload_chunk_size: 0,
            ..ClientConfig::default()
        };
        let err = ClientBuilder::new(config).build().err().unwrap();
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("uploadChunkSize")));
    }

    #[test]
    fn bad_edge_url_fails_fast() {
        let config = ClientConfig {
            edge_public_url: "upload.example.com".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            ClientBuilder::new(config).build(),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn login_then_upload_end_to_end() {
        let http = Arc::new(ScriptedHttpClient::new(|req| {
            if req.header("Authorization") != Some("Bearer session") {
                return Ok(ApiResponse::new(401, ""));
            }
            Ok(ApiResponse::json(
                200,
                &json!({"Result": {
                    "UploadUrl": "http://localhost:8787/upload/k1",
                    "Key": "avatars/k1.png",
                    "ExpiresIn": 300
                }}),
            ))
        }));
        let transport = Arc::new(ScriptedUploadTransport::new(|_| Ok(ApiResponse::new(200, ""))));
        let client = ClientBuilder::new(ClientConfig::default())
            .with_http(http.clone())
            .with_transport(transport.clone())
            .with_refresher(Arc::new(StaticRefresher::new(TokenPair::new("other", None))))
            .build()
            .unwrap();

        client
            .login(TokenPair::new("session", Some("r".into())))
            .await
            .unwrap();
        assert_eq!(
            client.tokens().token().await,
            Some(AccessToken::new("session"))
        );

        let result = client
            .upload_file_with_presign(
                UploadFile::new("k1.png", "image/png", vec![0u8; 8]),
                UploadOptions::new("avatars").with_access_role(AccessRole::Student),
            )
            .await;

        assert!(result.success, "{result:?}");
        assert_eq!(
            result.public_url.as_deref(),
            Some("https://upload.example.com/student/avatars/k1.png")
        );
        assert_eq!(transport.urls(), vec!["https://upload.example.com/upload/k1"]);
        assert_eq!(http.calls()[0].url, "http://localhost:5000/api/upload/presign");

        client.logout().await;
        assert!(client.tokens().token().await.is_none());
    }
}
