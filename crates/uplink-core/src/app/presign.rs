//! PresignNegotiator - 直接アップロード用チケットの取得
//!
//! # 責務
//! - バックエンドに PresignRequest を送り PresignTicket を得る（AuthFetch 経由）
//! - ローカル/開発ホストを指す URL を公開エッジのホストに書き換える
//! - publicUrl がなければ `{edge}/{role}/{key}` を導出する
//! - 失敗はすべて `None`（呼び出し元は中断する）

use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::api::ApiClient;
use crate::domain::{
    AccessRole, ApiRequest, ClientError, PresignRequest, PresignTicket, PresignTicketWire,
};
use crate::ports::Clock;

/// Public edge location and the hosts that must never leak to callers.
#[derive(Debug, Clone)]
pub struct EdgeRouting {
    public_base: Url,
    local_hosts: Vec<String>,
}

impl EdgeRouting {
    pub fn new(public_base: &str, local_hosts: &[String]) -> Result<Self, ClientError> {
        let public_base = Url::parse(public_base)
            .map_err(|e| ClientError::InvalidUrl(format!("{public_base}: {e}")))?;
        if public_base.host_str().is_none() {
            return Err(ClientError::InvalidUrl(format!(
                "{public_base}: edge url has no host"
            )));
        }
        Ok(Self {
            public_base,
            local_hosts: local_hosts
                .iter()
                .map(|h| normalize_host(h).to_ascii_lowercase())
                .collect(),
        })
    }

    pub fn public_base(&self) -> &Url {
        &self.public_base
    }

    pub fn is_local(&self, url: &Url) -> bool {
        url.host_str()
            .map(|h| normalize_host(h).to_ascii_lowercase())
            .is_some_and(|h| self.local_hosts.iter().any(|l| *l == h))
    }

    /// Point `raw` at the public edge if it targets a local host (or has no
    /// host at all). Path and query are preserved. Any other URL is returned
    /// exactly as received, since it may carry a signature.
    pub fn rewrite(&self, raw: &str) -> Result<String, ClientError> {
        if !raw.contains("://") {
            let joined = self
                .public_base
                .join(raw)
                .map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?;
            return Ok(joined.to_string());
        }
        let url = Url::parse(raw).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?;
        if !self.is_local(&url) {
            return Ok(raw.to_string());
        }

        let mut rewritten = format!(
            "{}{}",
            self.public_base.origin().ascii_serialization(),
            url.path()
        );
        if let Some(query) = url.query() {
            rewritten.push('?');
            rewritten.push_str(query);
        }
        debug!(from = %url, to = %rewritten, "rewrote local upload url");
        Ok(rewritten)
    }

    /// `{edge}/{role segment}/{object key}`
    pub fn derive_public_url(&self, role: AccessRole, object_key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.public_base.as_str().trim_end_matches('/'),
            role.path_segment(),
            object_key.trim_start_matches('/')
        )
    }
}

fn normalize_host(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

#[derive(Clone)]
pub struct PresignNegotiator {
    api: ApiClient,
    presign_path: String,
    edge: EdgeRouting,
    clock: Arc<dyn Clock>,
}

impl PresignNegotiator {
    pub fn new(
        api: ApiClient,
        presign_path: impl Into<String>,
        edge: EdgeRouting,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            api,
            presign_path: presign_path.into(),
            edge,
            clock,
        }
    }

    pub fn edge(&self) -> &EdgeRouting {
        &self.edge
    }

    /// Negotiate a ticket for one file. `None` on any failure.
    pub async fn get_presign_url(&self, request: &PresignRequest) -> Option<PresignTicket> {
        match self.negotiate(request).await {
            Ok(ticket) => {
                info!(
                    object_key = %ticket.object_key,
                    upload_id = %ticket.upload_id,
                    expires_in = ticket.expires_in_seconds,
                    "presign ticket issued"
                );
                Some(ticket)
            }
            Err(err) => {
                warn!(file_name = %request.file_name, error = %err, "presign negotiation failed");
                None
            }
        }
    }

    async fn negotiate(&self, request: &PresignRequest) -> Result<PresignTicket, ClientError> {
        let body = serde_json::to_value(request)?;
        // the backend de-duplicates presign calls, so replays are safe
        let call = ApiRequest::post(self.api.url(&self.presign_path), body).idempotent();
        let envelope = self.api.send(call).await?;
        let wire: PresignTicketWire = envelope.into_result().and_then(|result| {
            serde_json::from_value(result).map_err(ClientError::from)
        })?;
        self.ticket_from_wire(wire, request.access_role)
    }

    fn ticket_from_wire(
        &self,
        wire: PresignTicketWire,
        requested_role: AccessRole,
    ) -> Result<PresignTicket, ClientError> {
        if wire.upload_url.trim().is_empty() {
            return Err(ClientError::Decode("presign response has no upload url".into()));
        }
        if wire.key.trim().is_empty() {
            return Err(ClientError::Decode("presign response has no object key".into()));
        }

        let access_role = wire.access_role.unwrap_or(requested_role);
        let upload_url = self.edge.rewrite(&wire.upload_url)?;
        let public_url = match wire.public_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => self.edge.rewrite(&url)?,
            None => self.edge.derive_public_url(access_role, &wire.key),
        };

        Ok(PresignTicket {
            upload_url,
            object_key: wire.key,
            upload_id: wire.upload_id,
            expires_in_seconds: wire.expires_in,
            access_role,
            public_url: Some(public_url),
            issued_at: self.clock.now(),
        })
    }
}
