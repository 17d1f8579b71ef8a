//! Client configuration.
//!
//! Defaults target a local backend; every field can be overridden from a JSON
//! file or `UPLINK_*` environment variables.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::{Backoff, RetryPolicy};
use crate::domain::ClientError;

pub const ENV_API_BASE_URL: &str = "UPLINK_API_BASE_URL";
pub const ENV_EDGE_PUBLIC_URL: &str = "UPLINK_EDGE_PUBLIC_URL";
pub const ENV_TOKEN_FILE: &str = "UPLINK_TOKEN_FILE";
pub const ENV_MAX_ATTEMPTS: &str = "UPLINK_MAX_ATTEMPTS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "UPLINK_REQUEST_TIMEOUT_SECS";

/// Largest accepted exponential backoff multiplier.
pub const MAX_MULTIPLIER: f64 = 10.0;

/// Retry settings as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub backoff: Backoff,
    /// 0.0 disables jitter.
    pub jitter: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            multiplier: 2.0,
            backoff: Backoff::Exponential,
            jitter: 0.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            backoff: self.backoff,
            jitter: self.jitter.clamp(0.0, 1.0),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Configuration for the API and upload client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Backend base URL.
    pub api_base_url: String,
    /// Public edge-worker base; local upload hosts are rewritten to it.
    pub edge_public_url: String,
    /// Hosts treated as local/development addresses.
    pub local_hosts: Vec<String>,
    pub presign_path: String,
    pub refresh_path: String,
    pub retry: RetryConfig,
    pub request_timeout_secs: u64,
    /// Bytes per streamed upload chunk (one progress event each).
    pub upload_chunk_size: usize,
    /// Where tokens are persisted; in-memory when unset.
    pub token_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_owned(),
            edge_public_url: "https://upload.example.com".to_owned(),
            local_hosts: ["localhost", "127.0.0.1", "0.0.0.0", "::1"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            presign_path: "/api/upload/presign".to_owned(),
            refresh_path: "/api/auth/refresh".to_owned(),
            retry: RetryConfig::default(),
            request_timeout_secs: 30,
            upload_chunk_size: 64 * 1024,
            token_file: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `UPLINK_*` environment variables.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ClientError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Apply environment overrides through `lookup`.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_API_BASE_URL) {
            self.api_base_url = v;
        }
        if let Some(v) = lookup(ENV_EDGE_PUBLIC_URL) {
            self.edge_public_url = v;
        }
        if let Some(v) = lookup(ENV_TOKEN_FILE) {
            self.token_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_number(ENV_MAX_ATTEMPTS, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_number(ENV_REQUEST_TIMEOUT_SECS, &v)?;
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<(), ClientError> {
        for (name, value) in [
            ("apiBaseUrl", &self.api_base_url),
            ("edgePublicUrl", &self.edge_public_url),
        ] {
            let url = Url::parse(value)
                .map_err(|e| ClientError::Config(format!("{name} {value:?}: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ClientError::Config(format!(
                    "{name} {value:?}: scheme must be http or https"
                )));
            }
        }
        for (name, value) in [
            ("presignPath", &self.presign_path),
            ("refreshPath", &self.refresh_path),
        ] {
            if value.trim().is_empty() {
                return Err(ClientError::Config(format!("{name} must not be empty")));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Config("retry.maxAttempts must be >= 1".into()));
        }
        if !(1.0..=MAX_MULTIPLIER).contains(&self.retry.multiplier) {
            return Err(ClientError::Config(format!(
                "retry.multiplier must be within 1.0..={MAX_MULTIPLIER}"
            )));
        }
        if self.retry.max_delay_ms == 0 {
            return Err(ClientError::Config("retry.maxDelayMs must be > 0".into()));
        }
        if self.upload_chunk_size == 0 {
            return Err(ClientError::Config("uploadChunkSize must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config("requestTimeoutSecs must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ClientError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ClientError::Config(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, "http://localhost:5000");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.upload_chunk_size, 65_536);
        assert!(config.local_hosts.contains(&"127.0.0.1".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_BASE_URL, "https://api.example.com"),
            (ENV_MAX_ATTEMPTS, "5"),
            (ENV_TOKEN_FILE, "/tmp/uplink/tokens.json"),
        ]);
        let config = ClientConfig::default()
            .merge_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.token_file, Some(PathBuf::from("/tmp/uplink/tokens.json")));
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn bad_env_number_is_config_error() {
        let err = ClientConfig::default()
            .merge_env(|k| (k == ENV_REQUEST_TIMEOUT_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(msg) if msg.contains(ENV_REQUEST_TIMEOUT_SECS)));
    }

    #[test]
    fn from_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"edgePublicUrl": "https://cdn.example.net", "retry": {{"backoff": "linear"}}}}"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();

        assert_eq!(config.edge_public_url, "https://cdn.example.net");
        assert_eq!(config.retry.backoff, Backoff::Linear);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.presign_path, "/api/upload/presign");
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = ClientConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[rstest]
    #[case::bad_api_url(|c: &mut ClientConfig| c.api_base_url = "not a url".into())]
    #[case::ftp_edge(|c: &mut ClientConfig| c.edge_public_url = "ftp://edge".into())]
    #[case::zero_attempts(|c: &mut ClientConfig| c.retry.max_attempts = 0)]
    #[case::shrinking_backoff(|c: &mut ClientConfig| c.retry.multiplier = 0.5)]
    #[case::runaway_backoff(|c: &mut ClientConfig| c.retry.multiplier = 1e20)]
    #[case::nan_backoff(|c: &mut ClientConfig| c.retry.multiplier = f64::NAN)]
    #[case::infinite_backoff(|c: &mut ClientConfig| c.retry.multiplier = f64::INFINITY)]
    #[case::zero_max_delay(|c: &mut ClientConfig| c.retry.max_delay_ms = 0)]
    #[case::zero_chunk(|c: &mut ClientConfig| c.upload_chunk_size = 0)]
    #[case::zero_timeout(|c: &mut ClientConfig| c.request_timeout_secs = 0)]
    #[case::empty_presign(|c: &mut ClientConfig| c.presign_path = " ".into())]
    fn validate_rejects(#[case] mutate: fn(&mut ClientConfig)) {
        let mut config = ClientConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn retry_config_maps_to_policy() {
        let retry = RetryConfig {
            max_attempts: 4,
            base_delay_ms: 250,
            multiplier: 3.0,
            backoff: Backoff::Linear,
            jitter: 2.0,
            max_delay_ms: 5_000,
        };
        let policy = retry.policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.backoff, Backoff::Linear);
        assert_eq!(policy.jitter, 1.0);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }
}
