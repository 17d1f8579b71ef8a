//! Presign model: access roles, the negotiation request and the ticket.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::errors::ClientError;

/// Access role attached to an upload.
///
/// Wire names are the backend's (`GUEST`, `Student`, `Teacher`, `Admin`);
/// parsing is case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AccessRole {
    #[default]
    Guest,
    Student,
    Teacher,
    Admin,
}

impl AccessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Guest => "GUEST",
            AccessRole::Student => "Student",
            AccessRole::Teacher => "Teacher",
            AccessRole::Admin => "Admin",
        }
    }

    /// Path segment used when deriving public URLs.
    pub fn path_segment(&self) -> String {
        match self {
            AccessRole::Guest => "public".to_string(),
            other => other.as_str().to_lowercase(),
        }
    }
}

impl fmt::Display for AccessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessRole {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" | "public" => Ok(AccessRole::Guest),
            "student" => Ok(AccessRole::Student),
            "teacher" => Ok(AccessRole::Teacher),
            "admin" => Ok(AccessRole::Admin),
            other => Err(ClientError::Decode(format!("unknown access role: {other}"))),
        }
    }
}

impl Serialize for AccessRole {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AccessRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Body of `POST /api/upload/presign`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PresignRequest {
    pub file_name: String,
    pub content_type: String,
    pub folder: String,
    pub access_role: AccessRole,
}

/// Ticket payload as the backend sends it, after key canonicalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignTicketWire {
    pub upload_url: String,
    #[serde(alias = "objectKey")]
    pub key: String,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub access_role: Option<AccessRole>,
    #[serde(default)]
    pub public_url: Option<String>,
}

/// A short-lived, single-use upload destination.
///
/// `DirectUploader::upload_file` takes the ticket by value, so one ticket
/// backs at most one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignTicket {
    pub upload_url: String,
    pub object_key: String,
    pub upload_id: String,
    pub expires_in_seconds: u64,
    pub access_role: AccessRole,
    pub public_url: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl PresignTicket {
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A ticket with `expires_in_seconds == 0` carries no expiry information
    /// and is left to the edge to judge.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_in_seconds > 0 && now >= self.expires_at()
    }
}
