use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::credential::preview;

/// Storage key holding the bearer token.
pub const TOKEN_KEY: &str = "token";
/// Storage key caching the last discovered launch credential.
pub const CACHED_CREDENTIAL_KEY: &str = "initData_saved";
/// Storage key where the cross-window relay stashes launch data.
pub const RELAY_KEY: &str = "initData_from_postMessage";
/// Developer-only override: a raw user id used when no platform data exists.
pub const DEV_USER_KEY: &str = "dev_user_id";
/// Storage key holding the cached profile JSON.
pub const PROFILE_KEY: &str = "user";

/// Bearer token issued by the backend for a launch credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(SessionToken(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the token, for logs and status output.
    pub fn preview(&self) -> String {
        preview(&self.0, 12)
    }
}

// Tokens never end up in logs in full.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&self.preview()).finish()
    }
}

/// Snapshot of the authenticated user as returned by `GET /auth/me`.
///
/// Display only; the server stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
