use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::query::{encode_component, first_value, parse_query};

/// Launch data handed to the mini-app by the host platform (`initData`).
///
/// Either URL-encoded `key=value` pairs or a JSON document. The client
/// treats it as opaque apart from best-effort user id extraction for logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchCredential(String);

impl LaunchCredential {
    /// Wrap a raw value. Blank input is not a credential.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(LaunchCredential(raw))
        }
    }

    /// Encode an identity the same way the platform does for discrete fields.
    pub fn from_identity(identity: &UserIdentity) -> Self {
        LaunchCredential(identity.encode())
    }

    /// Credential for the developer override identity (non-platform testing).
    pub fn dev_user(user_id: &str) -> Option<Self> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return None;
        }
        Some(LaunchCredential::from_identity(&UserIdentity {
            user_id: user_id.to_string(),
            first_name: Some("Dev".to_string()),
            last_name: Some("User".to_string()),
            username: None,
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether the credential is a JSON document rather than encoded pairs.
    pub fn is_json(&self) -> bool {
        self.0.trim_start().starts_with('{')
    }

    /// Best-effort user id, for logging only.
    pub fn user_id(&self) -> Option<String> {
        if self.is_json() {
            let value: Value = serde_json::from_str(self.0.trim()).ok()?;
            let user = value.get("user");
            return user
                .and_then(|u| json_field(u, "user_id").or_else(|| json_field(u, "id")))
                .or_else(|| json_field(&value, "user_id"))
                .or_else(|| json_field(&value, "id"));
        }

        let pairs = parse_query(&self.0);
        if let Some(user) = first_value(&pairs, "user")
            && let Ok(value) = serde_json::from_str::<Value>(user)
        {
            return json_field(&value, "user_id").or_else(|| json_field(&value, "id"));
        }
        first_value(&pairs, "user_id")
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Short prefix safe to put in log lines.
    pub fn preview(&self) -> String {
        preview(&self.0, 24)
    }
}

impl fmt::Debug for LaunchCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LaunchCredential").field(&self.preview()).finish()
    }
}

impl fmt::Display for LaunchCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The platform identity carried inside launch data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl UserIdentity {
    /// Pull an identity out of a JSON launch payload.
    ///
    /// Only payloads that carry a `user` object or a top-level `user_id`
    /// qualify. Fields on the nested `user` take precedence.
    pub fn from_json(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let user = value.get("user").filter(|u| u.is_object());
        if user.is_none() && value.get("user_id").is_none() {
            return None;
        }

        let pick = |key: &str| {
            user.and_then(|u| json_field(u, key))
                .or_else(|| json_field(value, key))
        };

        let user_id = user
            .and_then(|u| json_field(u, "user_id").or_else(|| json_field(u, "id")))
            .or_else(|| json_field(value, "user_id"))
            .or_else(|| json_field(value, "id"))?;

        Some(UserIdentity {
            user_id,
            first_name: pick("first_name"),
            last_name: pick("last_name"),
            username: pick("username"),
        })
    }

    /// `user_id=…&first_name=…&last_name=…&username=…`, empty fields omitted.
    pub fn encode(&self) -> String {
        let mut parts = vec![format!("user_id={}", encode_component(&self.user_id))];
        let optional = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("username", &self.username),
        ];
        for (key, value) in optional {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                parts.push(format!("{}={}", key, encode_component(v)));
            }
        }
        parts.join("&")
    }
}

/// String form of a scalar JSON field; numbers are rendered, blanks dropped.
fn json_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}…", head)
    }
}
