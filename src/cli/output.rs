use serde::Serialize;

use crate::auth::discovery::Discovered;
use crate::auth::resolver::ResolutionState;
use crate::host::relay::RelayOutcome;
use crate::model::api::{Deadline, Language, Theme, UserSettings};
use crate::model::session::UserProfile;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct DiscoverJson {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct LoginJson {
    pub state: ResolutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct StatusJson {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relayed_credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_user: Option<String>,
    pub store: String,
}

#[derive(Serialize)]
pub struct RelayJson {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn discovered_to_json(found: Option<&Discovered>) -> DiscoverJson {
    match found {
        Some(d) => DiscoverJson {
            found: true,
            source: Some(d.source.to_string()),
            credential: Some(d.credential.as_str().to_string()),
            user_id: d.credential.user_id(),
        },
        None => DiscoverJson {
            found: false,
            source: None,
            credential: None,
            user_id: None,
        },
    }
}

pub fn relay_to_json(outcome: &RelayOutcome) -> RelayJson {
    match outcome {
        RelayOutcome::Accepted(cred) => RelayJson {
            outcome: "accepted",
            credential: Some(cred.as_str().to_string()),
        },
        RelayOutcome::AlreadyRelayed => RelayJson {
            outcome: "already_relayed",
            credential: None,
        },
        RelayOutcome::Ignored => RelayJson {
            outcome: "ignored",
            credential: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

pub fn format_discovered(found: &Discovered) -> Vec<String> {
    let mut lines = vec![
        format!("source:     {}", found.source),
        format!("credential: {}", found.credential),
    ];
    if let Some(id) = found.credential.user_id() {
        lines.push(format!("user id:    {}", id));
    }
    lines
}

pub fn format_profile(profile: &UserProfile) -> String {
    match &profile.uuid {
        Some(uuid) => format!("{} (id {}, uuid {})", profile.username, profile.id, uuid),
        None => format!("{} (id {})", profile.username, profile.id),
    }
}

/// Format a deadline as a short block
pub fn format_deadline(deadline: &Deadline) -> Vec<String> {
    let mut lines = vec![format!("note {}: due {}", deadline.note_id, deadline.deadline_at)];
    let remaining = match (&deadline.time_remaining_text, deadline.days_remaining) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(days)) => Some(format!("{} days", days)),
        (None, None) => None,
    };
    if let Some(remaining) = remaining {
        match &deadline.status {
            Some(status) => lines.push(format!("  {} ({})", remaining, status)),
            None => lines.push(format!("  {}", remaining)),
        }
    }
    lines.push(format!(
        "  notifications {}",
        if deadline.notification_enabled {
            "on"
        } else {
            "off"
        }
    ));
    lines
}

pub fn format_settings(settings: &UserSettings) -> Vec<String> {
    let language = match settings.language {
        Language::Ru => "ru",
        Language::En => "en",
    };
    let theme = match settings.theme {
        Theme::Light => "light",
        Theme::Dark => "dark",
    };
    let reminders = if settings.notification_times_minutes.is_empty() {
        "none".to_string()
    } else {
        settings
            .notification_times_minutes
            .iter()
            .map(|m| format_minutes(*m))
            .collect::<Vec<_>>()
            .join(", ")
    };
    vec![
        format!("language:  {}", language),
        format!("theme:     {}", theme),
        format!("reminders: {}", reminders),
    ]
}

/// `90` → `1h 30m before`
fn format_minutes(minutes: u32) -> String {
    let (d, h, m) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    let mut parts = Vec::new();
    if d > 0 {
        parts.push(format!("{}d", d));
    }
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    if m > 0 || parts.is_empty() {
        parts.push(format!("{}m", m));
    }
    format!("{} before", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::discovery::CredentialSource;
    use crate::model::credential::LaunchCredential;
    use pretty_assertions::assert_eq;

    #[test]
    fn minutes_render_compactly() {
        assert_eq!(format_minutes(0), "0m before");
        assert_eq!(format_minutes(15), "15m before");
        assert_eq!(format_minutes(90), "1h 30m before");
        assert_eq!(format_minutes(1440), "1d before");
        assert_eq!(format_minutes(1500), "1d 1h before");
    }

    #[test]
    fn deadline_block() {
        let deadline = Deadline {
            id: 1,
            note_id: 9,
            deadline_at: "2026-11-01T10:00:00Z".into(),
            notification_enabled: false,
            days_remaining: Some(3),
            status: Some("upcoming".into()),
            time_remaining_text: None,
        };
        insta::assert_snapshot!(format_deadline(&deadline).join("\n"), @r"
        note 9: due 2026-11-01T10:00:00Z
          3 days (upcoming)
          notifications off
        ");
    }

    #[test]
    fn discovered_json_shape() {
        let found = Discovered {
            credential: LaunchCredential::new("user_id=42&first_name=Ann").unwrap(),
            source: CredentialSource::UserFields,
        };
        let json = serde_json::to_value(discovered_to_json(Some(&found))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "found": true,
                "source": "user-fields",
                "credential": "user_id=42&first_name=Ann",
                "user_id": "42"
            })
        );
        let none = serde_json::to_value(discovered_to_json(None)).unwrap();
        assert_eq!(none, serde_json::json!({"found": false}));
    }
}
