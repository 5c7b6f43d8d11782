use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Body of `POST /auth/webapp-init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAppInitRequest {
    #[serde(rename = "initData")]
    pub init_data: String,
}

/// Body of `POST /auth/login` and `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// Deadline attached to a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deadline {
    pub id: i64,
    pub note_id: i64,
    pub deadline_at: String,
    pub notification_enabled: bool,
    #[serde(default)]
    pub days_remaining: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub time_remaining_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadlineCreate {
    pub note_id: i64,
    pub deadline_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeadlineUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_enabled: Option<bool>,
}

impl DeadlineUpdate {
    pub fn is_empty(&self) -> bool {
        self.deadline_at.is_none() && self.notification_enabled.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ru,
    En,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            other => Err(format!("unknown language \"{}\" (expected ru or en)", other)),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            other => Err(format!("unknown theme \"{}\" (expected light or dark)", other)),
        }
    }
}

/// Most reminder offsets a user may configure per deadline.
pub const MAX_NOTIFICATION_TIMES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub id: i64,
    pub user_id: i64,
    pub language: Language,
    pub theme: Theme,
    /// Minutes before a deadline at which reminders fire.
    #[serde(default)]
    pub notification_times_minutes: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserSettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_times_minutes: Option<Vec<u32>>,
}

impl UserSettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.theme.is_none() && self.notification_times_minutes.is_none()
    }

    /// Reject updates the server would refuse anyway.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(times) = &self.notification_times_minutes
            && times.len() > MAX_NOTIFICATION_TIMES
        {
            return Err(format!(
                "at most {} notification times allowed, got {}",
                MAX_NOTIFICATION_TIMES,
                times.len()
            ));
        }
        Ok(())
    }
}
