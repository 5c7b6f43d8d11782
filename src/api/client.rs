//! Authenticated REST client for the notes backend.
//!
//! Every call carries the stored bearer token. A 401 is authoritative: the
//! token is deleted so the next command goes back through resolution.
//! Connection failures and 5xx answers leave the token alone.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::api::transport::{ApiRequest, ApiResponse, Method, Transport, TransportError};
use crate::io::store::{KeyValueStore, StoreError};
use crate::model::api::{
    Deadline, DeadlineCreate, DeadlineUpdate, LoginRequest, OkResponse, Tag, TokenResponse,
    UserSettings, UserSettingsUpdate,
};
use crate::model::session::{PROFILE_KEY, SessionToken, TOKEN_KEY, UserProfile};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unauthorized; session token removed")]
    Unauthorized,
    /// 401 on a request that carried no session token.
    #[error("not authorized: {0}")]
    Denied(String),
    #[error("server temporarily unavailable (HTTP {status}); try again later")]
    Unavailable { status: u16 },
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("cannot reach the server: {0}")]
    Connection(#[from] TransportError),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    InvalidInput(String),
}

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn KeyValueStore>) -> Self {
        ApiClient { transport, store }
    }

    fn token(&self) -> Result<SessionToken, ApiError> {
        self.store
            .get(TOKEN_KEY)?
            .and_then(SessionToken::new)
            .ok_or(ApiError::NotLoggedIn)
    }

    /// Send a request, attaching the token when one is stored.
    async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if request.bearer.is_none()
            && let Some(token) = self.store.get(TOKEN_KEY)?
        {
            request.bearer = Some(token);
        }
        let had_token = request.bearer.is_some();
        let (method, path) = (request.method, request.path.clone());

        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        log::warn!("{} {} -> HTTP {}", method, path, response.status);
        match response.status {
            401 if had_token => {
                self.store.remove(TOKEN_KEY)?;
                log::info!("session token removed after 401");
                Err(ApiError::Unauthorized)
            }
            401 => Err(ApiError::Denied(response.error_message())),
            502 | 503 => Err(ApiError::Unavailable {
                status: response.status,
            }),
            status => Err(ApiError::Status {
                status,
                message: response.error_message(),
            }),
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        serde_json::from_str(&response.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn authed<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let token = self.token()?;
        self.send_json(request.bearer(token.as_str())).await
    }

    /// `GET /auth/me`, refreshing the cached profile.
    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        let profile: UserProfile = self.authed(ApiRequest::get("/auth/me")).await?;
        let json = serde_json::to_string(&profile).map_err(StoreError::from)?;
        if let Err(e) = self.store.set(PROFILE_KEY, &json) {
            log::warn!("could not cache profile: {}", e);
        }
        Ok(profile)
    }

    /// Username + uuid login; stores the issued token.
    pub async fn login(&self, username: &str, uuid: &str) -> Result<SessionToken, ApiError> {
        let body = LoginRequest {
            username: username.to_string(),
            uuid: uuid.to_string(),
        };
        let reply: TokenResponse = self
            .send_json(ApiRequest::with_json(Method::Post, "/auth/login", &body))
            .await?;
        let token = reply
            .access_token
            .and_then(SessionToken::new)
            .ok_or_else(|| ApiError::Decode("no access_token in login response".to_string()))?;
        self.store.set(TOKEN_KEY, token.as_str())?;
        Ok(token)
    }

    pub async fn register(&self, username: &str, uuid: &str) -> Result<(), ApiError> {
        let body = LoginRequest {
            username: username.to_string(),
            uuid: uuid.to_string(),
        };
        self.send(ApiRequest::with_json(Method::Post, "/auth/register", &body))
            .await?;
        Ok(())
    }

    pub async fn create_tag(&self, name: &str) -> Result<Tag, ApiError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput("tag name is empty".to_string()));
        }
        let body = serde_json::json!({ "name": name });
        self.authed(ApiRequest::with_json(Method::Post, "/api/tags", &body))
            .await
    }

    pub async fn create_deadline(&self, note_id: i64, deadline_at: &str) -> Result<Deadline, ApiError> {
        let body = DeadlineCreate {
            note_id,
            deadline_at: deadline_at.to_string(),
        };
        self.authed(ApiRequest::with_json(Method::Post, "/api/deadlines", &body))
            .await
    }

    pub async fn get_deadline(&self, note_id: i64) -> Result<Deadline, ApiError> {
        self.authed(ApiRequest::get(deadline_path(note_id))).await
    }

    pub async fn update_deadline(
        &self,
        note_id: i64,
        update: &DeadlineUpdate,
    ) -> Result<Deadline, ApiError> {
        if update.is_empty() {
            return Err(ApiError::InvalidInput("nothing to update".to_string()));
        }
        self.authed(ApiRequest::with_json(
            Method::Patch,
            deadline_path(note_id),
            update,
        ))
        .await
    }

    pub async fn delete_deadline(&self, note_id: i64) -> Result<OkResponse, ApiError> {
        self.authed(ApiRequest::delete(deadline_path(note_id))).await
    }

    pub async fn toggle_deadline_notifications(&self, note_id: i64) -> Result<Deadline, ApiError> {
        let path = format!("{}/notifications/toggle", deadline_path(note_id));
        self.authed(ApiRequest::post(path)).await
    }

    pub async fn test_deadline_notification(&self, note_id: i64) -> Result<OkResponse, ApiError> {
        let path = format!("{}/notifications/test", deadline_path(note_id));
        self.authed(ApiRequest::post(path)).await
    }

    pub async fn settings(&self) -> Result<UserSettings, ApiError> {
        self.authed(ApiRequest::get("/api/settings")).await
    }

    pub async fn update_settings(&self, update: &UserSettingsUpdate) -> Result<UserSettings, ApiError> {
        if update.is_empty() {
            return Err(ApiError::InvalidInput("nothing to update".to_string()));
        }
        update.validate().map_err(ApiError::InvalidInput)?;
        self.authed(ApiRequest::with_json(Method::Put, "/api/settings", update))
            .await
    }
}

fn deadline_path(note_id: i64) -> String {
    format!("/api/deadlines/{}", note_id)
}
