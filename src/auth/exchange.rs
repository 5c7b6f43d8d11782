//! Launch credential → session token.
//!
//! `POST /auth/webapp-init` with bounded retries on transient failures,
//! then persist the token and read it back. The profile fetch that follows
//! is best-effort: the token stands even when `/auth/me` fails.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::transport::{ApiRequest, ApiResponse, Method, Transport, TransportError};
use crate::auth::wait::sleep_or_cancel;
use crate::io::store::{KeyValueStore, StoreError, offload};
use crate::model::api::{TokenResponse, WebAppInitRequest};
use crate::model::config::ExchangeConfig;
use crate::model::credential::LaunchCredential;
use crate::model::session::{PROFILE_KEY, SessionToken, TOKEN_KEY, UserProfile};

pub const WEBAPP_INIT_PATH: &str = "/auth/webapp-init";
pub const ME_PATH: &str = "/auth/me";

/// Statuses that mean "try again shortly".
pub fn is_transient(status: u16) -> bool {
    matches!(status, 502 | 503 | 504 | 429)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total requests, first try included.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl From<&ExchangeConfig> for RetryPolicy {
    fn from(config: &ExchangeConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("auth service unavailable (HTTP {status}) after {attempts} attempts")]
    Unavailable { attempts: u32, status: u16 },
    #[error("auth service unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        source: TransportError,
    },
    #[error("launch data rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("unexpected auth response: {0}")]
    Malformed(String),
    #[error("auth response carried no access_token")]
    MissingToken,
    #[error("could not store session token: {0}")]
    Persist(#[from] StoreError),
    #[error("stored token does not match the issued token")]
    VerifyMismatch,
    #[error("cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// The server looked at the credential and said no.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ExchangeError::Rejected { status, .. } if (400..500).contains(status))
    }
}

pub struct TokenExchanger {
    transport: Arc<dyn Transport>,
    store: Arc<dyn KeyValueStore>,
    policy: RetryPolicy,
}

impl TokenExchanger {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        policy: RetryPolicy,
    ) -> Self {
        TokenExchanger {
            transport,
            store,
            policy,
        }
    }

    /// Exchange, persist, verify, then refresh the cached profile.
    pub async fn exchange(
        &self,
        credential: &LaunchCredential,
        cancel: &CancellationToken,
    ) -> Result<SessionToken, ExchangeError> {
        let response = self.post_with_retry(credential, cancel).await?;
        let token = parse_token(&response)?;

        let store = self.store.clone();
        let issued = token.as_str().to_string();
        let stored = offload(move || {
            store.set(TOKEN_KEY, &issued)?;
            store.get(TOKEN_KEY)
        })
        .await??;
        match stored {
            Some(stored) if stored == token.as_str() => {}
            _ => return Err(ExchangeError::VerifyMismatch),
        }
        log::info!("session token stored ({})", token.preview());

        self.refresh_profile(&token).await;
        Ok(token)
    }

    async fn post_with_retry(
        &self,
        credential: &LaunchCredential,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ExchangeError> {
        let body = WebAppInitRequest {
            init_data: credential.as_str().to_string(),
        };
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(ExchangeError::Cancelled);
            }
            log::debug!("exchange: attempt {}/{}", attempt, max);
            let request = ApiRequest::with_json(Method::Post, WEBAPP_INIT_PATH, &body);

            let err = match self.transport.send(request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if is_transient(response.status) => ExchangeError::Unavailable {
                    attempts: attempt,
                    status: response.status,
                },
                Ok(response) => {
                    return Err(ExchangeError::Rejected {
                        status: response.status,
                        message: response.error_message(),
                    });
                }
                Err(e) => ExchangeError::Unreachable {
                    attempts: attempt,
                    source: e,
                },
            };

            if attempt >= max {
                return Err(err);
            }
            log::warn!("exchange: {}; retrying in {:?}", err, self.policy.backoff);
            sleep_or_cancel(self.policy.backoff, cancel)
                .await
                .map_err(|_| ExchangeError::Cancelled)?;
        }
    }

    async fn refresh_profile(&self, token: &SessionToken) {
        let request = ApiRequest::get(ME_PATH).bearer(token.as_str());
        let profile = match self.transport.send(request).await {
            Ok(response) if response.is_success() => {
                serde_json::from_str::<UserProfile>(&response.body)
            }
            Ok(response) => {
                log::warn!("profile fetch failed: HTTP {}", response.status);
                return;
            }
            Err(e) => {
                log::warn!("profile fetch failed: {}", e);
                return;
            }
        };
        let store = self.store.clone();
        let stored = match profile.and_then(|p| serde_json::to_string(&p)) {
            Ok(json) => offload(move || store.set(PROFILE_KEY, &json))
                .await
                .and_then(|written| written),
            Err(e) => Err(StoreError::from(e)),
        };
        if let Err(e) = stored {
            log::warn!("could not cache profile: {}", e);
        }
    }
}

fn parse_token(response: &ApiResponse) -> Result<SessionToken, ExchangeError> {
    let parsed: TokenResponse = serde_json::from_str(&response.body)
        .map_err(|e| ExchangeError::Malformed(e.to_string()))?;
    parsed
        .access_token
        .and_then(SessionToken::new)
        .ok_or(ExchangeError::MissingToken)
}
