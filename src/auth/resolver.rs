//! The auto-login state machine.
//!
//! ```text
//! Idle ─ token stored ─────────────────────────────▶ Authenticated
//!  │
//!  ▼
//! Discovering ─ hit ──▶ Exchanging ─ ok ───────────▶ Authenticated
//!  │ miss                 │ fail (budget left)
//!  ▼                      └─▶ retry_delay, back to Discovering
//! Waiting ─ hit / dev override ─▶ Exchanging
//!  │ timeout                                          budget spent
//!  └──────────────────────────────────────────────▶ Exhausted
//! ```
//!
//! One [`Resolver`] is shared by every entry point. A caller that arrives
//! while a resolution is running waits for it and reuses its outcome; only
//! the caller that actually ran the procedure is told it "led", so the
//! failure is surfaced once.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::api::transport::Transport;
use crate::auth::discovery::{CredentialSource, Discovered, Discovery};
use crate::auth::exchange::{ExchangeError, RetryPolicy, TokenExchanger};
use crate::auth::wait::{PollPolicy, WaitError, sleep_or_cancel, wait_for};
use crate::host::page::HostEnvironment;
use crate::io::store::{KeyValueStore, offload};
use crate::model::config::ClientConfig;
use crate::model::credential::LaunchCredential;
use crate::model::platform::{Platform, TimingProfile};
use crate::model::session::{DEV_USER_KEY, SessionToken, TOKEN_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    Idle,
    Discovering,
    Waiting,
    Exchanging,
    Authenticated,
    Exhausted,
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionState::Idle => "idle",
            ResolutionState::Discovering => "discovering",
            ResolutionState::Waiting => "waiting",
            ResolutionState::Exchanging => "exchanging",
            ResolutionState::Authenticated => "authenticated",
            ResolutionState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustReason {
    /// No launch data anywhere and no developer override.
    NoLaunchData,
    /// Launch data was found but every exchange failed.
    ExchangeFailed { attempts: u32, last_error: String },
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustReason::NoLaunchData => {
                write!(f, "no launch data found; open the app from the host platform")
            }
            ExhaustReason::ExchangeFailed {
                attempts,
                last_error,
            } => write!(f, "login failed after {} attempts: {}", attempts, last_error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Authenticated(SessionToken),
    Exhausted(ExhaustReason),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolution: Resolution,
    /// This caller ran the procedure rather than joining one in flight.
    pub led: bool,
}

impl ResolveReport {
    /// Whether this caller owns showing the failure.
    pub fn should_surface_failure(&self) -> bool {
        self.led && matches!(self.resolution, Resolution::Exhausted(_))
    }

    pub fn token(&self) -> Option<&SessionToken> {
        match &self.resolution {
            Resolution::Authenticated(token) => Some(token),
            _ => None,
        }
    }
}

pub struct Resolver {
    discovery: Discovery,
    exchanger: TokenExchanger,
    store: Arc<dyn KeyValueStore>,
    timing: TimingProfile,
    /// Held for the duration of a run; holds the last outcome after it.
    in_flight: Mutex<Option<Resolution>>,
    state: watch::Sender<ResolutionState>,
}

impl Resolver {
    pub fn new(
        discovery: Discovery,
        exchanger: TokenExchanger,
        store: Arc<dyn KeyValueStore>,
        timing: TimingProfile,
    ) -> Self {
        let (state, _) = watch::channel(ResolutionState::Idle);
        Resolver {
            discovery,
            exchanger,
            store,
            timing,
            in_flight: Mutex::new(None),
            state,
        }
    }

    /// Wire a resolver from configuration, detecting the platform from the
    /// host's user agent.
    pub fn from_config(
        config: &ClientConfig,
        host: Arc<dyn HostEnvironment>,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let platform = host
            .user_agent()
            .map(|ua| Platform::detect(&ua))
            .unwrap_or(Platform::Desktop);
        let timing = config.timing_for(platform);
        log::debug!("platform {}: {:?}", platform, timing);

        let discovery = Discovery::new(host, store.clone(), config.discovery.clone());
        let exchanger = TokenExchanger::new(
            transport,
            store.clone(),
            RetryPolicy::from(&config.exchange),
        );
        Resolver::new(discovery, exchanger, store, timing)
    }

    pub fn with_timing(mut self, timing: TimingProfile) -> Self {
        self.timing = timing;
        self
    }

    pub fn timing(&self) -> &TimingProfile {
        &self.timing
    }

    pub fn subscribe(&self) -> watch::Receiver<ResolutionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ResolutionState {
        *self.state.borrow()
    }

    /// Resolve a session token, joining a run already in flight.
    pub async fn resolve(&self, cancel: &CancellationToken) -> ResolveReport {
        let mut guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("resolution already in flight; waiting for it");
                let guard = tokio::select! {
                    guard = self.in_flight.lock() => guard,
                    _ = cancel.cancelled() => {
                        return ResolveReport { resolution: Resolution::Cancelled, led: false };
                    }
                };
                match (*guard).clone() {
                    Some(Resolution::Cancelled) | None => guard,
                    Some(outcome) => {
                        return ResolveReport {
                            resolution: outcome,
                            led: false,
                        };
                    }
                }
            }
        };

        // An abandoned run must not leave the previous outcome behind
        *guard = None;
        let resolution = self.run(cancel).await;
        *guard = Some(resolution.clone());
        ResolveReport {
            resolution,
            led: true,
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> Resolution {
        self.enter(ResolutionState::Idle);
        if let Some(token) = self.stored_token() {
            log::debug!("token already stored ({})", token.preview());
            self.enter(ResolutionState::Authenticated);
            return Resolution::Authenticated(token);
        }

        if sleep_or_cancel(self.timing.initial_delay, cancel).await.is_err() {
            return self.cancelled();
        }

        let attempts = self.timing.outer_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            log::debug!("resolution attempt {}/{}", attempt, attempts);

            self.enter(ResolutionState::Discovering);
            let found = match self.discovery.find() {
                Some(found) => found,
                None => {
                    self.enter(ResolutionState::Waiting);
                    match self.wait(attempt, cancel).await {
                        Ok(found) => found,
                        Err(WaitError::Cancelled) => return self.cancelled(),
                        Err(WaitError::TimedOut { attempts: checks }) => {
                            match self.dev_override() {
                                Some(found) => found,
                                None => {
                                    log::warn!("no launch data after {} checks", checks);
                                    return self.exhausted(ExhaustReason::NoLaunchData);
                                }
                            }
                        }
                    }
                }
            };
            self.cache(&found).await;

            self.enter(ResolutionState::Exchanging);
            match self.exchanger.exchange(&found.credential, cancel).await {
                Ok(token) => {
                    self.enter(ResolutionState::Authenticated);
                    return Resolution::Authenticated(token);
                }
                Err(ExchangeError::Cancelled) => return self.cancelled(),
                Err(e) => {
                    if e.is_rejection() {
                        self.forget_rejected(&found.credential).await;
                    }
                    log::warn!(
                        "exchange with launch data from {} failed: {}",
                        found.source,
                        e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < attempts
                && sleep_or_cancel(self.timing.retry_delay, cancel).await.is_err()
            {
                return self.cancelled();
            }
        }

        self.exhausted(ExhaustReason::ExchangeFailed {
            attempts,
            last_error,
        })
    }

    async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> Result<Discovered, WaitError> {
        let window = if attempt == 1 {
            self.timing.first_wait
        } else {
            self.timing.retry_wait
        };
        let policy = PollPolicy {
            attempts: self.timing.checks_in(window),
            interval: self.timing.poll_interval,
        };
        wait_for(|| self.discovery.find(), policy, cancel).await
    }

    /// Cache a live hit. The file write runs off the async thread.
    async fn cache(&self, found: &Discovered) {
        if found.source == CredentialSource::Cached {
            return;
        }
        let discovery = self.discovery.clone();
        let credential = found.credential.clone();
        if let Err(e) = offload(move || discovery.remember(&credential)).await {
            log::warn!("could not cache launch data: {}", e);
        }
    }

    async fn forget_rejected(&self, credential: &LaunchCredential) {
        let discovery = self.discovery.clone();
        let credential = credential.clone();
        if let Err(e) = offload(move || discovery.forget_rejected(&credential)).await {
            log::warn!("could not clear rejected launch data: {}", e);
        }
    }

    fn dev_override(&self) -> Option<Discovered> {
        let user_id = match self.store.get(DEV_USER_KEY) {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("could not read developer override: {}", e);
                return None;
            }
        };
        let credential = LaunchCredential::dev_user(&user_id)?;
        log::info!("using developer override identity {}", user_id.trim());
        Some(Discovered {
            credential,
            source: CredentialSource::DevOverride,
        })
    }

    fn stored_token(&self) -> Option<SessionToken> {
        match self.store.get(TOKEN_KEY) {
            Ok(value) => value.and_then(SessionToken::new),
            Err(e) => {
                log::warn!("could not read stored token: {}", e);
                None
            }
        }
    }

    fn enter(&self, next: ResolutionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("resolver: {} -> {}", previous, next);
        }
    }

    fn exhausted(&self, reason: ExhaustReason) -> Resolution {
        self.enter(ResolutionState::Exhausted);
        Resolution::Exhausted(reason)
    }

    fn cancelled(&self) -> Resolution {
        log::debug!("resolution cancelled in state {}", self.state());
        self.enter(ResolutionState::Idle);
        Resolution::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::{ApiRequest, ApiResponse, TransportError};
    use crate::auth::exchange::{ME_PATH, WEBAPP_INIT_PATH};
    use crate::host::page::{LivePage, PageContext};
    use crate::io::store::MemoryStore;
    use crate::model::config::DiscoveryConfig;
    use crate::model::session::{CACHED_CREDENTIAL_KEY, RELAY_KEY};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Backend answering webapp-init from a queue (then a default) after
    /// an optional delay.
    struct Backend {
        replies: std::sync::Mutex<VecDeque<ApiResponse>>,
        fallback: ApiResponse,
        delay: Duration,
        init_bodies: std::sync::Mutex<Vec<Value>>,
    }

    impl Backend {
        fn new(replies: Vec<ApiResponse>, fallback: ApiResponse) -> Arc<Self> {
            Arc::new(Backend {
                replies: std::sync::Mutex::new(replies.into()),
                fallback,
                delay: Duration::ZERO,
                init_bodies: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn issuing(token: &str) -> Arc<Self> {
            Backend::new(vec![], token_reply(token))
        }

        fn init_credentials(&self) -> Vec<String> {
            self.init_bodies
                .lock()
                .unwrap()
                .iter()
                .map(|b| b["initData"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for Backend {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            if request.path == ME_PATH {
                return Ok(ApiResponse::new(200, r#"{"id":1,"username":"Ann"}"#));
            }
            assert_eq!(request.path, WEBAPP_INIT_PATH);
            self.init_bodies
                .lock()
                .unwrap()
                .push(request.body.unwrap_or_default());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    fn token_reply(token: &str) -> ApiResponse {
        ApiResponse::new(200, format!(r#"{{"access_token":"{}"}}"#, token))
    }

    fn resolver(
        host: Arc<dyn HostEnvironment>,
        backend: Arc<Backend>,
    ) -> (Resolver, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let discovery = Discovery::new(host, store.clone(), DiscoveryConfig::default());
        let exchanger = TokenExchanger::new(backend, store.clone(), RetryPolicy::default());
        let resolver = Resolver::new(discovery, exchanger, store.clone(), TimingProfile::default());
        (resolver, store)
    }

    fn page(url: &str) -> Arc<PageContext> {
        Arc::new(PageContext::new().with_url(url).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn url_credential_to_stored_token() {
        let backend = Backend::issuing("tok123");
        let (resolver, store) = resolver(
            page("https://app.example/?user_id=42&first_name=Ann"),
            backend.clone(),
        );

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(report.token().map(|t| t.as_str()), Some("tok123"));
        assert!(report.led);
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("tok123"));
        assert_eq!(backend.init_credentials(), vec!["user_id=42&first_name=Ann"]);
        assert_eq!(resolver.state(), ResolutionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn stored_token_short_circuits() {
        let backend = Backend::issuing("new");
        let (resolver, store) = resolver(page("https://app.example/?user_id=1"), backend.clone());
        store.set(TOKEN_KEY, "existing").unwrap();

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(report.token().map(|t| t.as_str()), Some("existing"));
        assert!(backend.init_credentials().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sdk_arriving_late_is_picked_up_while_waiting() {
        let host = Arc::new(LivePage::new(PageContext::new()));
        let backend = Backend::issuing("late");
        let (resolver, _) = resolver(host.clone(), backend.clone());

        let updater = host.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            updater.update(|ctx| ctx.with_sdk("MaxWebApp", "user_id=77"));
        });

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(report.token().map(|t| t.as_str()), Some("late"));
        assert_eq!(backend.init_credentials(), vec!["user_id=77"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dev_override_used_after_timeout() {
        let backend = Backend::issuing("dev-token");
        let (resolver, store) = resolver(page("https://app.example/notes"), backend.clone());
        store.set(DEV_USER_KEY, "99").unwrap();

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(report.token().map(|t| t.as_str()), Some("dev-token"));
        assert_eq!(
            backend.init_credentials(),
            vec!["user_id=99&first_name=Dev&last_name=User"]
        );
        assert_eq!(
            store.get(CACHED_CREDENTIAL_KEY).unwrap().as_deref(),
            Some("user_id=99&first_name=Dev&last_name=User")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_data_and_no_override_is_exhausted() {
        let backend = Backend::issuing("unused");
        let (resolver, _) = resolver(page("https://app.example/notes"), backend.clone());

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(
            report.resolution,
            Resolution::Exhausted(ExhaustReason::NoLaunchData)
        );
        assert!(report.should_surface_failure());
        assert_eq!(resolver.state(), ResolutionState::Exhausted);
        assert!(backend.init_credentials().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_surface_exhaustion_once() {
        let backend = Backend::issuing("unused");
        let (resolver, _) = resolver(page("https://app.example/notes"), backend);
        let resolver = Arc::new(resolver);
        let cancel = CancellationToken::new();

        let (a, b, c) = tokio::join!(
            resolver.resolve(&cancel),
            resolver.resolve(&cancel),
            resolver.resolve(&cancel)
        );
        let reports = [a, b, c];
        for report in &reports {
            assert_eq!(
                report.resolution,
                Resolution::Exhausted(ExhaustReason::NoLaunchData)
            );
        }
        assert_eq!(
            reports.iter().filter(|r| r.should_surface_failure()).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_exchange() {
        let backend = Arc::new(Backend {
            replies: std::sync::Mutex::new(VecDeque::new()),
            fallback: token_reply("shared"),
            delay: Duration::from_millis(300),
            init_bodies: std::sync::Mutex::new(Vec::new()),
        });
        let (resolver, _) = resolver(page("https://app.example/?initData=abc"), backend.clone());

        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(resolver.resolve(&cancel), resolver.resolve(&cancel));
        assert_eq!(a.token(), b.token());
        assert_eq!(a.token().map(|t| t.as_str()), Some("shared"));
        assert_ne!(a.led, b.led);
        assert_eq!(backend.init_credentials().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_evicts_cached_credential() {
        let backend = Backend::new(
            vec![ApiResponse::new(401, r#"{"detail":"Invalid initData"}"#)],
            token_reply("fresh"),
        );
        let (resolver, store) = resolver(page("https://app.example/?user_id=5"), backend.clone());
        store.set(CACHED_CREDENTIAL_KEY, "user_id=stale").unwrap();

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(report.token().map(|t| t.as_str()), Some("fresh"));
        assert_eq!(
            backend.init_credentials(),
            vec!["user_id=stale", "user_id=5"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_relay_data_is_not_resent() {
        let backend = Backend::new(
            vec![ApiResponse::new(403, r#"{"detail":"Invalid initData"}"#)],
            token_reply("fresh"),
        );
        let (resolver, store) = resolver(page("https://app.example/?user_id=5"), backend.clone());
        store.set(RELAY_KEY, "user_id=bad").unwrap();

        let report = resolver.resolve(&CancellationToken::new()).await;
        assert_eq!(report.token().map(|t| t.as_str()), Some("fresh"));
        assert_eq!(backend.init_credentials(), vec!["user_id=bad", "user_id=5"]);
        assert_eq!(store.get(RELAY_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_run_does_not_replay_an_older_outcome() {
        let host = Arc::new(LivePage::new(
            PageContext::new()
                .with_url("https://app.example/?user_id=1")
                .unwrap(),
        ));
        let (resolver, store) = resolver(host.clone(), Backend::issuing("t1"));
        let cancel = CancellationToken::new();
        let first = resolver.resolve(&cancel).await;
        assert_eq!(first.token().map(|t| t.as_str()), Some("t1"));

        // Session ends and the page no longer carries launch data
        store.remove(TOKEN_KEY).unwrap();
        store.remove(CACHED_CREDENTIAL_KEY).unwrap();
        host.update(|_| PageContext::new());

        let (abandoned, joined) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(100), resolver.resolve(&cancel)),
            resolver.resolve(&cancel),
        );
        assert!(abandoned.is_err());
        assert!(matches!(
            joined.resolution,
            Resolution::Exhausted(ExhaustReason::NoLaunchData)
        ));
        assert!(joined.led);
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn outer_budget_is_bounded() {
        let backend = Backend::new(vec![], ApiResponse::new(503, ""));
        let (resolver, _) = resolver(page("https://app.example/?initData=abc"), backend.clone());

        let report = resolver.resolve(&CancellationToken::new()).await;
        match report.resolution {
            Resolution::Exhausted(ExhaustReason::ExchangeFailed { attempts, .. }) => {
                assert_eq!(attempts, 5)
            }
            other => panic!("unexpected {:?}", other),
        }
        // 5 outer attempts x 3 exchange attempts
        assert_eq!(backend.init_credentials().len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_promptly() {
        let backend = Backend::issuing("unused");
        let (resolver, _) = resolver(page("https://app.example/notes"), backend);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = resolver.resolve(&cancel).await;
        assert_eq!(report.resolution, Resolution::Cancelled);
        assert!(!report.should_surface_failure());
        assert_eq!(resolver.state(), ResolutionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_published() {
        let backend = Backend::issuing("tok");
        let (resolver, _) = resolver(page("https://app.example/?initData=abc"), backend);
        let mut rx = resolver.subscribe();
        assert_eq!(*rx.borrow_and_update(), ResolutionState::Idle);

        resolver.resolve(&CancellationToken::new()).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ResolutionState::Authenticated);
    }

    #[test]
    fn from_config_picks_ios_timing() {
        let host = Arc::new(
            PageContext::new().with_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"),
        );
        let resolver = Resolver::from_config(
            &ClientConfig::default(),
            host,
            Arc::new(MemoryStore::new()),
            Backend::issuing("x"),
        );
        assert_eq!(resolver.timing().outer_attempts, 8);
        assert_eq!(resolver.timing().first_wait, Duration::from_secs(10));
    }
}
