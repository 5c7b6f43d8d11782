//! Launch credential discovery.
//!
//! One pass over every place the host platform might have put `initData`,
//! first match wins:
//!
//! 1. the credential cached by an earlier run
//! 2. host SDK objects (`MaxWebApp`, `Telegram.WebApp`, … per config)
//! 3. data stashed by the cross-window relay
//! 4. the page URL: known query aliases, a heuristic scan of all query
//!    parameters, the hash fragment, then a raw regex scan
//! 5. discrete `user_id` / `first_name` / … query parameters
//!
//! Any hit outside the cache is written back to the cache so the next run
//! short-circuits at step 1. Finding nothing is a normal outcome (the page
//! was opened outside the host platform).

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::Url;
use serde_json::Value;

use crate::host::page::HostEnvironment;
use crate::io::store::KeyValueStore;
use crate::model::config::DiscoveryConfig;
use crate::model::credential::{LaunchCredential, UserIdentity};
use crate::model::session::{CACHED_CREDENTIAL_KEY, RELAY_KEY};
use crate::util::query::{decode_component, first_value, parse_query};

/// Query / hash parameter names hosts are known to use for launch data.
pub const QUERY_ALIASES: &[&str] = &[
    "initData",
    "init_data",
    "data",
    "tgWebAppData",
    "webAppData",
    "initdata",
    "initDataRaw",
    "webapp_data",
    "webappdata",
    "tg_web_app_data",
    "tgWebAppDataRaw",
    "start_param",
];

/// Substrings that make an unknown query parameter look launch-related.
const HEURISTIC_MARKERS: &[&str] = &["init", "data", "webapp", "web_app", "start"];

const USER_ID_KEYS: &[&str] = &["user_id", "userId", "id"];
const FIRST_NAME_KEYS: &[&str] = &["first_name", "firstName", "firstname"];
const LAST_NAME_KEYS: &[&str] = &["last_name", "lastName", "lastname"];
const USERNAME_KEYS: &[&str] = &["username", "userName", "user"];

static URL_SCAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[?&#](?:initData|init_data|data|tgWebAppData|webAppData|start_param)=([^&?#]+)")
        .expect("static regex")
});

/// Where a credential was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Cached,
    Sdk(String),
    Relay,
    Query(String),
    QueryHeuristic(String),
    Hash(String),
    UrlScan,
    UserFields,
    /// Developer override identity, used only after waiting timed out.
    DevOverride,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Cached => write!(f, "cache"),
            CredentialSource::Sdk(ns) => write!(f, "sdk:{}", ns),
            CredentialSource::Relay => write!(f, "relay"),
            CredentialSource::Query(key) => write!(f, "query:{}", key),
            CredentialSource::QueryHeuristic(key) => write!(f, "query-scan:{}", key),
            CredentialSource::Hash(key) => write!(f, "hash:{}", key),
            CredentialSource::UrlScan => write!(f, "url-scan"),
            CredentialSource::UserFields => write!(f, "user-fields"),
            CredentialSource::DevOverride => write!(f, "dev-override"),
        }
    }
}

/// A credential together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub credential: LaunchCredential,
    pub source: CredentialSource,
}

#[derive(Clone)]
pub struct Discovery {
    host: Arc<dyn HostEnvironment>,
    store: Arc<dyn KeyValueStore>,
    options: DiscoveryConfig,
}

impl Discovery {
    pub fn new(
        host: Arc<dyn HostEnvironment>,
        store: Arc<dyn KeyValueStore>,
        options: DiscoveryConfig,
    ) -> Self {
        Discovery {
            host,
            store,
            options,
        }
    }

    /// Run one discovery pass, caching a live hit.
    pub fn discover(&self) -> Option<Discovered> {
        let found = self.find()?;
        if found.source != CredentialSource::Cached {
            self.remember(&found.credential);
        }
        Some(found)
    }

    /// One discovery pass that leaves storage untouched.
    pub fn find(&self) -> Option<Discovered> {
        if let Some(credential) = self.read_key(CACHED_CREDENTIAL_KEY) {
            return Some(Discovered {
                credential,
                source: CredentialSource::Cached,
            });
        }

        let found = self
            .from_sdk()
            .or_else(|| {
                self.read_key(RELAY_KEY).map(|credential| Discovered {
                    credential,
                    source: CredentialSource::Relay,
                })
            })
            .or_else(|| {
                let url = self.host.page_url()?;
                scan_url(&url, self.options.heuristic_scan)
            })?;

        log::info!(
            "launch data found via {} (user {})",
            found.source,
            found.credential.user_id().as_deref().unwrap_or("unknown")
        );
        Some(found)
    }

    /// Drop the cached credential so the next pass re-derives it.
    pub fn forget_cached(&self) {
        if let Err(e) = self.store.remove(CACHED_CREDENTIAL_KEY) {
            log::warn!("could not clear cached launch data: {}", e);
        }
    }

    /// Forget a credential the backend rejected, wherever it is stored.
    ///
    /// The cache always goes; relayed data goes too when it is the same
    /// credential, otherwise the next pass would send it again.
    pub fn forget_rejected(&self, credential: &LaunchCredential) {
        self.forget_cached();
        if self.read_key(RELAY_KEY).as_ref() == Some(credential) {
            log::debug!("dropping rejected relayed launch data");
            if let Err(e) = self.store.remove(RELAY_KEY) {
                log::warn!("could not clear relayed launch data: {}", e);
            }
        }
    }

    /// Write a credential to the cache. Failures are logged, not fatal.
    pub fn remember(&self, credential: &LaunchCredential) {
        if let Err(e) = self.store.set(CACHED_CREDENTIAL_KEY, credential.as_str()) {
            log::warn!("could not cache launch data: {}", e);
        }
    }

    fn from_sdk(&self) -> Option<Discovered> {
        self.options.sdk_namespaces.iter().find_map(|ns| {
            let credential = LaunchCredential::new(self.host.sdk_init_data(ns)?)?;
            Some(Discovered {
                credential,
                source: CredentialSource::Sdk(ns.clone()),
            })
        })
    }

    fn read_key(&self, key: &str) -> Option<LaunchCredential> {
        match self.store.get(key) {
            Ok(value) => value.and_then(LaunchCredential::new),
            Err(e) => {
                log::warn!("could not read {} from storage: {}", key, e);
                None
            }
        }
    }
}

/// Look for launch data in a page URL (steps 4 and 5).
pub fn scan_url(url: &Url, heuristic: bool) -> Option<Discovered> {
    let query = parse_query(url.query().unwrap_or(""));
    let found = |credential, source| Some(Discovered { credential, source });

    for alias in QUERY_ALIASES {
        if let Some(credential) = first_value(&query, alias).and_then(normalize_value) {
            return found(credential, CredentialSource::Query(alias.to_string()));
        }
    }

    if heuristic {
        for (key, value) in &query {
            let lower = key.to_lowercase();
            if HEURISTIC_MARKERS.iter().any(|m| lower.contains(m))
                && let Some(credential) = normalize_value(value)
            {
                return found(credential, CredentialSource::QueryHeuristic(key.clone()));
            }
        }
    }

    if let Some(fragment) = url.fragment() {
        let hash = parse_query(fragment);
        for alias in QUERY_ALIASES {
            if let Some(credential) = first_value(&hash, alias).and_then(normalize_value) {
                return found(credential, CredentialSource::Hash(alias.to_string()));
            }
        }
    }

    if let Some(credential) = URL_SCAN
        .captures(url.as_str())
        .and_then(|caps| caps.get(1))
        .and_then(|m| normalize_value(m.as_str()))
    {
        return found(credential, CredentialSource::UrlScan);
    }

    user_fields(&query).and_then(|credential| found(credential, CredentialSource::UserFields))
}

/// Decode a URL-sourced value and normalize JSON identities.
///
/// Query parsing already decoded once; hosts that double-encode get a
/// second pass, and values that fail it are kept raw. JSON carrying a
/// user identity is rewritten into the encoded pair form, so every
/// channel yields the same credential for the same user.
fn normalize_value(raw: &str) -> Option<LaunchCredential> {
    let decoded = decode_component(raw).unwrap_or_else(|| raw.to_string());
    let trimmed = decoded.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && let Some(identity) = UserIdentity::from_json(&value)
    {
        return Some(LaunchCredential::from_identity(&identity));
    }
    LaunchCredential::new(decoded)
}

fn user_fields(query: &[(String, String)]) -> Option<LaunchCredential> {
    let pick = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| first_value(query, k).filter(|v| !v.is_empty()))
            .map(str::to_string)
    };
    let identity = UserIdentity {
        user_id: pick(USER_ID_KEYS)?,
        first_name: pick(FIRST_NAME_KEYS),
        last_name: pick(LAST_NAME_KEYS),
        username: pick(USERNAME_KEYS),
    };
    Some(LaunchCredential::from_identity(&identity))
}
