use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::platform::{Platform, TimingProfile};

/// Configuration from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub timing: TimingOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Treat any query parameter whose name looks launch-related
    /// (`init`, `data`, `webapp`, `web_app`, `start`) as launch data.
    #[serde(default = "default_true")]
    pub heuristic_scan: bool,
    /// Dotted paths of host SDK objects whose `initData` field is checked, in order.
    #[serde(default = "default_sdk_namespaces")]
    pub sdk_namespaces: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            heuristic_scan: true,
            sdk_namespaces: default_sdk_namespaces(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Total requests to the auth endpoint, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Per-field overrides applied on top of the detected platform's profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outer_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
}

impl ClientConfig {
    /// Timing for a platform with any configured overrides applied.
    pub fn timing_for(&self, platform: Platform) -> TimingProfile {
        let mut profile = TimingProfile::for_platform(platform);
        let t = &self.timing;
        let ms = Duration::from_millis;
        if let Some(v) = t.initial_delay_ms {
            profile.initial_delay = ms(v);
        }
        if let Some(v) = t.poll_interval_ms {
            profile.poll_interval = ms(v);
        }
        if let Some(v) = t.first_wait_ms {
            profile.first_wait = ms(v);
        }
        if let Some(v) = t.retry_wait_ms {
            profile.retry_wait = ms(v);
        }
        if let Some(v) = t.outer_attempts {
            profile.outer_attempts = v.max(1);
        }
        if let Some(v) = t.retry_delay_ms {
            profile.retry_delay = ms(v);
        }
        profile
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_sdk_namespaces() -> Vec<String> {
    ["MaxWebApp", "Telegram.WebApp", "Max.WebApp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}
