use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

static IOS_UA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"iPad|iPhone|iPod").expect("static regex"));
static ANDROID_UA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)android").expect("static regex"));
static MOBILE_UA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Mobile|Android|iP(hone|od|ad)").expect("static regex"));

/// Device family the host platform runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Mobile,
    Desktop,
}

impl Platform {
    /// Classify a user agent string.
    pub fn detect(user_agent: &str) -> Platform {
        if IOS_UA.is_match(user_agent) {
            Platform::Ios
        } else if ANDROID_UA.is_match(user_agent) {
            Platform::Android
        } else if MOBILE_UA.is_match(user_agent) {
            Platform::Mobile
        } else {
            Platform::Desktop
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "iOS"),
            Platform::Android => write!(f, "Android"),
            Platform::Mobile => write!(f, "mobile"),
            Platform::Desktop => write!(f, "desktop"),
        }
    }
}

/// Timing knobs for one resolution run.
///
/// The host SDK initializes asynchronously and there is no ready event, so
/// resolution polls. iOS webviews load the SDK noticeably later, hence the
/// longer budgets there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingProfile {
    /// Pause before the first discovery pass.
    pub initial_delay: Duration,
    /// Gap between discovery checks while waiting.
    pub poll_interval: Duration,
    /// Waiting window on the first outer attempt.
    pub first_wait: Duration,
    /// Waiting window on later outer attempts.
    pub retry_wait: Duration,
    /// Outer attempts (discover + exchange) before giving up.
    pub outer_attempts: u32,
    /// Pause between outer attempts.
    pub retry_delay: Duration,
}

impl TimingProfile {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Ios => TimingProfile {
                initial_delay: Duration::from_millis(1000),
                poll_interval: Duration::from_millis(200),
                first_wait: Duration::from_secs(10),
                retry_wait: Duration::from_secs(5),
                outer_attempts: 8,
                retry_delay: Duration::from_millis(2000),
            },
            _ => TimingProfile {
                initial_delay: Duration::from_millis(500),
                poll_interval: Duration::from_millis(200),
                first_wait: Duration::from_secs(5),
                retry_wait: Duration::from_secs(2),
                outer_attempts: 5,
                retry_delay: Duration::from_millis(2000),
            },
        }
    }

    /// Same profile with no initial delay and a single discovery check per
    /// attempt. Used where nothing can change while we wait (cached-only runs).
    pub fn without_waiting(mut self) -> Self {
        self.initial_delay = Duration::ZERO;
        self.first_wait = Duration::ZERO;
        self.retry_wait = Duration::ZERO;
        self
    }

    /// Number of discovery checks that fit in `window`, at least one.
    pub fn checks_in(&self, window: Duration) -> u32 {
        if self.poll_interval.is_zero() {
            return 1;
        }
        let checks = window.as_millis() / self.poll_interval.as_millis();
        u32::try_from(checks).unwrap_or(u32::MAX).max(1)
    }
}

impl Default for TimingProfile {
    fn default() -> Self {
        TimingProfile::for_platform(Platform::Desktop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";
    const PIXEL: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 Mobile Safari/537.36";
    const DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36";

    #[test]
    fn detects_platforms() {
        assert_eq!(Platform::detect(IPHONE), Platform::Ios);
        assert_eq!(Platform::detect(PIXEL), Platform::Android);
        assert_eq!(Platform::detect(DESKTOP), Platform::Desktop);
        assert_eq!(Platform::detect("SomeBrowser Mobile"), Platform::Mobile);
        assert_eq!(Platform::detect(""), Platform::Desktop);
    }

    #[test]
    fn ios_gets_longer_budgets() {
        let ios = TimingProfile::for_platform(Platform::Ios);
        let other = TimingProfile::for_platform(Platform::Android);
        assert!(ios.first_wait > other.first_wait);
        assert!(ios.outer_attempts > other.outer_attempts);
        assert_eq!(other.outer_attempts, 5);
    }

    #[test]
    fn checks_fit_window() {
        let profile = TimingProfile::default();
        assert_eq!(profile.checks_in(Duration::from_secs(5)), 25);
        assert_eq!(profile.checks_in(Duration::ZERO), 1);
        assert_eq!(profile.checks_in(Duration::from_millis(150)), 1);
    }

    #[test]
    fn without_waiting_keeps_attempt_budget() {
        let profile = TimingProfile::default().without_waiting();
        assert_eq!(profile.initial_delay, Duration::ZERO);
        assert_eq!(profile.checks_in(profile.first_wait), 1);
        assert_eq!(profile.outer_attempts, 5);
    }
}
