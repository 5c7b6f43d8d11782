use std::collections::HashMap;
use std::sync::RwLock;

use reqwest::Url;

/// What the client can see of the page the host platform opened.
///
/// In a browser this is `window.location`, the host SDK globals and the
/// user agent. Implementations must reflect changes over time: discovery
/// re-reads the environment on every poll because the SDK may appear late.
pub trait HostEnvironment: Send + Sync {
    /// Full URL the mini-app was launched with, if any.
    fn page_url(&self) -> Option<Url>;

    /// `initData` exposed by the host SDK object at a dotted namespace
    /// such as `Telegram.WebApp`.
    fn sdk_init_data(&self, namespace: &str) -> Option<String>;

    fn user_agent(&self) -> Option<String> {
        None
    }
}

/// Error building a page context
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("invalid page url \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid sdk value \"{0}\": expected NAMESPACE=INITDATA")]
    InvalidSdkValue(String),
}

/// A fixed snapshot of a launch page.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    url: Option<Url>,
    sdk: HashMap<String, String>,
    user_agent: Option<String>,
}

impl PageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: &str) -> Result<Self, PageError> {
        let parsed = Url::parse(url).map_err(|e| PageError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        self.url = Some(parsed);
        Ok(self)
    }

    pub fn with_sdk(mut self, namespace: &str, init_data: &str) -> Self {
        self.sdk.insert(namespace.to_string(), init_data.to_string());
        self
    }

    /// Parse a `NAMESPACE=INITDATA` pair (as given on the command line).
    pub fn with_sdk_pair(self, pair: &str) -> Result<Self, PageError> {
        match pair.split_once('=') {
            Some((namespace, init_data)) if !namespace.is_empty() => {
                Ok(self.with_sdk(namespace, init_data))
            }
            _ => Err(PageError::InvalidSdkValue(pair.to_string())),
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }
}

impl HostEnvironment for PageContext {
    fn page_url(&self) -> Option<Url> {
        self.url.clone()
    }

    fn sdk_init_data(&self, namespace: &str) -> Option<String> {
        self.sdk.get(namespace).cloned()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }
}

/// A page whose contents can change while resolution is running, e.g. an
/// SDK object that finishes loading after first paint.
#[derive(Debug, Default)]
pub struct LivePage {
    inner: RwLock<PageContext>,
}

impl LivePage {
    pub fn new(initial: PageContext) -> Self {
        LivePage {
            inner: RwLock::new(initial),
        }
    }

    /// Apply a change to the page.
    pub fn update<F>(&self, change: F)
    where
        F: FnOnce(PageContext) -> PageContext,
    {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = std::mem::take(&mut *guard);
        *guard = change(current);
    }

    fn snapshot(&self) -> PageContext {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl HostEnvironment for LivePage {
    fn page_url(&self) -> Option<Url> {
        self.snapshot().page_url()
    }

    fn sdk_init_data(&self, namespace: &str) -> Option<String> {
        self.snapshot().sdk_init_data(namespace)
    }

    fn user_agent(&self) -> Option<String> {
        self.snapshot().user_agent()
    }
}
