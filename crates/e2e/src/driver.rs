//! Browser driver abstraction
//!
//! The harness only ever talks to a page through this trait. Every call is
//! an awaited suspension point and every wait carries its own timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::HarnessResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// Condition on the page URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UrlPredicate {
    Contains(String),
    Excludes(String),
}

impl UrlPredicate {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPredicate::Contains(s) => url.contains(s.as_str()),
            UrlPredicate::Excludes(s) => !url.contains(s.as_str()),
        }
    }
}

impl std::fmt::Display for UrlPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlPredicate::Contains(s) => write!(f, "url containing '{s}'"),
            UrlPredicate::Excludes(s) => write!(f, "url not containing '{s}'"),
        }
    }
}

/// Which network exchange to capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMatcher {
    /// HTTP method, upper case; `None` matches any
    pub method: Option<String>,
    /// The URL must contain at least one of these
    pub url_contains_any: Vec<String>,
}

impl ResponseMatcher {
    pub fn new(method: &str, fragments: &[&str]) -> Self {
        Self {
            method: Some(method.to_ascii_uppercase()),
            url_contains_any: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn matches(&self, method: &str, url: &str) -> bool {
        let method_ok = self
            .method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(method))
            .unwrap_or(true);
        let url_ok = self.url_contains_any.is_empty()
            || self.url_contains_any.iter().any(|f| url.contains(f.as_str()));
        method_ok && url_ok
    }
}

impl std::fmt::Display for ResponseMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}]",
            self.method.as_deref().unwrap_or("*"),
            self.url_contains_any.join(" | ")
        )
    }
}

/// One request/response pair observed on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub request_url: String,
    pub request_method: String,
    #[serde(default)]
    pub request_body: Option<serde_json::Value>,
    pub response_status: u16,
    #[serde(default)]
    pub response_body: serde_json::Value,
}

impl CapturedExchange {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response_status)
    }

    /// Path portion of the request URL, without scheme, host or query
    pub fn request_path(&self) -> &str {
        let without_scheme = self
            .request_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.request_url);
        let path = without_scheme
            .find('/')
            .map(|i| &without_scheme[i..])
            .unwrap_or("/");
        path.split(['?', '#']).next().unwrap_or(path)
    }
}

/// A request the page issued, whether or not anything listened for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub status: Option<u16>,
}

/// Handle to an armed response listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> HarnessResult<()>;

    async fn reload(&self, timeout: Duration) -> HarnessResult<()>;

    /// Wait for network idle
    async fn wait_for_load(&self, timeout: Duration) -> HarnessResult<()>;

    async fn wait_for_url(&self, predicate: &UrlPredicate, timeout: Duration) -> HarnessResult<()>;

    async fn current_url(&self) -> HarnessResult<String>;

    async fn title(&self) -> HarnessResult<String>;

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> HarnessResult<()>;

    async fn click(&self, selector: &str, timeout: Duration) -> HarnessResult<()>;

    async fn count(&self, selector: &str) -> HarnessResult<usize>;

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool>;

    async fn is_enabled(&self, selector: &str) -> HarnessResult<bool>;

    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>>;

    async fn input_value(&self, selector: &str, timeout: Duration) -> HarnessResult<String>;

    async fn get_attribute(&self, selector: &str, name: &str) -> HarnessResult<Option<String>>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> HarnessResult<()>;

    /// Start listening for a response before the action that triggers it
    async fn arm_response(&self, matcher: &ResponseMatcher) -> HarnessResult<ListenerId>;

    /// Resolve an armed listener
    async fn await_response(
        &self,
        listener: ListenerId,
        timeout: Duration,
    ) -> HarnessResult<CapturedExchange>;

    /// Drop an armed listener that will never be awaited
    async fn disarm(&self, listener: ListenerId) -> HarnessResult<()>;

    /// Requests issued since the last navigation
    async fn observed_requests(&self) -> HarnessResult<Vec<ObservedRequest>>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> HarnessResult<()>;

    async fn clear_cookies(&self) -> HarnessResult<()>;

    async fn clear_storage(&self) -> HarnessResult<()>;

    /// Release the browser context
    async fn close(&self) -> HarnessResult<()> {
        Ok(())
    }
}

/// Creates one isolated browser context per test
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self) -> HarnessResult<Box<dyn BrowserDriver>>;
}
