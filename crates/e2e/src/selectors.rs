//! Prioritised selector chains
//!
//! Several controls in the application under test lack stable `data-testid`
//! attributes, so each control is addressed by an ordered list of
//! strategies. The first strategy with a visible match wins and is logged.
//! All chains live in [`catalog`] so no test file carries its own fallbacks.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::driver::BrowserDriver;
use crate::error::{HarnessError, HarnessResult};
use crate::wait::{wait_until, ABSOLUTE_MAX};

/// One way of addressing an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Strategy {
    TestId(String),
    Css(String),
    Text { element: String, text: String },
    Role { role: String, name: String },
}

impl Strategy {
    pub fn test_id(id: &str) -> Self {
        Strategy::TestId(id.to_string())
    }

    pub fn css(css: &str) -> Self {
        Strategy::Css(css.to_string())
    }

    pub fn text(element: &str, text: &str) -> Self {
        Strategy::Text {
            element: element.to_string(),
            text: text.to_string(),
        }
    }

    pub fn role(role: &str, name: &str) -> Self {
        Strategy::Role {
            role: role.to_string(),
            name: name.to_string(),
        }
    }

    /// Playwright selector syntax
    pub fn to_selector(&self) -> String {
        match self {
            Strategy::TestId(id) => format!("[data-testid=\"{id}\"]"),
            Strategy::Css(css) => css.clone(),
            Strategy::Text { element, text } => format!("{element}:has-text(\"{text}\")"),
            Strategy::Role { role, name } => format!("role={role}[name=\"{name}\"]"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::TestId(_) => "test-id",
            Strategy::Css(_) => "css",
            Strategy::Text { .. } => "text",
            Strategy::Role { .. } => "role",
        }
    }
}

/// Named, ordered list of strategies for one control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorChain {
    pub name: String,
    pub strategies: Vec<Strategy>,
}

/// The strategy that matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub selector: String,
    pub strategy_index: usize,
}

impl SelectorChain {
    pub fn new(name: &str, strategies: Vec<Strategy>) -> Self {
        Self {
            name: name.to_string(),
            strategies,
        }
    }

    /// The preferred selector, used when presence does not matter
    pub fn primary(&self) -> String {
        self.strategies
            .first()
            .map(Strategy::to_selector)
            .unwrap_or_default()
    }

    pub fn selectors(&self) -> Vec<String> {
        self.strategies.iter().map(Strategy::to_selector).collect()
    }

    /// First strategy currently visible, without waiting
    pub async fn find_visible(&self, driver: &dyn BrowserDriver) -> HarnessResult<Option<Resolved>> {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let selector = strategy.to_selector();
            if driver.is_visible(&selector).await? {
                return Ok(Some(Resolved {
                    selector,
                    strategy_index: index,
                }));
            }
        }
        Ok(None)
    }

    /// Is any strategy visible right now
    pub async fn any_visible(&self, driver: &dyn BrowserDriver) -> HarnessResult<bool> {
        Ok(self.find_visible(driver).await?.is_some())
    }

    /// Wait up to `timeout` for any strategy to become visible
    pub async fn resolve(
        &self,
        driver: &dyn BrowserDriver,
        timeout: Duration,
        poll: Duration,
    ) -> HarnessResult<Resolved> {
        let start = Instant::now();
        loop {
            if let Some(resolved) = self.find_visible(driver).await? {
                let strategy = &self.strategies[resolved.strategy_index];
                debug!(
                    "{} resolved via {} strategy #{} ({})",
                    self.name,
                    strategy.kind(),
                    resolved.strategy_index + 1,
                    resolved.selector
                );
                return Ok(resolved);
            }
            if start.elapsed() >= timeout.min(ABSOLUTE_MAX) {
                return Err(HarnessError::SelectorNotFound {
                    chain: self.name.clone(),
                    tried: self.selectors().join(", "),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Wait until no strategy is visible
    pub async fn wait_gone(
        &self,
        driver: &dyn BrowserDriver,
        timeout: Duration,
        poll: Duration,
    ) -> HarnessResult<()> {
        wait_until(&format!("{} to disappear", self.name), timeout, poll, || async move {
            Ok(!self.any_visible(driver).await?)
        })
        .await
    }
}

/// Every selector chain the harness uses
pub mod catalog {
    use super::{SelectorChain, Strategy};
    use persistcheck_common::EventKind;

    pub fn login_email() -> SelectorChain {
        SelectorChain::new(
            "login email input",
            vec![
                Strategy::test_id("email-input"),
                Strategy::css("input[name=\"email\"]"),
                Strategy::css("input[type=\"email\"]"),
            ],
        )
    }

    pub fn login_password() -> SelectorChain {
        SelectorChain::new(
            "login password input",
            vec![
                Strategy::test_id("password-input"),
                Strategy::css("input[name=\"password\"]"),
                Strategy::css("input[type=\"password\"]"),
            ],
        )
    }

    pub fn login_button() -> SelectorChain {
        SelectorChain::new(
            "login button",
            vec![
                Strategy::test_id("login-button"),
                Strategy::css("button[type=\"submit\"]"),
                Strategy::text("button", "Sign In"),
            ],
        )
    }

    pub fn login_error() -> SelectorChain {
        SelectorChain::new(
            "login error",
            vec![
                Strategy::test_id("login-error"),
                Strategy::css("[role=\"alert\"]"),
            ],
        )
    }

    pub fn logout_button() -> SelectorChain {
        SelectorChain::new(
            "logout button",
            vec![
                Strategy::test_id("logout-button"),
                Strategy::text("button", "Logout"),
                Strategy::text("button", "Sign Out"),
            ],
        )
    }

    /// Link inside the first listed event card of `kind`
    pub fn event_card_link(kind: EventKind) -> SelectorChain {
        SelectorChain::new(
            &format!("{} event card link", kind.as_str()),
            vec![
                Strategy::Css(format!(
                    "[data-testid=\"event-card\"][data-event-kind=\"{}\"] a[href*=\"/events/\"]",
                    kind.as_str()
                )),
                Strategy::css("[data-testid=\"event-card\"] a[href*=\"/events/\"]"),
                Strategy::css(".event-card a[href*=\"/events/\"]"),
                Strategy::css("a[href^=\"/events/\"]"),
            ],
        )
    }

    pub fn empty_state() -> SelectorChain {
        SelectorChain::new(
            "empty state",
            vec![
                Strategy::test_id("events-empty-state"),
                Strategy::text("p", "No events"),
            ],
        )
    }

    pub fn error_banner() -> SelectorChain {
        SelectorChain::new(
            "error banner",
            vec![
                Strategy::test_id("error-banner"),
                Strategy::css("[role=\"alert\"].error"),
            ],
        )
    }

    pub fn purchase_ticket() -> SelectorChain {
        SelectorChain::new(
            "purchase ticket button",
            vec![
                Strategy::test_id("button-purchase-ticket"),
                Strategy::text("button", "Purchase Ticket"),
                Strategy::text("button", "Register"),
            ],
        )
    }

    pub fn cancel_ticket() -> SelectorChain {
        SelectorChain::new(
            "cancel ticket button",
            vec![
                Strategy::test_id("cancel-ticket-button"),
                Strategy::text("button", "Cancel Ticket"),
                Strategy::text("button", "Cancel Registration"),
            ],
        )
    }

    pub fn rsvp() -> SelectorChain {
        SelectorChain::new(
            "rsvp button",
            vec![
                Strategy::test_id("button-rsvp"),
                Strategy::text("button", "RSVP Now"),
            ],
        )
    }

    pub fn cancel_rsvp() -> SelectorChain {
        SelectorChain::new(
            "cancel rsvp button",
            vec![
                Strategy::test_id("button-cancel-rsvp"),
                Strategy::text("button", "Cancel RSVP"),
                Strategy::text("button", "Withdraw"),
            ],
        )
    }

    pub fn confirm_dialog() -> SelectorChain {
        SelectorChain::new(
            "confirmation dialog",
            vec![
                Strategy::css("[role=\"dialog\"]"),
                Strategy::css(".modal"),
            ],
        )
    }

    pub fn confirm_button() -> SelectorChain {
        SelectorChain::new(
            "confirm button",
            vec![
                Strategy::test_id("confirm-cancel-button"),
                Strategy::css("[role=\"dialog\"] button:has-text(\"Confirm\")"),
                Strategy::css("[role=\"dialog\"] button:has-text(\"Yes\")"),
            ],
        )
    }

    pub fn cancellation_reason() -> SelectorChain {
        SelectorChain::new(
            "cancellation reason",
            vec![
                Strategy::test_id("cancellation-reason"),
                Strategy::css("textarea[name=\"reason\"]"),
            ],
        )
    }

    pub fn success_notice() -> SelectorChain {
        SelectorChain::new(
            "success notification",
            vec![
                Strategy::test_id("success-notification"),
                Strategy::css(".mantine-Notification-root[data-color=\"green\"]"),
            ],
        )
    }

    pub fn error_notice() -> SelectorChain {
        SelectorChain::new(
            "error notification",
            vec![
                Strategy::test_id("error-notification"),
                Strategy::css(".mantine-Notification-root[data-color=\"red\"]"),
            ],
        )
    }

    pub fn profile_save() -> SelectorChain {
        SelectorChain::new(
            "profile save button",
            vec![
                Strategy::test_id("profile-save-button"),
                Strategy::text("button", "Save Changes"),
            ],
        )
    }

    /// Profile input for one field, e.g. `firstName` -> `first-name-input`
    pub fn profile_field(field: &str) -> SelectorChain {
        SelectorChain::new(
            &format!("profile {field} input"),
            vec![
                Strategy::TestId(format!("{}-input", kebab(field))),
                Strategy::Css(format!("input[name=\"{field}\"]")),
                Strategy::Css(format!("textarea[name=\"{field}\"]")),
            ],
        )
    }

    /// Admin event form input, e.g. `title` -> `title-input`
    pub fn event_field(field: &str) -> SelectorChain {
        SelectorChain::new(
            &format!("event {field} input"),
            vec![
                Strategy::TestId(format!("{}-input", kebab(field))),
                Strategy::Css(format!("input[name=\"{field}\"]")),
            ],
        )
    }

    pub fn event_save() -> SelectorChain {
        SelectorChain::new(
            "event save button",
            vec![
                Strategy::test_id("save-event-button"),
                Strategy::css("form button[type=\"submit\"]"),
                Strategy::text("button", "Save"),
            ],
        )
    }

    fn kebab(camel: &str) -> String {
        let mut out = String::with_capacity(camel.len() + 4);
        for c in camel.chars() {
            if c.is_ascii_uppercase() {
                out.push('-');
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}
