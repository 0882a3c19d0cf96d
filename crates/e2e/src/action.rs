//! Single state-changing UI actions
//!
//! The response listener is armed before the triggering click, so the
//! exchange is captured even when the backend answers faster than the
//! click returns. The captured request is then checked against the
//! endpoint contract before its status is looked at: a UI that calls the
//! wrong endpoint must fail as a contract violation, not as a 404.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::driver::{BrowserDriver, CapturedExchange, ResponseMatcher};
use crate::error::{HarnessError, HarnessResult};
use crate::selectors::{catalog, SelectorChain};
use crate::wait::Timeouts;

pub const DEFAULT_CANCEL_REASON: &str = "Automated persistence check";

/// Method and path shape the captured request must have
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointContract {
    pub method: String,
    /// The path must contain at least one of these segments
    pub allowed_segments: Vec<String>,
    /// The path must contain none of these segments
    pub forbidden_segments: Vec<String>,
}

impl EndpointContract {
    pub fn new(method: &str, allowed: &[&str], forbidden: &[&str]) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            allowed_segments: allowed.iter().map(|s| s.to_string()).collect(),
            forbidden_segments: forbidden.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Reason the request breaks the contract, if it does
    pub fn violation(&self, method: &str, path: &str) -> Option<String> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some(bad) = self
            .forbidden_segments
            .iter()
            .find(|f| segments.contains(&f.as_str()))
        {
            return Some(format!(
                "{method} {path} uses the '/{bad}' endpoint; expected {self}"
            ));
        }
        if !method.eq_ignore_ascii_case(&self.method) {
            return Some(format!("{method} {path} has the wrong method; expected {self}"));
        }
        let allowed = self.allowed_segments.is_empty()
            || self
                .allowed_segments
                .iter()
                .any(|a| segments.contains(&a.as_str()));
        if !allowed {
            return Some(format!("{method} {path} does not match {self}"));
        }
        None
    }
}

impl fmt::Display for EndpointContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .../{}", self.method, self.allowed_segments.join("|"))
    }
}

/// Modal shown between the trigger click and the request
#[derive(Debug, Clone)]
pub struct ConfirmStep {
    pub dialog: SelectorChain,
    /// Optional free-text field filled before confirming
    pub reason: Option<(SelectorChain, String)>,
    pub button: SelectorChain,
    /// Proceed without confirming when no dialog shows up
    pub optional: bool,
}

impl ConfirmStep {
    pub fn cancellation(reason: &str) -> Self {
        Self {
            dialog: catalog::confirm_dialog(),
            reason: Some((catalog::cancellation_reason(), reason.to_string())),
            button: catalog::confirm_button(),
            optional: false,
        }
    }
}

/// One UI action and the exchange it must produce
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: String,
    pub trigger: SelectorChain,
    pub confirm: Option<ConfirmStep>,
    pub capture: ResponseMatcher,
    pub contract: Option<EndpointContract>,
}

impl ActionSpec {
    /// Cancel Ticket: must hit `DELETE .../participation`, never `/ticket`
    pub fn cancel_ticket(reason: &str) -> Self {
        Self {
            name: "cancel ticket".to_string(),
            trigger: catalog::cancel_ticket(),
            confirm: Some(ConfirmStep::cancellation(reason)),
            capture: ResponseMatcher::new("DELETE", &["/participation", "/ticket"]),
            contract: Some(EndpointContract::new("DELETE", &["participation"], &["ticket"])),
        }
    }

    /// Cancel RSVP; the legacy `/rsvp` alias is tolerated
    pub fn cancel_rsvp(reason: &str) -> Self {
        let mut confirm = ConfirmStep::cancellation(reason);
        confirm.optional = true;
        Self {
            name: "cancel rsvp".to_string(),
            trigger: catalog::cancel_rsvp(),
            confirm: Some(confirm),
            capture: ResponseMatcher::new("DELETE", &["/participation", "/rsvp"]),
            contract: Some(EndpointContract::new(
                "DELETE",
                &["participation", "rsvp"],
                &["ticket"],
            )),
        }
    }

    pub fn rsvp() -> Self {
        Self {
            name: "rsvp".to_string(),
            trigger: catalog::rsvp(),
            confirm: None,
            capture: ResponseMatcher::new("POST", &["/rsvp", "/participation"]),
            contract: Some(EndpointContract::new("POST", &["rsvp", "participation"], &[])),
        }
    }

    pub fn purchase_ticket() -> Self {
        Self {
            name: "purchase ticket".to_string(),
            trigger: catalog::purchase_ticket(),
            confirm: None,
            capture: ResponseMatcher::new("POST", &["/tickets", "/participation"]),
            contract: Some(EndpointContract::new("POST", &["tickets", "participation"], &[])),
        }
    }

    pub fn save_profile() -> Self {
        Self {
            name: "save profile".to_string(),
            trigger: catalog::profile_save(),
            confirm: None,
            capture: ResponseMatcher::new("PUT", &["/profile"]),
            contract: Some(EndpointContract::new("PUT", &["profile"], &[])),
        }
    }

    /// Admin edit form: `PUT /api/events/{id}`
    pub fn save_event() -> Self {
        Self {
            name: "save event".to_string(),
            trigger: catalog::event_save(),
            confirm: None,
            capture: ResponseMatcher::new("PUT", &["/api/events/"]),
            contract: Some(EndpointContract::new("PUT", &["events"], &["participation"])),
        }
    }
}

pub struct ActionInvoker<'a> {
    driver: &'a dyn BrowserDriver,
    timeouts: Timeouts,
}

impl<'a> ActionInvoker<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, timeouts: Timeouts) -> Self {
        Self { driver, timeouts }
    }

    /// Click, confirm, capture, check contract, check status
    pub async fn invoke(&self, action: &ActionSpec) -> HarnessResult<CapturedExchange> {
        let short = self.timeouts.short();
        let poll = self.timeouts.poll_interval();

        let trigger = action
            .trigger
            .resolve(self.driver, self.timeouts.medium(), poll)
            .await?;

        let listener = self.driver.arm_response(&action.capture).await?;
        debug!("Armed listener for {} ({})", action.name, action.capture);
        let acted = async {
            self.driver.click(&trigger.selector, short).await?;
            if let Some(confirm) = &action.confirm {
                self.confirm(confirm).await?;
            }
            Ok::<(), HarnessError>(())
        }
        .await;
        if let Err(e) = acted {
            if let Err(de) = self.driver.disarm(listener).await {
                warn!("Could not disarm listener for {}: {}", action.name, de);
            }
            return Err(e);
        }

        let exchange = match self
            .driver
            .await_response(listener, self.timeouts.api_response())
            .await
        {
            Ok(exchange) => exchange,
            Err(HarnessError::Timeout {
                what, timeout_ms, ..
            }) => {
                let observed = self.driver.observed_requests().await?;
                let seen = observed
                    .iter()
                    .map(|r| match r.status {
                        Some(s) => format!("{} {} ({s})", r.method, r.url),
                        None => format!("{} {}", r.method, r.url),
                    })
                    .collect::<Vec<_>>();
                if let Some(contract) = &action.contract {
                    if let Some(violation) = observed.iter().find_map(|r| {
                        contract.violation(&r.method, path_of(&r.url))
                    }) {
                        return Err(HarnessError::ContractViolation(format!(
                            "{}: no matching response; {violation}",
                            action.name
                        )));
                    }
                }
                return Err(HarnessError::Timeout {
                    what,
                    timeout_ms,
                    context: format!("observed requests: [{}]", seen.join(", ")),
                });
            }
            Err(e) => return Err(e),
        };

        debug!(
            "{} -> {} {} returned {}",
            action.name, exchange.request_method, exchange.request_url, exchange.response_status
        );

        if let Some(contract) = &action.contract {
            if let Some(violation) =
                contract.violation(&exchange.request_method, exchange.request_path())
            {
                warn!("{}: {}", action.name, violation);
                return Err(HarnessError::ContractViolation(format!(
                    "{}: {violation} (status {})",
                    action.name, exchange.response_status
                )));
            }
        }

        if !exchange.is_success() {
            return Err(HarnessError::ActionFailed {
                method: exchange.request_method.clone(),
                url: exchange.request_url.clone(),
                status: exchange.response_status,
                body: exchange.response_body.to_string(),
            });
        }

        info!(
            "{} succeeded: {} {} -> {}",
            action.name,
            exchange.request_method,
            exchange.request_path(),
            exchange.response_status
        );
        Ok(exchange)
    }

    async fn confirm(&self, confirm: &ConfirmStep) -> HarnessResult<()> {
        let short = self.timeouts.short();
        let poll = self.timeouts.poll_interval();

        match confirm.dialog.resolve(self.driver, short, poll).await {
            Ok(_) => {}
            Err(HarnessError::SelectorNotFound { .. }) if confirm.optional => {
                debug!("No confirmation dialog shown");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        if let Some((chain, text)) = &confirm.reason {
            if let Some(field) = chain.find_visible(self.driver).await? {
                self.driver.fill(&field.selector, text, short).await?;
            }
        }

        let button = confirm.button.resolve(self.driver, short, poll).await?;
        self.driver.click(&button.selector, short).await?;
        confirm.dialog.wait_gone(self.driver, short, poll).await
    }
}

fn path_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
    path.split(['?', '#']).next().unwrap_or(path)
}
