//! Authenticated browser sessions
//!
//! A session owns one browser context for the duration of one test. Logging
//! in submits the real login form and then blocks until navigation leaves
//! `/login`; there is no retry.

use persistcheck_common::{Credentials, Role};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::accounts::AccountTable;
use crate::config::join_url;
use crate::driver::{BrowserDriver, UrlPredicate};
use crate::error::{HarnessError, HarnessResult};
use crate::selectors::catalog;
use crate::wait::Timeouts;

pub const LOGIN_PATH: &str = "/login";

fn login_error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)invalid|failed|error").expect("static regex"))
}

/// Does `text` read like a login failure message
pub fn is_login_error_text(text: &str) -> bool {
    !text.trim().is_empty() && login_error_pattern().is_match(text)
}

pub struct SessionContext<'a> {
    driver: &'a dyn BrowserDriver,
    app_url: String,
    accounts: &'a AccountTable,
    timeouts: Timeouts,
}

impl<'a> SessionContext<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        app_url: &str,
        accounts: &'a AccountTable,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            driver,
            app_url: app_url.trim_end_matches('/').to_string(),
            accounts,
            timeouts,
        }
    }

    pub fn driver(&self) -> &'a dyn BrowserDriver {
        self.driver
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.app_url, path)
    }

    /// Log in as one of the seeded roles
    pub async fn login_as(&self, role: Role) -> HarnessResult<Credentials> {
        let credentials = self.accounts.get(role)?.clone();
        debug!("Logging in as {} ({})", role, credentials.email);
        self.login_with(&credentials).await
    }

    /// Log in with caller-supplied credentials
    pub async fn login_with(&self, credentials: &Credentials) -> HarnessResult<Credentials> {
        self.submit_login_form(credentials).await?;

        let timeout = self.timeouts.authentication();
        match self
            .driver
            .wait_for_url(&UrlPredicate::Excludes(LOGIN_PATH.to_string()), timeout)
            .await
        {
            Ok(()) => {}
            Err(HarnessError::Timeout { .. }) => {
                let url = self.driver.current_url().await.unwrap_or_default();
                return Err(HarnessError::LoginStuck {
                    email: credentials.email.clone(),
                    url,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(e),
        }
        self.driver.wait_for_load(self.timeouts.medium()).await?;

        info!("Logged in as {}", credentials.email);
        Ok(credentials.clone())
    }

    /// Submit credentials that should be rejected and return the error shown
    pub async fn login_expecting_error(&self, credentials: &Credentials) -> HarnessResult<String> {
        self.submit_login_form(credentials).await?;

        let error = catalog::login_error()
            .resolve(
                self.driver,
                self.timeouts.authentication(),
                self.timeouts.poll_interval(),
            )
            .await?;
        let text = self
            .driver
            .text_content(&error.selector)
            .await?
            .unwrap_or_default()
            .trim()
            .to_string();

        let url = self.driver.current_url().await?;
        if !url.contains(LOGIN_PATH) {
            return Err(HarnessError::AssertionFailed(format!(
                "login for {} left the login page ({url}) despite showing '{text}'",
                credentials.email
            )));
        }
        if !is_login_error_text(&text) {
            return Err(HarnessError::AssertionFailed(format!(
                "login error text '{text}' does not look like an error message"
            )));
        }

        debug!("Login for {} rejected with '{}'", credentials.email, text);
        Ok(text)
    }

    async fn submit_login_form(&self, credentials: &Credentials) -> HarnessResult<()> {
        let short = self.timeouts.short();
        let poll = self.timeouts.poll_interval();

        self.driver
            .goto(&self.url(LOGIN_PATH), self.timeouts.medium())
            .await?;

        let email = catalog::login_email().resolve(self.driver, short, poll).await?;
        self.driver
            .fill(&email.selector, &credentials.email, short)
            .await?;
        let password = catalog::login_password()
            .resolve(self.driver, short, poll)
            .await?;
        self.driver
            .fill(&password.selector, &credentials.password, short)
            .await?;
        let button = catalog::login_button().resolve(self.driver, short, poll).await?;
        self.driver.click(&button.selector, short).await
    }

    /// Does the rendered page mention `email` anywhere
    pub async fn page_shows_email(&self, email: &str) -> HarnessResult<bool> {
        let body = self.driver.text_content("body").await?.unwrap_or_default();
        Ok(body.contains(email))
    }

    pub async fn is_authenticated(&self) -> HarnessResult<bool> {
        let url = self.driver.current_url().await?;
        if url.contains(LOGIN_PATH) {
            return Ok(false);
        }
        catalog::logout_button().any_visible(self.driver).await
    }

    pub async fn logout(&self) -> HarnessResult<()> {
        let chain = catalog::logout_button();
        let button = chain
            .resolve(self.driver, self.timeouts.short(), self.timeouts.poll_interval())
            .await?;
        self.driver.click(&button.selector, self.timeouts.short()).await?;
        chain
            .wait_gone(
                self.driver,
                self.timeouts.authentication(),
                self.timeouts.poll_interval(),
            )
            .await?;
        info!("Logged out");
        Ok(())
    }

    /// Drop cookies and web storage so the next login starts clean
    pub async fn clear_auth_state(&self) -> HarnessResult<()> {
        self.driver.clear_cookies().await?;
        self.driver.clear_storage().await?;
        debug!("Cleared auth state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Invalid email or password", true ; "invalid")]
    #[test_case("Login FAILED", true ; "failed upper case")]
    #[test_case("An error occurred", true ; "error")]
    #[test_case("Welcome back", false ; "not an error")]
    #[test_case("   ", false ; "blank")]
    fn test_login_error_text(text: &str, expected: bool) {
        assert_eq!(is_login_error_text(text), expected);
    }
}
