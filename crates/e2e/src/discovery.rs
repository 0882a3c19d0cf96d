//! Entity discovery
//!
//! Finds an event for a test to act on. The data layer is asked first; the
//! public listing page is scraped only when no data layer can answer. A
//! failed scrape produces a [`DiscoveryReport`] describing what the page
//! actually showed.

use persistcheck_common::{EntityKind, EventKind, TargetEntity};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::join_url;
use crate::datalayer::DataLayer;
use crate::driver::BrowserDriver;
use crate::error::{HarnessError, HarnessResult};
use crate::selectors::{catalog, SelectorChain};
use crate::wait::{wait_until, Timeouts};

pub const EVENTS_PATH: &str = "/events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    DataLayer,
    Ui,
}

/// An event resolved to a stable id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredEvent {
    pub id: String,
    pub title: String,
    pub kind: EventKind,
    pub source: DiscoverySource,
}

impl DiscoveredEvent {
    pub fn target(&self) -> TargetEntity {
        TargetEntity {
            id: self.id.clone(),
            kind: EntityKind::Event,
            title: self.title.clone(),
            current_status: None,
        }
    }
}

/// What the listing page looked like when discovery gave up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub wanted: String,
    pub url: String,
    pub title: String,
    pub error_banner: Option<String>,
    pub empty_state: bool,
    pub checked: Vec<String>,
}

impl fmt::Display for DiscoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  wanted:       {}", self.wanted)?;
        writeln!(f, "  url:          {}", self.url)?;
        writeln!(f, "  title:        {}", self.title)?;
        writeln!(
            f,
            "  error banner: {}",
            self.error_banner.as_deref().unwrap_or("none")
        )?;
        writeln!(f, "  empty state:  {}", self.empty_state)?;
        write!(f, "  checked:      {}", self.checked.join(", "))
    }
}

pub struct EntityLocator<'a> {
    driver: &'a dyn BrowserDriver,
    data: Option<&'a dyn DataLayer>,
    app_url: String,
    timeouts: Timeouts,
}

impl<'a> EntityLocator<'a> {
    pub fn new(
        driver: &'a dyn BrowserDriver,
        data: Option<&'a dyn DataLayer>,
        app_url: &str,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            driver,
            data,
            app_url: app_url.to_string(),
            timeouts,
        }
    }

    pub async fn first_ticket_event(&self) -> HarnessResult<DiscoveredEvent> {
        self.first_event(EventKind::Ticketed).await
    }

    pub async fn first_rsvp_event(&self) -> HarnessResult<DiscoveredEvent> {
        self.first_event(EventKind::Rsvp).await
    }

    pub async fn first_event(&self, kind: EventKind) -> HarnessResult<DiscoveredEvent> {
        if let Some(data) = self.data {
            match data.first_event(kind).await {
                Ok(Some(event)) => {
                    info!(
                        "Discovered {} event '{}' ({}) via {} data layer",
                        kind.as_str(),
                        event.title,
                        event.id,
                        data.name()
                    );
                    return Ok(DiscoveredEvent {
                        id: event.id,
                        title: event.title,
                        kind,
                        source: DiscoverySource::DataLayer,
                    });
                }
                Ok(None) => {
                    return Err(HarnessError::MissingSeedData(format!(
                        "no published upcoming {} event in the {} data layer",
                        kind.as_str(),
                        data.name()
                    )))
                }
                Err(e) if e.is_unsupported() => {
                    debug!("{} data layer cannot list events, scraping the UI", data.name());
                }
                Err(e) => {
                    warn!("Data layer lookup failed ({}), scraping the UI", e);
                }
            }
        }
        self.scrape_listing(kind).await
    }

    async fn scrape_listing(&self, kind: EventKind) -> HarnessResult<DiscoveredEvent> {
        let cards = catalog::event_card_link(kind);
        let empty = catalog::empty_state();
        let banner = catalog::error_banner();

        self.driver
            .goto(&join_url(&self.app_url, EVENTS_PATH), self.timeouts.medium())
            .await?;

        // Settle on whichever of the three outcomes renders first
        let driver = self.driver;
        let outcomes = [&cards, &empty, &banner];
        let settled = wait_until(
            "event listing to render",
            self.timeouts.medium(),
            self.timeouts.poll_interval(),
            || async move {
                for chain in outcomes {
                    if chain.any_visible(driver).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
        )
        .await;
        match settled {
            Ok(()) => {}
            Err(HarnessError::Timeout { .. }) => {}
            Err(e) => return Err(e),
        }

        if let Some(card) = cards.find_visible(self.driver).await? {
            if card.strategy_index > 0 {
                warn!(
                    "Listing has no card tagged {}; using {}",
                    kind.as_str(),
                    card.selector
                );
            }
            let href = self
                .driver
                .get_attribute(&card.selector, "href")
                .await?
                .unwrap_or_default();
            if let Some(id) = event_id_from_href(&href) {
                let title = self
                    .driver
                    .text_content(&card.selector)
                    .await?
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                info!("Discovered {} event '{}' ({}) via UI", kind.as_str(), title, id);
                return Ok(DiscoveredEvent {
                    id,
                    title,
                    kind,
                    source: DiscoverySource::Ui,
                });
            }
            warn!("Event card link has no usable href: '{}'", href);
        }

        let report = self.report(kind, &outcomes).await?;
        if report.empty_state && report.error_banner.is_none() {
            Err(HarnessError::MissingSeedData(format!(
                "listing shows no {} events\n{report}",
                kind.as_str()
            )))
        } else {
            Err(HarnessError::Discovery(report))
        }
    }

    async fn report(&self, kind: EventKind, chains: &[&SelectorChain]) -> HarnessResult<DiscoveryReport> {
        let banner = match catalog::error_banner().find_visible(self.driver).await? {
            Some(found) => Some(
                self.driver
                    .text_content(&found.selector)
                    .await?
                    .unwrap_or_else(|| "(no text)".to_string()),
            ),
            None => None,
        };
        Ok(DiscoveryReport {
            wanted: format!("{} event", kind.as_str()),
            url: self.driver.current_url().await?,
            title: self.driver.title().await?,
            error_banner: banner,
            empty_state: catalog::empty_state().any_visible(self.driver).await?,
            checked: chains.iter().flat_map(|c| c.selectors()).collect(),
        })
    }
}

/// Id segment following `/events/` in a link
pub fn event_id_from_href(href: &str) -> Option<String> {
    let (_, rest) = href.split_once("/events/")?;
    let id = rest.split(['/', '?', '#']).next()?;
    (!id.is_empty()).then(|| id.to_string())
}
