//! Persistence verification
//!
//! After an action has been observed, a verification runs three phases in
//! strict order:
//!
//! 1. `PostAction`: optionally confirm the optimistic UI change.
//! 2. `Reloaded`: reload, wait for network idle, re-read the UI.
//! 3. `CrossChecked`: read the same fields from the data layer.
//!
//! The verdict is `Verified` only when every field agrees with the expected
//! value on both sides. Values are compared exactly, so a cleared field must
//! come back as `Some("")`, never `None`. When the data layer cannot answer,
//! the UI reading is still judged: a mismatch fails, agreement is only
//! `Unverified`.

use async_trait::async_trait;
use persistcheck_common::{EventFields, ParticipationStatus, ParticipationType, ProfileFields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::datalayer::DataLayer;
use crate::driver::BrowserDriver;
use crate::error::{HarnessError, HarnessResult};
use crate::selectors::{catalog, SelectorChain};
use crate::wait::{wait_until, Timeouts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PostAction,
    Reloaded,
    CrossChecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Verified,
    Failed,
    /// The UI agreed but the data layer could not be read
    Unverified,
}

/// A value as read from one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reading {
    /// This side has no notion of the field
    NotRead,
    Value(Option<String>),
}

impl Reading {
    fn agrees_with(&self, expected: &Option<String>) -> bool {
        match self {
            Reading::NotRead => true,
            Reading::Value(v) => v == expected,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::NotRead => f.write_str("-"),
            Reading::Value(v) => fmt_value(f, v),
        }
    }
}

fn fmt_value(f: &mut fmt::Formatter<'_>, value: &Option<String>) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{v:?}"),
        None => f.write_str("null"),
    }
}

/// One field, expected versus what each side reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub field: String,
    pub expected: Option<String>,
    pub ui: Reading,
    pub data_layer: Reading,
}

impl Observation {
    pub fn agrees(&self) -> bool {
        self.ui.agrees_with(&self.expected) && self.data_layer.agrees_with(&self.expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub subject: String,
    pub verdict: Verdict,
    pub phases: Vec<PhaseRecord>,
    pub observations: Vec<Observation>,
}

impl VerificationReport {
    pub fn is_verified(&self) -> bool {
        self.verdict == Verdict::Verified
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(|o| !o.agrees())
    }

    /// `Failed` becomes [`HarnessError::PersistenceMismatch`]
    pub fn into_result(self) -> HarnessResult<Self> {
        match self.verdict {
            Verdict::Verified | Verdict::Unverified => Ok(self),
            Verdict::Failed => Err(HarnessError::PersistenceMismatch {
                subject: self.subject.clone(),
                details: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for phase in &self.phases {
            let mark = if phase.passed { "ok" } else { "FAILED" };
            writeln!(f, "  [{:?}] {}: {}", phase.phase, mark, phase.detail)?;
        }
        for o in &self.observations {
            let mark = if o.agrees() { " " } else { "!" };
            write!(f, "  {mark} {:<20} expected ", o.field)?;
            fmt_value(f, &o.expected)?;
            writeln!(f, ", ui {}, data layer {}", o.ui, o.data_layer)?;
        }
        Ok(())
    }
}

pub type FieldValues = BTreeMap<String, Option<String>>;

/// What to verify after one action
#[async_trait]
pub trait StateProbe: Send + Sync {
    fn describe(&self) -> String;

    /// Expected value of each field, in report order
    fn expected(&self) -> Vec<(String, Option<String>)>;

    /// Element whose appearance confirms the optimistic update
    fn optimistic(&self) -> Option<SelectorChain> {
        None
    }

    /// Fields visible in the reloaded page. Fields left out are not read.
    async fn read_ui(&self, driver: &dyn BrowserDriver, timeouts: &Timeouts) -> HarnessResult<FieldValues>;

    /// Fields as persisted. Fields left out are not read.
    async fn read_data_layer(&self, data: &dyn DataLayer) -> HarnessResult<FieldValues>;
}

pub struct PersistenceVerifier<'a> {
    driver: &'a dyn BrowserDriver,
    data: &'a dyn DataLayer,
    timeouts: Timeouts,
    optimistic_timeout: Duration,
}

impl<'a> PersistenceVerifier<'a> {
    pub fn new(driver: &'a dyn BrowserDriver, data: &'a dyn DataLayer, timeouts: Timeouts) -> Self {
        Self {
            driver,
            data,
            timeouts,
            optimistic_timeout: timeouts.short(),
        }
    }

    /// Bound for the optimistic check, e.g. a 2s notification target
    pub fn with_optimistic_timeout(mut self, timeout: Duration) -> Self {
        self.optimistic_timeout = timeout;
        self
    }

    pub async fn run(&self, probe: &dyn StateProbe) -> HarnessResult<VerificationReport> {
        let subject = probe.describe();
        let mut phases = Vec::with_capacity(3);

        if let Some(chain) = probe.optimistic() {
            match chain
                .resolve(self.driver, self.optimistic_timeout, self.timeouts.poll_interval())
                .await
            {
                Ok(found) => phases.push(PhaseRecord {
                    phase: Phase::PostAction,
                    passed: true,
                    detail: format!("{} shown ({})", chain.name, found.selector),
                }),
                Err(HarnessError::SelectorNotFound { .. }) => {
                    let detail = format!(
                        "{} not shown within {} ms",
                        chain.name,
                        self.optimistic_timeout.as_millis()
                    );
                    warn!("{}: {}", subject, detail);
                    phases.push(PhaseRecord {
                        phase: Phase::PostAction,
                        passed: false,
                        detail,
                    });
                    return Ok(VerificationReport {
                        subject,
                        verdict: Verdict::Failed,
                        phases,
                        observations: Vec::new(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.driver.reload(self.timeouts.long()).await?;
        self.driver.wait_for_load(self.timeouts.medium()).await?;
        let ui = probe.read_ui(self.driver, &self.timeouts).await?;
        phases.push(PhaseRecord {
            phase: Phase::Reloaded,
            passed: true,
            detail: format!("read {} field(s) after reload", ui.len()),
        });

        let (persisted, unread) = match probe.read_data_layer(self.data).await {
            Ok(values) => (values, None),
            Err(e) if e.is_unsupported() => {
                warn!("{}: data layer not read: {}", subject, e);
                (FieldValues::new(), Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let observations: Vec<Observation> = probe
            .expected()
            .into_iter()
            .map(|(field, expected)| Observation {
                ui: ui.get(&field).cloned().map_or(Reading::NotRead, Reading::Value),
                data_layer: persisted
                    .get(&field)
                    .cloned()
                    .map_or(Reading::NotRead, Reading::Value),
                field,
                expected,
            })
            .collect();

        let agreed = observations.iter().all(Observation::agrees);
        let mut detail = format!(
            "{} of {} field(s) agree via {} data layer",
            observations.iter().filter(|o| o.agrees()).count(),
            observations.len(),
            self.data.name()
        );
        if let Some(reason) = &unread {
            detail = format!("{detail}; data layer not read: {reason}");
        }
        phases.push(PhaseRecord {
            phase: Phase::CrossChecked,
            passed: agreed,
            detail,
        });

        let verdict = match (agreed, &unread) {
            (false, _) => Verdict::Failed,
            (true, None) => Verdict::Verified,
            (true, Some(_)) => Verdict::Unverified,
        };
        let report = VerificationReport {
            subject,
            verdict,
            phases,
            observations,
        };
        match report.verdict {
            Verdict::Verified => info!("Verified {}", report.subject),
            Verdict::Unverified => warn!("Only the UI confirmed {}", report.subject),
            Verdict::Failed => warn!("Persistence mismatch for {}:\n{}", report.subject, report),
        }
        Ok(report)
    }
}

pub const OFFERED: &str = "offered";
pub const NOT_OFFERED: &str = "not offered";

/// Participation status, cross-checked between the event page controls and
/// the latest participation row
pub struct ParticipationProbe {
    pub user_id: String,
    pub event_id: String,
    pub participation_type: ParticipationType,
    pub expected: ParticipationStatus,
    pub optimistic: Option<SelectorChain>,
}

impl ParticipationProbe {
    pub fn new(
        user_id: &str,
        event_id: &str,
        participation_type: ParticipationType,
        expected: ParticipationStatus,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            participation_type,
            expected,
            optimistic: None,
        }
    }

    pub fn expect_notice(mut self, chain: SelectorChain) -> Self {
        self.optimistic = Some(chain);
        self
    }

    fn cancel_chain(&self) -> SelectorChain {
        match self.participation_type {
            ParticipationType::Ticket => catalog::cancel_ticket(),
            ParticipationType::Rsvp => catalog::cancel_rsvp(),
        }
    }

    fn register_chain(&self) -> SelectorChain {
        match self.participation_type {
            ParticipationType::Ticket => catalog::purchase_ticket(),
            ParticipationType::Rsvp => catalog::rsvp(),
        }
    }

    async fn control_offered(
        driver: &dyn BrowserDriver,
        chain: &SelectorChain,
    ) -> HarnessResult<bool> {
        match chain.find_visible(driver).await? {
            Some(found) => driver.is_enabled(&found.selector).await,
            None => Ok(false),
        }
    }
}

fn offered(flag: bool) -> Option<String> {
    Some(if flag { OFFERED } else { NOT_OFFERED }.to_string())
}

#[async_trait]
impl StateProbe for ParticipationProbe {
    fn describe(&self) -> String {
        format!(
            "{} of user {} for event {} is {}",
            self.participation_type, self.user_id, self.event_id, self.expected
        )
    }

    fn expected(&self) -> Vec<(String, Option<String>)> {
        let active = self.expected.is_active();
        vec![
            ("status".to_string(), Some(self.expected.as_str().to_string())),
            ("cancel control".to_string(), offered(active)),
            ("register control".to_string(), offered(!active)),
        ]
    }

    fn optimistic(&self) -> Option<SelectorChain> {
        self.optimistic.clone()
    }

    async fn read_ui(&self, driver: &dyn BrowserDriver, timeouts: &Timeouts) -> HarnessResult<FieldValues> {
        let cancel = self.cancel_chain();
        let register = self.register_chain();

        // The page renders one of the two controls once participation loads
        let (cancel_ref, register_ref) = (&cancel, &register);
        let settled = wait_until(
            "participation controls",
            timeouts.medium(),
            timeouts.poll_interval(),
            || async move {
                Ok(cancel_ref.any_visible(driver).await? || register_ref.any_visible(driver).await?)
            },
        )
        .await;
        if let Err(e) = settled {
            if !e.is_timeout() {
                return Err(e);
            }
        }

        let cancel_offered = Self::control_offered(driver, &cancel).await?;
        let register_offered = Self::control_offered(driver, &register).await?;
        let status = if cancel_offered {
            Some(ParticipationStatus::Active.as_str().to_string())
        } else if register_offered {
            Some(ParticipationStatus::Cancelled.as_str().to_string())
        } else {
            None
        };
        debug!(
            "UI after reload: cancel={}, register={}",
            cancel_offered, register_offered
        );

        Ok(BTreeMap::from([
            ("status".to_string(), status),
            ("cancel control".to_string(), offered(cancel_offered)),
            ("register control".to_string(), offered(register_offered)),
        ]))
    }

    async fn read_data_layer(&self, data: &dyn DataLayer) -> HarnessResult<FieldValues> {
        let latest = data.latest_participation(&self.user_id, &self.event_id).await?;
        let status = match latest {
            Some(record) => Some(record.status.as_str().to_string()),
            // A hard-deleted row counts as cancelled
            None if self.expected == ParticipationStatus::Cancelled => {
                Some(ParticipationStatus::Cancelled.as_str().to_string())
            }
            None => None,
        };
        Ok(BTreeMap::from([("status".to_string(), status)]))
    }
}

/// Profile fields, cross-checked between the form inputs and the user row
pub struct ProfileProbe {
    pub user_id: String,
    pub written: ProfileFields,
    pub optimistic: Option<SelectorChain>,
}

impl ProfileProbe {
    pub fn new(user_id: &str, written: ProfileFields) -> Self {
        Self {
            user_id: user_id.to_string(),
            written,
            optimistic: Some(catalog::success_notice()),
        }
    }
}

#[async_trait]
impl StateProbe for ProfileProbe {
    fn describe(&self) -> String {
        let fields: Vec<&str> = self.written.provided().into_iter().map(|(k, _)| k).collect();
        format!("profile of user {} ({})", self.user_id, fields.join(", "))
    }

    fn expected(&self) -> Vec<(String, Option<String>)> {
        self.written
            .provided()
            .into_iter()
            .map(|(field, value)| (field.to_string(), Some(value.to_string())))
            .collect()
    }

    fn optimistic(&self) -> Option<SelectorChain> {
        self.optimistic.clone()
    }

    async fn read_ui(&self, driver: &dyn BrowserDriver, timeouts: &Timeouts) -> HarnessResult<FieldValues> {
        let mut values = FieldValues::new();
        for (field, _) in self.written.provided() {
            let input = catalog::profile_field(field)
                .resolve(driver, timeouts.medium(), timeouts.poll_interval())
                .await?;
            let value = driver.input_value(&input.selector, timeouts.short()).await?;
            values.insert(field.to_string(), Some(value));
        }
        Ok(values)
    }

    async fn read_data_layer(&self, data: &dyn DataLayer) -> HarnessResult<FieldValues> {
        let stored = data.profile(&self.user_id).await?;
        Ok(self
            .written
            .provided()
            .into_iter()
            .map(|(field, _)| (field.to_string(), stored.get(field).map(str::to_string)))
            .collect())
    }
}

/// Event fields, cross-checked between the admin edit form and the event row
pub struct EventProbe {
    pub event_id: String,
    pub written: EventFields,
}

impl EventProbe {
    pub fn new(event_id: &str, written: EventFields) -> Self {
        Self {
            event_id: event_id.to_string(),
            written,
        }
    }
}

#[async_trait]
impl StateProbe for EventProbe {
    fn describe(&self) -> String {
        let fields: Vec<&str> = self.written.provided().into_iter().map(|(k, _)| k).collect();
        format!("event {} ({})", self.event_id, fields.join(", "))
    }

    fn expected(&self) -> Vec<(String, Option<String>)> {
        self.written
            .provided()
            .into_iter()
            .map(|(field, value)| (field.to_string(), Some(value)))
            .collect()
    }

    fn optimistic(&self) -> Option<SelectorChain> {
        Some(catalog::success_notice())
    }

    async fn read_ui(&self, driver: &dyn BrowserDriver, timeouts: &Timeouts) -> HarnessResult<FieldValues> {
        let mut values = FieldValues::new();
        for (field, _) in self.written.provided() {
            let input = catalog::event_field(field)
                .resolve(driver, timeouts.medium(), timeouts.poll_interval())
                .await?;
            let value = driver.input_value(&input.selector, timeouts.short()).await?;
            values.insert(field.to_string(), Some(value));
        }
        Ok(values)
    }

    async fn read_data_layer(&self, data: &dyn DataLayer) -> HarnessResult<FieldValues> {
        let stored = data.event(&self.event_id).await?;
        Ok(self
            .written
            .provided()
            .into_iter()
            .map(|(field, _)| {
                let value = stored.as_ref().and_then(|e| EventFields::read(e, field));
                (field.to_string(), value)
            })
            .collect())
    }
}
