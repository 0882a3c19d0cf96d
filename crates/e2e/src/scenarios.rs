//! Scenario templates
//!
//! Every regression scenario follows the same shape: log in, locate the
//! entity, make sure the precondition holds, act once, then verify through
//! [`PersistenceVerifier`] and the audit trail. Steps are recorded as they
//! run and the first failing step ends the scenario.

use persistcheck_common::db::PARTICIPATION_HISTORY;
use persistcheck_common::{
    Credentials, EventFields, EventKind, ParticipationStatus, ParticipationType, ProfileFields, Role,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::accounts::AccountTable;
use crate::action::{ActionInvoker, ActionSpec};
use crate::api::ApiClient;
use crate::artifacts::ArtifactStore;
use crate::audit::AuditVerifier;
use crate::cleanup::{CleanupManager, TestUser};
use crate::config::{join_url, HarnessConfig};
use crate::datalayer::DataLayer;
use crate::discovery::{DiscoveredEvent, DiscoverySource, EntityLocator};
use crate::driver::{BrowserDriver, CapturedExchange, ObservedRequest};
use crate::error::{HarnessError, HarnessResult};
use crate::persistence::{
    EventProbe, ParticipationProbe, PersistenceVerifier, ProfileProbe, VerificationReport, Verdict,
};
use crate::plan::{ScenarioInvocation, UserRef};
use crate::selectors::{catalog, SelectorChain};
use crate::session::SessionContext;
use crate::wait::{wait_until, Timeouts};

pub const PROFILE_PATH: &str = "/profile";

pub fn event_edit_path(event_id: &str) -> String {
    format!("/admin/events/{event_id}/edit")
}

/// Everything a scenario needs, borrowed for one plan run
pub struct ScenarioContext<'a> {
    pub driver: &'a dyn BrowserDriver,
    pub data: &'a dyn DataLayer,
    pub accounts: &'a AccountTable,
    pub cleanup: &'a CleanupManager,
    pub artifacts: Option<&'a ArtifactStore>,
    pub config: &'a HarnessConfig,
}

impl<'a> ScenarioContext<'a> {
    pub fn timeouts(&self) -> Timeouts {
        self.config.timeouts
    }

    pub fn session(&self) -> SessionContext<'a> {
        SessionContext::new(self.driver, &self.config.app_url, self.accounts, self.timeouts())
    }

    pub fn locator(&self) -> EntityLocator<'a> {
        EntityLocator::new(self.driver, Some(self.data), &self.config.app_url, self.timeouts())
    }

    pub fn invoker(&self) -> ActionInvoker<'a> {
        ActionInvoker::new(self.driver, self.timeouts())
    }

    pub fn verifier(&self) -> PersistenceVerifier<'a> {
        PersistenceVerifier::new(self.driver, self.data, self.timeouts())
    }

    pub fn audit(&self) -> AuditVerifier<'a> {
        AuditVerifier::new(self.data)
    }

    /// The pinned event, or the first one discovery finds
    pub async fn discover(&self, kind: EventKind, pinned: Option<&str>) -> HarnessResult<DiscoveredEvent> {
        let Some(id) = pinned else {
            return self.locator().first_event(kind).await;
        };
        match self.data.event(id).await {
            Ok(Some(event)) => Ok(DiscoveredEvent {
                id: event.id,
                title: event.title,
                kind,
                source: DiscoverySource::DataLayer,
            }),
            Ok(None) => Err(HarnessError::MissingSeedData(format!("pinned event {id} does not exist"))),
            Err(e) if e.is_unsupported() => Ok(DiscoveredEvent {
                id: id.to_string(),
                title: id.to_string(),
                kind,
                source: DiscoverySource::Ui,
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn open_event_page(&self, event_id: &str) -> HarnessResult<()> {
        let url = join_url(&self.config.app_url, &format!("/events/{event_id}"));
        self.driver.goto(&url, self.timeouts().medium()).await?;
        self.driver.wait_for_load(self.timeouts().medium()).await
    }

    /// Drop any previous session, then log in through the form
    pub async fn sign_in(&self, credentials: &Credentials) -> HarnessResult<()> {
        let session = self.session();
        session.clear_auth_state().await?;
        session.login_with(credentials).await?;
        Ok(())
    }
}

/// The account a scenario acts as
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioUser {
    pub credentials: Credentials,
    pub user_id: String,
    /// Created for this scenario and removed after it
    pub owned: bool,
}

impl ScenarioUser {
    /// Seeded account. When the data layer cannot map an email to an id the
    /// id is taken from an API login.
    pub async fn seeded(ctx: &ScenarioContext<'_>, role: Role) -> HarnessResult<Self> {
        let credentials = ctx.accounts.get(role)?.clone();
        let user_id = match ctx.data.user_id_for_email(&credentials.email).await {
            Ok(id) => id,
            Err(e) if e.is_unsupported() => {
                let client = ApiClient::new(&ctx.config.api_url, ctx.timeouts().api_response())?;
                let user = client.login(&credentials).await?;
                debug!("Resolved {} to user {} via API login", credentials.email, user.id);
                user.id
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            credentials,
            user_id,
            owned: false,
        })
    }
}

impl From<TestUser> for ScenarioUser {
    fn from(user: TestUser) -> Self {
        Self {
            credentials: user.credentials(),
            user_id: user.id,
            owned: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Everything one scenario did and saw
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub steps: Vec<StepRecord>,
    pub exchanges: Vec<CapturedExchange>,
    pub verifications: Vec<VerificationReport>,
    pub diagnostics: Vec<String>,
    /// Checks the data layer could not perform
    #[serde(default)]
    pub unverified: Vec<String>,
    pub screenshot: Option<PathBuf>,
}

impl ScenarioReport {
    pub fn new(scenario: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            ..Default::default()
        }
    }

    /// Run and record one step
    pub async fn step<T, Fut>(&mut self, name: &str, fut: Fut) -> HarnessResult<T>
    where
        Fut: Future<Output = HarnessResult<T>>,
    {
        let start = Instant::now();
        debug!("{}: {}", self.scenario, name);
        let result = fut.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Err(e) = &result {
            warn!("{}: step '{}' failed: {}", self.scenario, name, e);
        }
        self.steps.push(StepRecord {
            name: name.to_string(),
            passed: result.is_ok(),
            duration_ms,
            detail: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    /// Keep a verification report; a `Failed` verdict fails the last step
    /// and an `Unverified` one is remembered
    pub fn settle(&mut self, verification: VerificationReport) -> HarnessResult<()> {
        if verification.verdict == Verdict::Unverified {
            self.unverified
                .push(format!("{} was only confirmed in the UI", verification.subject));
        }
        let result = verification.clone().into_result().map(|_| ());
        if let Err(e) = &result {
            if let Some(last) = self.steps.last_mut() {
                last.passed = false;
                last.detail = Some(e.to_string());
            }
        }
        self.verifications.push(verification);
        result
    }

    pub fn passed(&self) -> bool {
        self.steps.iter().all(|s| s.passed)
    }
}

/// A finished scenario; `error` is the first failure, if any
#[derive(Debug)]
pub struct ScenarioResult {
    pub report: ScenarioReport,
    pub error: Option<HarnessError>,
}

/// Run one scenario. On failure a screenshot is saved under `label`.
///
/// A scenario whose steps all passed but which left checks unperformed
/// ends with [`HarnessError::Unverified`].
pub async fn run_scenario(
    ctx: &ScenarioContext<'_>,
    invocation: &ScenarioInvocation,
    label: &str,
) -> ScenarioResult {
    let mut report = ScenarioReport::new(invocation.name());
    let outcome = dispatch(ctx, &mut report, invocation).await;

    let error = match outcome {
        Ok(()) if report.unverified.is_empty() => None,
        Ok(()) => Some(HarnessError::Unverified(report.unverified.join("; "))),
        Err(e) => {
            if let Some(store) = ctx.artifacts {
                match store.screenshot(ctx.driver, &format!("{label}-failure")).await {
                    Ok(path) => report.screenshot = Some(path),
                    Err(se) => warn!("Could not capture failure screenshot: {}", se),
                }
            }
            Some(e)
        }
    };
    ScenarioResult { report, error }
}

async fn dispatch(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    invocation: &ScenarioInvocation,
) -> HarnessResult<()> {
    match invocation {
        ScenarioInvocation::LoginRoles { roles } => login_roles(ctx, report, roles).await,
        ScenarioInvocation::LoginRejected { email, password } => {
            let credentials = Credentials::new(email, password);
            let session = ctx.session();
            report.step("clear session", session.clear_auth_state()).await?;
            let text = report
                .step("login is rejected", session.login_expecting_error(&credentials))
                .await?;
            report.diagnostics.push(format!("login error shown: {text}"));
            Ok(())
        }
        ScenarioInvocation::TicketPurchase { user, event_id } => {
            with_user(ctx, user, |u| async move {
                participation_flow(ctx, report, &u, ParticipationType::Ticket, event_id.as_deref(), Flow::Register, "")
                    .await
            })
            .await
        }
        ScenarioInvocation::TicketCancellation {
            user,
            event_id,
            reason,
        } => {
            with_user(ctx, user, |u| async move {
                participation_flow(ctx, report, &u, ParticipationType::Ticket, event_id.as_deref(), Flow::Cancel, reason)
                    .await
            })
            .await
        }
        ScenarioInvocation::TicketLifecycle {
            user,
            event_id,
            reason,
        } => {
            with_user(ctx, user, |u| async move {
                participation_flow(ctx, report, &u, ParticipationType::Ticket, event_id.as_deref(), Flow::Lifecycle, reason)
                    .await
            })
            .await
        }
        ScenarioInvocation::RsvpCreate { user, event_id } => {
            with_user(ctx, user, |u| async move {
                participation_flow(ctx, report, &u, ParticipationType::Rsvp, event_id.as_deref(), Flow::Register, "")
                    .await
            })
            .await
        }
        ScenarioInvocation::RsvpCancel {
            user,
            event_id,
            reason,
        } => {
            with_user(ctx, user, |u| async move {
                participation_flow(ctx, report, &u, ParticipationType::Rsvp, event_id.as_deref(), Flow::Cancel, reason)
                    .await
            })
            .await
        }
        ScenarioInvocation::RsvpLifecycle {
            user,
            event_id,
            reason,
        } => {
            with_user(ctx, user, |u| async move {
                participation_flow(ctx, report, &u, ParticipationType::Rsvp, event_id.as_deref(), Flow::Lifecycle, reason)
                    .await
            })
            .await
        }
        ScenarioInvocation::DuplicateRsvpPrevented { user, event_id } => {
            with_user(ctx, user, |u| async move {
                duplicate_rsvp_prevented(ctx, report, &u, event_id.as_deref()).await
            })
            .await
        }
        ScenarioInvocation::IndependentUserState { event_id } => {
            let cleanup = ctx.cleanup;
            cleanup
                .with_test_user("user-a", |a| async move {
                    cleanup
                        .with_test_user("user-b", |b| async move {
                            independent_user_state(
                                ctx,
                                report,
                                &ScenarioUser::from(a),
                                &ScenarioUser::from(b),
                                event_id.as_deref(),
                            )
                            .await
                        })
                        .await
                })
                .await
        }
        ScenarioInvocation::ProfileUpdate { user, fields } => {
            with_user(ctx, user, |u| async move { profile_update(ctx, report, &u, fields).await }).await
        }
        ScenarioInvocation::EventUpdate {
            user,
            event_id,
            kind,
            fields,
        } => {
            with_user(ctx, user, |u| async move {
                event_update(ctx, report, &u, event_id.as_deref(), *kind, fields).await
            })
            .await
        }
        ScenarioInvocation::PageDiagnostic { path, user } => match user {
            None => page_diagnostic(ctx, report, path, None).await,
            Some(user) => {
                with_user(ctx, user, |u| async move { page_diagnostic(ctx, report, path, Some(&u)).await })
                    .await
            }
        },
    }
}

/// Run `body` as the referenced user. Fresh users are deleted afterwards
/// whatever `body` does.
async fn with_user<F, Fut>(ctx: &ScenarioContext<'_>, user: &UserRef, body: F) -> HarnessResult<()>
where
    F: FnOnce(ScenarioUser) -> Fut,
    Fut: Future<Output = HarnessResult<()>>,
{
    match user {
        UserRef::Role { role } => body(ScenarioUser::seeded(ctx, *role).await?).await,
        UserRef::Fresh { fresh } => {
            ctx.cleanup
                .with_test_user(fresh, |t| body(ScenarioUser::from(t)))
                .await
        }
    }
}

async fn login_roles(ctx: &ScenarioContext<'_>, report: &mut ScenarioReport, roles: &[Role]) -> HarnessResult<()> {
    let roles: Vec<Role> = if roles.is_empty() {
        ctx.accounts.roles().collect()
    } else {
        roles.to_vec()
    };
    let session = ctx.session();

    for role in roles {
        let credentials = report
            .step(&format!("log in as {role}"), async {
                session.clear_auth_state().await?;
                session.login_as(role).await
            })
            .await?;
        report
            .step(&format!("{role} sees own email"), async {
                if session.page_shows_email(&credentials.email).await? {
                    Ok(())
                } else {
                    let url = session.driver().current_url().await?;
                    Err(HarnessError::AssertionFailed(format!(
                        "{} is not shown after logging in as {role} ({url})",
                        credentials.email
                    )))
                }
            })
            .await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Register,
    Cancel,
    /// Register, cancel, register again
    Lifecycle,
}

fn event_kind(participation_type: ParticipationType) -> EventKind {
    match participation_type {
        ParticipationType::Ticket => EventKind::Ticketed,
        ParticipationType::Rsvp => EventKind::Rsvp,
    }
}

fn controls(participation_type: ParticipationType) -> (SelectorChain, SelectorChain) {
    match participation_type {
        ParticipationType::Ticket => (catalog::cancel_ticket(), catalog::purchase_ticket()),
        ParticipationType::Rsvp => (catalog::cancel_rsvp(), catalog::rsvp()),
    }
}

fn register_action(participation_type: ParticipationType) -> ActionSpec {
    match participation_type {
        ParticipationType::Ticket => ActionSpec::purchase_ticket(),
        ParticipationType::Rsvp => ActionSpec::rsvp(),
    }
}

fn cancel_action(participation_type: ParticipationType, reason: &str) -> ActionSpec {
    match participation_type {
        ParticipationType::Ticket => ActionSpec::cancel_ticket(reason),
        ParticipationType::Rsvp => ActionSpec::cancel_rsvp(reason),
    }
}

async fn participation_flow(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    user: &ScenarioUser,
    participation_type: ParticipationType,
    pinned: Option<&str>,
    flow: Flow,
    reason: &str,
) -> HarnessResult<()> {
    report.step("log in", ctx.sign_in(&user.credentials)).await?;
    let event = open_event(ctx, report, participation_type, pinned).await?;

    // The precondition is the opposite of the first transition
    let start_active = flow == Flow::Cancel;
    let setup = report
        .step(
            &format!(
                "ensure {} {}",
                if start_active { "an active" } else { "no active" },
                participation_type
            ),
            ensure_participation(ctx, participation_type, start_active, reason),
        )
        .await?;
    report.exchanges.extend(setup);

    match flow {
        Flow::Register => {
            transition(ctx, report, user, &event, participation_type, ParticipationStatus::Active, reason).await
        }
        Flow::Cancel => {
            transition(ctx, report, user, &event, participation_type, ParticipationStatus::Cancelled, reason).await
        }
        Flow::Lifecycle => {
            transition(ctx, report, user, &event, participation_type, ParticipationStatus::Active, reason).await?;
            let first = report
                .step("record first participation", latest_id(ctx, user, &event))
                .await?;
            transition(ctx, report, user, &event, participation_type, ParticipationStatus::Cancelled, reason).await?;
            transition(ctx, report, user, &event, participation_type, ParticipationStatus::Active, reason).await?;
            report
                .step("recreated participation is new", async {
                    let second = latest_id(ctx, user, &event).await?;
                    if second == first {
                        return Err(HarnessError::AssertionFailed(format!(
                            "re-registering reactivated participation {first} instead of creating a new one"
                        )));
                    }
                    Ok(())
                })
                .await
        }
    }
}

async fn open_event(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    participation_type: ParticipationType,
    pinned: Option<&str>,
) -> HarnessResult<DiscoveredEvent> {
    let kind = event_kind(participation_type);
    let event = report
        .step(&format!("discover {} event", kind.as_str()), ctx.discover(kind, pinned))
        .await?;
    report.diagnostics.push(format!(
        "event '{}' ({}) via {:?}",
        event.title, event.id, event.source
    ));
    report.step("open event page", ctx.open_event_page(&event.id)).await?;
    Ok(event)
}

/// Bring the page into the wanted participation state, acting only if it
/// is not already there
async fn ensure_participation(
    ctx: &ScenarioContext<'_>,
    participation_type: ParticipationType,
    active: bool,
    reason: &str,
) -> HarnessResult<Option<CapturedExchange>> {
    let timeouts = ctx.timeouts();
    let poll = timeouts.poll_interval();
    let (cancel, register) = controls(participation_type);

    let (driver, cancel_ref, register_ref) = (ctx.driver, &cancel, &register);
    wait_until("participation controls", timeouts.medium(), poll, || async move {
        Ok(cancel_ref.any_visible(driver).await? || register_ref.any_visible(driver).await?)
    })
    .await?;

    if cancel.any_visible(ctx.driver).await? == active {
        return Ok(None);
    }

    let action = if active {
        register_action(participation_type)
    } else {
        cancel_action(participation_type, reason)
    };
    info!("Setting up: {}", action.name);
    let exchange = ctx.invoker().invoke(&action).await?;

    let settled = if active { &cancel } else { &register };
    settled.resolve(ctx.driver, timeouts.medium(), poll).await?;
    Ok(Some(exchange))
}

/// Act once, then verify the new status in the reloaded UI, the data layer
/// and the audit trail
async fn transition(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    user: &ScenarioUser,
    event: &DiscoveredEvent,
    participation_type: ParticipationType,
    to: ParticipationStatus,
    reason: &str,
) -> HarnessResult<()> {
    let action = if to.is_active() {
        register_action(participation_type)
    } else {
        cancel_action(participation_type, reason)
    };
    let prior = if to.is_active() {
        None
    } else {
        current_id(ctx, user, event).await?
    };
    let exchange = report.step(&action.name, ctx.invoker().invoke(&action)).await?;
    report.exchanges.push(exchange);

    let probe = ParticipationProbe::new(&user.user_id, &event.id, participation_type, to)
        .expect_notice(catalog::success_notice());
    let verification = report
        .step(&format!("verify {to} persisted"), ctx.verifier().run(&probe))
        .await?;
    report.settle(verification)?;

    let unverified = report
        .step(
            "verify audit record",
            verify_audit(ctx, &user.user_id, &event.id, to, prior.as_deref()),
        )
        .await?;
    report.unverified.extend(unverified);
    Ok(())
}

/// Latest participation id, if the data layer can tell
async fn current_id(
    ctx: &ScenarioContext<'_>,
    user: &ScenarioUser,
    event: &DiscoveredEvent,
) -> HarnessResult<Option<String>> {
    match ctx.data.latest_participation(&user.user_id, &event.id).await {
        Ok(latest) => Ok(latest.map(|p| p.id)),
        Err(e) if e.is_unsupported() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn latest_id(ctx: &ScenarioContext<'_>, user: &ScenarioUser, event: &DiscoveredEvent) -> HarnessResult<String> {
    ctx.data
        .latest_participation(&user.user_id, &event.id)
        .await?
        .map(|p| p.id)
        .ok_or_else(|| {
            HarnessError::AssertionFailed(format!(
                "no participation of user {} for event {}",
                user.user_id, event.id
            ))
        })
}

/// `Some(reason)` when the data layer cannot read the audit table.
///
/// `prior` is the participation id before a cancellation; a hard-deleted
/// row is looked up in the history under that id.
async fn verify_audit(
    ctx: &ScenarioContext<'_>,
    user_id: &str,
    event_id: &str,
    expected: ParticipationStatus,
    prior: Option<&str>,
) -> HarnessResult<Option<String>> {
    let unverified = |e: HarnessError| format!("{expected} audit record of user {user_id} for event {event_id}: {e}");
    let latest = match ctx.data.latest_participation(user_id, event_id).await {
        Ok(latest) => latest,
        Err(e) if e.is_unsupported() => return Ok(Some(unverified(e))),
        Err(e) => return Err(e),
    };
    let entity_id = match (latest, prior) {
        (Some(record), _) => record.id,
        (None, Some(prior)) if expected == ParticipationStatus::Cancelled => {
            debug!("Participation {} was deleted, checking its history", prior);
            prior.to_string()
        }
        (None, _) => {
            return Err(HarnessError::AuditMissing {
                entity_type: PARTICIPATION_HISTORY.to_string(),
                entity_id: format!("{user_id}/{event_id}"),
                status: expected.to_string(),
            })
        }
    };
    match ctx.audit().require(PARTICIPATION_HISTORY, &entity_id, expected).await {
        Ok(()) => Ok(None),
        Err(e) if e.is_unsupported() => Ok(Some(unverified(e))),
        Err(e) => Err(e),
    }
}

async fn duplicate_rsvp_prevented(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    user: &ScenarioUser,
    pinned: Option<&str>,
) -> HarnessResult<()> {
    let reason = crate::action::DEFAULT_CANCEL_REASON;
    report.step("log in", ctx.sign_in(&user.credentials)).await?;
    let event = open_event(ctx, report, ParticipationType::Rsvp, pinned).await?;
    let setup = report
        .step(
            "ensure an active RSVP",
            ensure_participation(ctx, ParticipationType::Rsvp, true, reason),
        )
        .await?;
    report.exchanges.extend(setup);

    let timeouts = ctx.timeouts();
    report
        .step("reload event page", async {
            ctx.driver.reload(timeouts.long()).await?;
            ctx.driver.wait_for_load(timeouts.medium()).await
        })
        .await?;

    report
        .step("rsvp control is withdrawn", async {
            catalog::cancel_rsvp()
                .resolve(ctx.driver, timeouts.medium(), timeouts.poll_interval())
                .await?;
            match catalog::rsvp().find_visible(ctx.driver).await? {
                Some(found) if ctx.driver.is_enabled(&found.selector).await? => {
                    Err(HarnessError::AssertionFailed(format!(
                        "RSVP control ({}) is still offered with an active RSVP",
                        found.selector
                    )))
                }
                _ => Ok(()),
            }
        })
        .await?;

    report
        .step("exactly one active participation", async {
            let count = ctx.data.active_participation_count(&user.user_id, &event.id).await?;
            if count != 1 {
                return Err(HarnessError::AssertionFailed(format!(
                    "user {} has {count} active participations for event {}",
                    user.user_id, event.id
                )));
            }
            Ok(())
        })
        .await
}

async fn independent_user_state(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    a: &ScenarioUser,
    b: &ScenarioUser,
    pinned: Option<&str>,
) -> HarnessResult<()> {
    let reason = crate::action::DEFAULT_CANCEL_REASON;
    let rsvp = ParticipationType::Rsvp;

    report
        .step("users are distinct", async {
            if a.user_id == b.user_id || a.credentials.email == b.credentials.email {
                return Err(HarnessError::AssertionFailed(format!(
                    "test users collide: {} / {}",
                    a.credentials.email, b.credentials.email
                )));
            }
            Ok(())
        })
        .await?;

    report.step("log in as user A", ctx.sign_in(&a.credentials)).await?;
    let event = open_event(ctx, report, rsvp, pinned).await?;
    transition(ctx, report, a, &event, rsvp, ParticipationStatus::Active, reason).await?;

    report.step("log in as user B", ctx.sign_in(&b.credentials)).await?;
    report.step("open event page as user B", ctx.open_event_page(&event.id)).await?;
    transition(ctx, report, b, &event, rsvp, ParticipationStatus::Active, reason).await?;
    report
        .step("participations are distinct", async {
            let first = latest_id(ctx, a, &event).await?;
            let second = latest_id(ctx, b, &event).await?;
            if first == second {
                return Err(HarnessError::AssertionFailed(format!(
                    "users A and B share participation {first}"
                )));
            }
            Ok(())
        })
        .await?;

    report.step("log in as user A again", ctx.sign_in(&a.credentials)).await?;
    report.step("open event page as user A", ctx.open_event_page(&event.id)).await?;
    transition(ctx, report, a, &event, rsvp, ParticipationStatus::Cancelled, reason).await?;

    report.step("log in as user B again", ctx.sign_in(&b.credentials)).await?;
    report.step("open event page as user B again", ctx.open_event_page(&event.id)).await?;
    let probe = ParticipationProbe::new(&b.user_id, &event.id, rsvp, ParticipationStatus::Active);
    let verification = report
        .step("user B is still registered", ctx.verifier().run(&probe))
        .await?;
    report.settle(verification)
}

async fn profile_update(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    user: &ScenarioUser,
    fields: &ProfileFields,
) -> HarnessResult<()> {
    if fields.provided().is_empty() {
        return Err(HarnessError::PlanParse("profile_update needs at least one field".into()));
    }
    let timeouts = ctx.timeouts();

    report.step("log in", ctx.sign_in(&user.credentials)).await?;
    report
        .step("open profile page", async {
            let url = join_url(&ctx.config.app_url, PROFILE_PATH);
            ctx.driver.goto(&url, timeouts.medium()).await?;
            ctx.driver.wait_for_load(timeouts.medium()).await
        })
        .await?;

    report
        .step("fill profile form", async {
            for (field, value) in fields.provided() {
                let input = catalog::profile_field(field)
                    .resolve(ctx.driver, timeouts.medium(), timeouts.poll_interval())
                    .await?;
                ctx.driver.fill(&input.selector, value, timeouts.short()).await?;
            }
            Ok::<(), HarnessError>(())
        })
        .await?;

    let exchange = report
        .step("save profile", ctx.invoker().invoke(&ActionSpec::save_profile()))
        .await?;
    let request_body = exchange.request_body.clone();
    let status = exchange.response_status;
    report.exchanges.push(exchange);

    report
        .step("request carries every field", async {
            let missing = unsent_fields(request_body.as_ref(), fields);
            if !missing.is_empty() {
                return Err(HarnessError::AssertionFailed(format!(
                    "profile request did not send: {}",
                    missing.join("; ")
                )));
            }
            if status != 200 {
                return Err(HarnessError::AssertionFailed(format!(
                    "profile save returned {status}, expected 200"
                )));
            }
            Ok(())
        })
        .await?;

    let probe = ProfileProbe::new(&user.user_id, fields.clone());
    let verification = report
        .step("verify profile persisted", ctx.verifier().run(&probe))
        .await?;
    report.settle(verification)
}

async fn event_update(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    user: &ScenarioUser,
    pinned: Option<&str>,
    kind: EventKind,
    fields: &EventFields,
) -> HarnessResult<()> {
    if fields.is_empty() {
        return Err(HarnessError::PlanParse("event_update needs at least one field".into()));
    }

    report.step("log in", ctx.sign_in(&user.credentials)).await?;
    let event = report
        .step(&format!("discover {} event", kind.as_str()), ctx.discover(kind, pinned))
        .await?;
    report.diagnostics.push(format!(
        "event '{}' ({}) via {:?}",
        event.title, event.id, event.source
    ));
    report
        .step("open event edit page", open_event_form(ctx, &event.id))
        .await?;
    let original = report
        .step("read current values", read_event_form(ctx, fields))
        .await?;

    let result = edit_event(ctx, report, &event.id, fields).await;

    if original != *fields {
        match restore_event(ctx, &event.id, &original).await {
            Ok(()) => report.diagnostics.push(format!("event {} restored", event.id)),
            Err(e) => {
                warn!("Could not restore event {}: {}", event.id, e);
                report
                    .diagnostics
                    .push(format!("event {} not restored: {e}", event.id));
            }
        }
    }
    result
}

async fn edit_event(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    event_id: &str,
    fields: &EventFields,
) -> HarnessResult<()> {
    report.step("fill event form", fill_event_form(ctx, fields)).await?;
    let exchange = report
        .step("save event", ctx.invoker().invoke(&ActionSpec::save_event()))
        .await?;
    let path = exchange.request_path().to_string();
    report.exchanges.push(exchange);

    report
        .step("request targets the edited event", async {
            if path.trim_end_matches('/').ends_with(&format!("/events/{event_id}")) {
                Ok(())
            } else {
                Err(HarnessError::ContractViolation(format!(
                    "save event sent PUT {path}, expected .../events/{event_id}"
                )))
            }
        })
        .await?;

    let probe = EventProbe::new(event_id, fields.clone());
    let verification = report
        .step("verify event persisted", ctx.verifier().run(&probe))
        .await?;
    report.settle(verification)
}

async fn open_event_form(ctx: &ScenarioContext<'_>, event_id: &str) -> HarnessResult<()> {
    let url = join_url(&ctx.config.app_url, &event_edit_path(event_id));
    ctx.driver.goto(&url, ctx.timeouts().medium()).await?;
    ctx.driver.wait_for_load(ctx.timeouts().medium()).await
}

/// Current form values of the fields `fields` provides
async fn read_event_form(ctx: &ScenarioContext<'_>, fields: &EventFields) -> HarnessResult<EventFields> {
    let timeouts = ctx.timeouts();
    let mut current = EventFields::default();
    for (field, _) in fields.provided() {
        let input = catalog::event_field(field)
            .resolve(ctx.driver, timeouts.medium(), timeouts.poll_interval())
            .await?;
        let value = ctx.driver.input_value(&input.selector, timeouts.short()).await?;
        match field {
            "title" => current.title = Some(value),
            _ => {
                let capacity = value.trim().parse().map_err(|_| {
                    HarnessError::AssertionFailed(format!("capacity input holds {value:?}"))
                })?;
                current.capacity = Some(capacity);
            }
        }
    }
    Ok(current)
}

async fn fill_event_form(ctx: &ScenarioContext<'_>, fields: &EventFields) -> HarnessResult<()> {
    let timeouts = ctx.timeouts();
    for (field, value) in fields.provided() {
        let input = catalog::event_field(field)
            .resolve(ctx.driver, timeouts.medium(), timeouts.poll_interval())
            .await?;
        ctx.driver.fill(&input.selector, &value, timeouts.short()).await?;
    }
    Ok(())
}

async fn restore_event(ctx: &ScenarioContext<'_>, event_id: &str, original: &EventFields) -> HarnessResult<()> {
    open_event_form(ctx, event_id).await?;
    fill_event_form(ctx, original).await?;
    ctx.invoker().invoke(&ActionSpec::save_event()).await?;
    info!("Restored event {}", event_id);
    Ok(())
}

/// Fields whose exact value is absent from the request body
pub fn unsent_fields(body: Option<&serde_json::Value>, fields: &ProfileFields) -> Vec<String> {
    fields
        .provided()
        .into_iter()
        .filter_map(|(field, value)| {
            let sent = body.and_then(|b| b.get(field));
            match sent.and_then(serde_json::Value::as_str) {
                Some(s) if s == value => None,
                _ => Some(format!(
                    "{field} (expected {value:?}, sent {})",
                    sent.map(ToString::to_string).unwrap_or_else(|| "nothing".into())
                )),
            }
        })
        .collect()
}

/// What a page showed, for diagnostic plans
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub requested: String,
    pub url: String,
    pub title: String,
    /// Chain name to the selector that matched, if any
    pub controls: BTreeMap<String, Option<String>>,
    pub body_excerpt: String,
    pub requests: Vec<ObservedRequest>,
    pub errors: Vec<String>,
}

const BODY_EXCERPT_CHARS: usize = 500;

fn diagnostic_chains() -> Vec<SelectorChain> {
    vec![
        catalog::login_email(),
        catalog::logout_button(),
        catalog::event_card_link(EventKind::Ticketed),
        catalog::event_card_link(EventKind::Rsvp),
        catalog::empty_state(),
        catalog::error_banner(),
        catalog::purchase_ticket(),
        catalog::cancel_ticket(),
        catalog::rsvp(),
        catalog::cancel_rsvp(),
        catalog::success_notice(),
        catalog::error_notice(),
        catalog::profile_save(),
    ]
}

async fn page_diagnostic(
    ctx: &ScenarioContext<'_>,
    report: &mut ScenarioReport,
    path: &str,
    user: Option<&ScenarioUser>,
) -> HarnessResult<()> {
    if let Some(user) = user {
        report.step("log in", ctx.sign_in(&user.credentials)).await?;
    }
    let snapshot = report.step("snapshot page", snapshot_page(ctx, path)).await?;

    report.diagnostics.push(format!(
        "{} ({}): {} control(s) visible, {} request(s), {} error(s)",
        snapshot.url,
        snapshot.title,
        snapshot.controls.values().filter(|v| v.is_some()).count(),
        snapshot.requests.len(),
        snapshot.errors.len()
    ));
    report.diagnostics.extend(snapshot.errors.iter().cloned());

    if let Some(store) = ctx.artifacts {
        let name = format!("diagnostic {path}");
        store.write_json(&name, &snapshot)?;
        match store.screenshot(ctx.driver, &name).await {
            Ok(shot) => report.screenshot = Some(shot),
            Err(e) => report.diagnostics.push(format!("screenshot failed: {e}")),
        }
    }
    Ok(())
}

async fn snapshot_page(ctx: &ScenarioContext<'_>, path: &str) -> HarnessResult<PageSnapshot> {
    let timeouts = ctx.timeouts();
    let driver = ctx.driver;
    let mut snapshot = PageSnapshot {
        requested: path.to_string(),
        ..Default::default()
    };

    let url = join_url(&ctx.config.app_url, path);
    if let Err(e) = driver.goto(&url, timeouts.medium()).await {
        snapshot.errors.push(format!("navigation: {e}"));
    }
    if let Err(e) = driver.wait_for_load(timeouts.medium()).await {
        snapshot.errors.push(format!("load: {e}"));
    }

    snapshot.url = driver.current_url().await?;
    snapshot.title = driver.title().await?;
    for chain in diagnostic_chains() {
        let found = chain.find_visible(driver).await?.map(|r| r.selector);
        snapshot.controls.insert(chain.name, found);
    }
    snapshot.body_excerpt = driver
        .text_content("body")
        .await?
        .unwrap_or_default()
        .chars()
        .take(BODY_EXCERPT_CHARS)
        .collect();
    snapshot.requests = driver.observed_requests().await?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unsent_fields_requires_exact_values() {
        let fields = ProfileFields {
            scene_name: Some("Knotty".into()),
            bio: Some(String::new()),
            ..Default::default()
        };

        let complete = json!({"sceneName": "Knotty", "bio": ""});
        assert!(unsent_fields(Some(&complete), &fields).is_empty());

        let dropped = json!({"sceneName": "Knotty", "bio": null});
        let missing = unsent_fields(Some(&dropped), &fields);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].starts_with("bio"));

        assert_eq!(unsent_fields(None, &fields).len(), 2);
    }

    #[tokio::test]
    async fn test_failed_step_is_recorded_and_returned() {
        let mut report = ScenarioReport::new("demo");
        report
            .step("ok", async { Ok::<(), HarnessError>(()) })
            .await
            .unwrap();
        let err = report
            .step("boom", async {
                Err::<(), _>(HarnessError::AssertionFailed("nope".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::AssertionFailed(_)));
        assert_eq!(report.steps.len(), 2);
        assert!(report.steps[0].passed);
        assert!(!report.steps[1].passed);
        assert!(report.steps[1].detail.as_deref().unwrap().contains("nope"));
        assert!(!report.passed());
    }
}
