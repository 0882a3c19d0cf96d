//! In-process stand-in for the events application
//!
//! `FakeApp` renders each page as a flat list of elements keyed by the
//! primary selector of the matching catalog chain, and backs every action
//! with the SQLite mirror. `Bugs` switches on known regressions.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use persistcheck_common::db::NewEvent;
use persistcheck_common::{
    AuditLogEntry, Database, Error, EventFields, EventKind, EventSummary, ParticipationRecord,
    ParticipationStatus, ParticipationType, ProfileFields, Role, TestUserSpec,
};
use persistcheck_e2e::accounts::AccountTable;
use persistcheck_e2e::artifacts::ArtifactStore;
use persistcheck_e2e::cleanup::CleanupManager;
use persistcheck_e2e::config::HarnessConfig;
use persistcheck_e2e::datalayer::{DataLayer, SqliteDataLayer};
use persistcheck_e2e::driver::{
    BrowserDriver, CapturedExchange, DriverFactory, ListenerId, ObservedRequest, ResponseMatcher,
    UrlPredicate, WaitState,
};
use persistcheck_e2e::error::{HarnessError, HarnessResult};
use persistcheck_e2e::scenarios::ScenarioContext;
use persistcheck_e2e::selectors::{catalog, SelectorChain};
use persistcheck_e2e::wait::Timeouts;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const APP_URL: &str = "http://app.test";
pub const API_URL: &str = "http://api.test";
pub const SEEDED_PASSWORD: &str = "Test123!";

/// Regressions the fake can reproduce
#[derive(Debug, Clone, Copy, Default)]
pub struct Bugs {
    /// Cancel Ticket calls `DELETE /api/events/{id}/ticket`, which 404s
    pub legacy_ticket_endpoint: bool,
    /// Cancellation answers 200 and shows success without writing
    pub cancel_not_persisted: bool,
    /// Empty profile fields are sent as null and ignored by the server
    pub drops_empty_profile_fields: bool,
    /// Submitting the login form never navigates
    pub login_hangs: bool,
    /// Event cards carry no test ids, only plain links
    pub legacy_markup: bool,
    /// The listing shows an error banner instead of events
    pub listing_error: bool,
    /// The RSVP button stays visible next to Cancel RSVP
    pub rsvp_always_offered: bool,
    /// Saving the profile panics inside the driver
    pub panic_on_save: bool,
    /// Cancellation updates the status without a history row
    pub skips_history: bool,
    /// Cancelled participations are deleted instead of updated
    pub hard_deletes_cancelled: bool,
    /// The event save answers 200 but drops the capacity change
    pub ignores_event_capacity: bool,
}

#[derive(Debug, Clone)]
enum Action {
    None,
    Input(InputSlot),
    SubmitLogin,
    Logout,
    Register(ParticipationType),
    OpenCancel(ParticipationType),
    ConfirmCancel,
    SaveProfile,
    SaveEvent,
}

#[derive(Debug, Clone)]
enum InputSlot {
    LoginEmail,
    LoginPassword,
    Reason,
    Profile(&'static str),
    Event(&'static str),
}

#[derive(Debug, Clone)]
struct Element {
    selectors: Vec<String>,
    text: String,
    value: Option<String>,
    href: Option<String>,
    enabled: bool,
    action: Action,
}

impl Element {
    fn new(selectors: Vec<String>, text: &str, action: Action) -> Self {
        Self {
            selectors,
            text: text.to_string(),
            value: None,
            href: None,
            enabled: true,
            action,
        }
    }

    fn primary(chain: SelectorChain, text: &str, action: Action) -> Self {
        Self::new(vec![chain.primary()], text, action)
    }

    fn matches(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }
}

struct Listener {
    id: u64,
    matcher: ResponseMatcher,
    exchange: Option<CapturedExchange>,
}

#[derive(Default)]
struct State {
    path: String,
    session: Option<String>,
    login_email: String,
    login_password: String,
    login_error: Option<String>,
    dialog: Option<ParticipationType>,
    reason: String,
    notice: Option<bool>,
    profile_form: BTreeMap<String, String>,
    event_form: BTreeMap<String, String>,
    listeners: Vec<Listener>,
    next_listener: u64,
    observed: Vec<ObservedRequest>,
    screenshots: usize,
}

pub struct FakeApp {
    db: Database,
    bugs: Bugs,
    state: Mutex<State>,
}

impl FakeApp {
    pub fn new(db: Database, bugs: Bugs) -> Self {
        Self {
            db,
            bugs,
            state: Mutex::new(State {
                path: "about:blank".to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn path(&self) -> String {
        self.state.lock().path.clone()
    }

    pub fn logged_in_user(&self) -> Option<String> {
        self.state.lock().session.clone()
    }

    pub fn requests(&self) -> Vec<ObservedRequest> {
        self.state.lock().observed.clone()
    }

    pub fn armed_listeners(&self) -> usize {
        self.state.lock().listeners.len()
    }

    fn event_id(path: &str) -> Option<&str> {
        path.strip_prefix("/events/").filter(|id| !id.is_empty())
    }

    fn edited_event_id(path: &str) -> Option<&str> {
        path.strip_prefix("/admin/events/")
            .and_then(|rest| rest.strip_suffix("/edit"))
            .filter(|id| !id.is_empty())
    }

    fn is_admin(&self, st: &State) -> HarnessResult<bool> {
        match &st.session {
            Some(user) => Ok(self.db.user_role(user)? == Role::Admin),
            None => Ok(false),
        }
    }

    fn render(&self, st: &State) -> HarnessResult<Vec<Element>> {
        let mut out = Vec::new();

        if let Some(user) = &st.session {
            let email = self.db.user_email(user)?;
            out.push(Element::new(vec!["header".into()], &email, Action::None));
            out.push(Element::primary(catalog::logout_button(), "Logout", Action::Logout));
        }

        match st.path.as_str() {
            "/login" => {
                let mut email = Element::primary(catalog::login_email(), "", Action::Input(InputSlot::LoginEmail));
                email.value = Some(st.login_email.clone());
                let mut password =
                    Element::primary(catalog::login_password(), "", Action::Input(InputSlot::LoginPassword));
                password.value = Some(st.login_password.clone());
                out.push(email);
                out.push(password);
                out.push(Element::primary(catalog::login_button(), "Sign In", Action::SubmitLogin));
                if let Some(error) = &st.login_error {
                    out.push(Element::primary(catalog::login_error(), error, Action::None));
                }
            }
            "/events" => self.render_listing(&mut out)?,
            "/profile" if st.session.is_some() => {
                for field in ProfileFields::FIELD_NAMES {
                    let mut input =
                        Element::primary(catalog::profile_field(field), "", Action::Input(InputSlot::Profile(field)));
                    input.value = Some(st.profile_form.get(field).cloned().unwrap_or_default());
                    out.push(input);
                }
                out.push(Element::primary(catalog::profile_save(), "Save Changes", Action::SaveProfile));
            }
            path if Self::edited_event_id(path).is_some() => {
                if self.is_admin(st)? {
                    for field in EventFields::FIELD_NAMES {
                        let mut input =
                            Element::primary(catalog::event_field(field), "", Action::Input(InputSlot::Event(field)));
                        input.value = Some(st.event_form.get(field).cloned().unwrap_or_default());
                        out.push(input);
                    }
                    out.push(Element::primary(catalog::event_save(), "Save", Action::SaveEvent));
                }
            }
            path => {
                if let (Some(event_id), Some(user)) = (Self::event_id(path), &st.session) {
                    self.render_event(st, event_id, user, &mut out)?;
                }
            }
        }

        match st.notice {
            Some(true) => out.push(Element::primary(catalog::success_notice(), "Saved", Action::None)),
            Some(false) => out.push(Element::primary(catalog::error_notice(), "Something went wrong", Action::None)),
            None => {}
        }
        Ok(out)
    }

    fn render_listing(&self, out: &mut Vec<Element>) -> HarnessResult<()> {
        if self.bugs.listing_error {
            out.push(Element::primary(catalog::error_banner(), "Failed to load events", Action::None));
            return Ok(());
        }
        let now = chrono::Utc::now();
        let events: Vec<_> = self
            .db
            .list_events()?
            .into_iter()
            .filter(|e| e.is_published && e.start_date >= now)
            .collect();
        if events.is_empty() {
            out.push(Element::primary(catalog::empty_state(), "No events scheduled", Action::None));
        }
        for event in events {
            let chain = catalog::event_card_link(event.kind);
            let selectors = if self.bugs.legacy_markup {
                vec![chain.strategies[3].to_selector()]
            } else {
                vec![
                    chain.strategies[0].to_selector(),
                    chain.strategies[1].to_selector(),
                    chain.strategies[3].to_selector(),
                ]
            };
            let mut link = Element::new(selectors, &event.title, Action::None);
            link.href = Some(format!("/events/{}", event.id));
            out.push(link);
        }
        Ok(())
    }

    fn render_event(&self, st: &State, event_id: &str, user: &str, out: &mut Vec<Element>) -> HarnessResult<()> {
        let Some(event) = self.db.event(event_id)? else {
            return Ok(());
        };
        out.push(Element::new(vec!["h1".into()], &event.title, Action::None));
        let participation_type = event.kind.participation_type();
        let active = self
            .db
            .latest_participation(user, event_id)?
            .map(|p| p.status.is_active() && p.participation_type == participation_type)
            .unwrap_or(false);

        let (cancel, register, register_text) = match participation_type {
            ParticipationType::Ticket => (catalog::cancel_ticket(), catalog::purchase_ticket(), "Purchase Ticket"),
            ParticipationType::Rsvp => (catalog::cancel_rsvp(), catalog::rsvp(), "RSVP Now"),
        };
        if active {
            out.push(Element::primary(cancel, "Cancel", Action::OpenCancel(participation_type)));
        }
        let keep_rsvp = self.bugs.rsvp_always_offered && participation_type == ParticipationType::Rsvp;
        if !active || keep_rsvp {
            out.push(Element::primary(register, register_text, Action::Register(participation_type)));
        }

        if st.dialog.is_some() {
            out.push(Element::primary(catalog::confirm_dialog(), "Are you sure?", Action::None));
            let mut reason = Element::primary(catalog::cancellation_reason(), "", Action::Input(InputSlot::Reason));
            reason.value = Some(st.reason.clone());
            out.push(reason);
            out.push(Element::primary(catalog::confirm_button(), "Confirm", Action::ConfirmCancel));
        }
        Ok(())
    }

    fn find(&self, selector: &str) -> HarnessResult<Option<Element>> {
        let st = self.state.lock();
        Ok(self.render(&st)?.into_iter().find(|e| e.matches(selector)))
    }

    fn require(&self, selector: &str) -> HarnessResult<Element> {
        self.find(selector)?.ok_or_else(|| HarnessError::SelectorNotFound {
            chain: selector.to_string(),
            tried: selector.to_string(),
        })
    }

    fn load(&self, st: &mut State, path: &str) -> HarnessResult<()> {
        st.path = path.to_string();
        st.dialog = None;
        st.notice = None;
        st.reason.clear();
        st.login_error = None;
        st.observed.clear();
        st.profile_form.clear();
        st.event_form.clear();
        if let Some(event_id) = Self::edited_event_id(path) {
            if let Some(event) = self.db.event(event_id)? {
                for field in EventFields::FIELD_NAMES {
                    if let Some(value) = EventFields::read(&event, field) {
                        st.event_form.insert(field.to_string(), value);
                    }
                }
            }
        }
        if path == "/profile" {
            if let Some(user) = &st.session {
                let profile = self.db.profile(user)?;
                for field in ProfileFields::FIELD_NAMES {
                    st.profile_form
                        .insert(field.to_string(), profile.get(field).unwrap_or_default().to_string());
                }
            }
        }
        Ok(())
    }

    fn emit(st: &mut State, method: &str, path: &str, body: Option<Value>, status: u16, response: Value) {
        let url = format!("{API_URL}{path}");
        st.observed.push(ObservedRequest {
            method: method.to_string(),
            url: url.clone(),
            status: Some(status),
        });
        if let Some(listener) = st
            .listeners
            .iter_mut()
            .find(|l| l.exchange.is_none() && l.matcher.matches(method, &url))
        {
            listener.exchange = Some(CapturedExchange {
                request_url: url,
                request_method: method.to_string(),
                request_body: body,
                response_status: status,
                response_body: response,
            });
        }
    }

    fn perform(&self, st: &mut State, action: Action) -> HarnessResult<()> {
        match action {
            Action::None | Action::Input(_) => {}
            Action::SubmitLogin => {
                if self.bugs.login_hangs {
                    return Ok(());
                }
                let body = json!({"email": st.login_email, "password": st.login_password});
                match self.db.authenticate(&st.login_email, &st.login_password)? {
                    Some(user) => {
                        Self::emit(st, "POST", "/api/auth/login", Some(body), 200, json!({"success": true}));
                        st.session = Some(user);
                        self.load(st, "/dashboard")?;
                    }
                    None => {
                        Self::emit(st, "POST", "/api/auth/login", Some(body), 401, json!({"success": false}));
                        st.login_error = Some("Invalid email or password".to_string());
                    }
                }
            }
            Action::Logout => {
                st.session = None;
                self.load(st, "/login")?;
            }
            Action::Register(participation_type) => {
                let (user, event) = self.session_event(st)?;
                let segment = match participation_type {
                    ParticipationType::Ticket => "tickets",
                    ParticipationType::Rsvp => "rsvp",
                };
                let path = format!("/api/events/{event}/{segment}");
                match self.db.create_participation(&user, &event, participation_type) {
                    Ok(record) => {
                        Self::emit(st, "POST", &path, None, 200, json!({"success": true, "data": record}));
                        st.notice = Some(true);
                    }
                    Err(e) => {
                        Self::emit(st, "POST", &path, None, 400, json!({"success": false, "error": e.to_string()}));
                        st.notice = Some(false);
                    }
                }
            }
            Action::OpenCancel(participation_type) => {
                st.dialog = Some(participation_type);
            }
            Action::ConfirmCancel => {
                let Some(participation_type) = st.dialog.take() else {
                    return Ok(());
                };
                let (user, event) = self.session_event(st)?;
                if participation_type == ParticipationType::Ticket && self.bugs.legacy_ticket_endpoint {
                    let path = format!("/api/events/{event}/ticket");
                    Self::emit(st, "DELETE", &path, None, 404, json!({"success": false, "error": "Not Found"}));
                    st.notice = Some(false);
                    return Ok(());
                }
                let path = format!(
                    "/api/events/{event}/participation?type={}",
                    participation_type.query_value()
                );
                if self.bugs.cancel_not_persisted {
                    Self::emit(st, "DELETE", &path, None, 200, json!({"success": true}));
                    st.notice = Some(true);
                    return Ok(());
                }
                if self.bugs.skips_history {
                    let active = self
                        .db
                        .latest_participation(&user, &event)?
                        .filter(|p| p.status.is_active() && p.participation_type == participation_type);
                    if let Some(record) = active {
                        self.db
                            .set_participation_status(&record.id, ParticipationStatus::Cancelled)?;
                        Self::emit(st, "DELETE", &path, None, 200, json!({"success": true}));
                        st.notice = Some(true);
                    } else {
                        Self::emit(st, "DELETE", &path, None, 400, json!({"success": false}));
                        st.notice = Some(false);
                    }
                    return Ok(());
                }
                let reason = st.reason.clone();
                match self
                    .db
                    .cancel_participation(&user, &event, Some(participation_type), Some(reason.as_str()))
                {
                    Ok(record) => {
                        if self.bugs.hard_deletes_cancelled {
                            self.db.delete_participation(&record.id)?;
                        }
                        Self::emit(st, "DELETE", &path, None, 200, json!({"success": true, "data": record}));
                        st.notice = Some(true);
                    }
                    Err(e) => {
                        Self::emit(st, "DELETE", &path, None, 400, json!({"success": false, "error": e.to_string()}));
                        st.notice = Some(false);
                    }
                }
            }
            Action::SaveProfile => {
                if self.bugs.panic_on_save {
                    panic!("profile save crashed");
                }
                let Some(user) = st.session.clone() else {
                    return Ok(());
                };
                let mut body = serde_json::Map::new();
                let mut update = ProfileFields::default();
                for (field, value) in &st.profile_form {
                    if value.is_empty() && self.bugs.drops_empty_profile_fields {
                        body.insert(field.clone(), Value::Null);
                    } else {
                        body.insert(field.clone(), Value::String(value.clone()));
                        update.set(field, Some(value.clone()))?;
                    }
                }
                let saved = self.db.update_profile(&user, &update)?;
                let path = format!("/api/users/{user}/profile");
                Self::emit(st, "PUT", &path, Some(Value::Object(body)), 200, json!({"success": true, "data": saved}));
                st.notice = Some(true);
            }
            Action::SaveEvent => {
                let Some(event_id) = Self::edited_event_id(&st.path).map(str::to_string) else {
                    return Ok(());
                };
                let path = format!("/api/events/{event_id}");
                let title = st.event_form.get("title").cloned();
                let capacity_text = st.event_form.get("capacity").cloned().unwrap_or_default();
                let Ok(capacity) = capacity_text.trim().parse::<i64>() else {
                    Self::emit(st, "PUT", &path, None, 400, json!({"success": false, "error": "invalid capacity"}));
                    st.notice = Some(false);
                    return Ok(());
                };
                let body = json!({"title": title, "capacity": capacity});
                let update = EventFields {
                    title,
                    capacity: (!self.bugs.ignores_event_capacity).then_some(capacity),
                };
                let saved = self.db.update_event(&event_id, &update)?;
                Self::emit(st, "PUT", &path, Some(body), 200, json!({"success": true, "data": saved}));
                st.notice = Some(true);
            }
        }
        Ok(())
    }

    fn session_event(&self, st: &State) -> HarnessResult<(String, String)> {
        let user = st
            .session
            .clone()
            .ok_or_else(|| HarnessError::Bridge("not logged in".into()))?;
        let event = Self::event_id(&st.path)
            .ok_or_else(|| HarnessError::Bridge(format!("not on an event page: {}", st.path)))?
            .to_string();
        Ok((user, event))
    }

    fn timeout(what: &str, timeout: Duration) -> HarnessError {
        HarnessError::Timeout {
            what: what.to_string(),
            timeout_ms: timeout.as_millis() as u64,
            context: "fake app".to_string(),
        }
    }
}

fn app_path(url: &str) -> String {
    url.strip_prefix(APP_URL).unwrap_or(url).to_string()
}

#[async_trait]
impl BrowserDriver for FakeApp {
    async fn goto(&self, url: &str, _timeout: Duration) -> HarnessResult<()> {
        let mut st = self.state.lock();
        self.load(&mut st, &app_path(url))
    }

    async fn reload(&self, _timeout: Duration) -> HarnessResult<()> {
        let mut st = self.state.lock();
        let path = st.path.clone();
        self.load(&mut st, &path)
    }

    async fn wait_for_load(&self, _timeout: Duration) -> HarnessResult<()> {
        Ok(())
    }

    async fn wait_for_url(&self, predicate: &UrlPredicate, timeout: Duration) -> HarnessResult<()> {
        let url = self.current_url().await?;
        if predicate.matches(&url) {
            Ok(())
        } else {
            Err(Self::timeout(&predicate.to_string(), timeout))
        }
    }

    async fn current_url(&self) -> HarnessResult<String> {
        let path = self.state.lock().path.clone();
        Ok(if path.starts_with('/') {
            format!("{APP_URL}{path}")
        } else {
            path
        })
    }

    async fn title(&self) -> HarnessResult<String> {
        let path = self.state.lock().path.clone();
        Ok(format!("{path} | Events"))
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> HarnessResult<()> {
        let element = self.require(selector)?;
        let mut st = self.state.lock();
        match element.action {
            Action::Input(InputSlot::LoginEmail) => st.login_email = value.to_string(),
            Action::Input(InputSlot::LoginPassword) => st.login_password = value.to_string(),
            Action::Input(InputSlot::Reason) => st.reason = value.to_string(),
            Action::Input(InputSlot::Profile(field)) => {
                st.profile_form.insert(field.to_string(), value.to_string());
            }
            Action::Input(InputSlot::Event(field)) => {
                st.event_form.insert(field.to_string(), value.to_string());
            }
            _ => return Err(HarnessError::Bridge(format!("{selector} is not an input"))),
        }
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> HarnessResult<()> {
        let element = self.require(selector)?;
        let mut st = self.state.lock();
        self.perform(&mut st, element.action)
    }

    async fn count(&self, selector: &str) -> HarnessResult<usize> {
        let st = self.state.lock();
        Ok(self.render(&st)?.iter().filter(|e| e.matches(selector)).count())
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        Ok(self.find(selector)?.is_some())
    }

    async fn is_enabled(&self, selector: &str) -> HarnessResult<bool> {
        Ok(self.find(selector)?.map(|e| e.enabled).unwrap_or(false))
    }

    async fn text_content(&self, selector: &str) -> HarnessResult<Option<String>> {
        if selector == "body" {
            let st = self.state.lock();
            let texts: Vec<String> = self.render(&st)?.into_iter().map(|e| e.text).collect();
            return Ok(Some(texts.join(" ")));
        }
        Ok(self.find(selector)?.map(|e| e.text))
    }

    async fn input_value(&self, selector: &str, _timeout: Duration) -> HarnessResult<String> {
        Ok(self.require(selector)?.value.unwrap_or_default())
    }

    async fn get_attribute(&self, selector: &str, name: &str) -> HarnessResult<Option<String>> {
        Ok(self
            .find(selector)?
            .and_then(|e| if name == "href" { e.href } else { None }))
    }

    async fn wait_for_selector(&self, selector: &str, state: WaitState, timeout: Duration) -> HarnessResult<()> {
        let present = self.find(selector)?.is_some();
        let satisfied = match state {
            WaitState::Visible | WaitState::Attached => present,
            WaitState::Hidden | WaitState::Detached => !present,
        };
        if satisfied {
            Ok(())
        } else {
            Err(Self::timeout(selector, timeout))
        }
    }

    async fn arm_response(&self, matcher: &ResponseMatcher) -> HarnessResult<ListenerId> {
        let mut st = self.state.lock();
        st.next_listener += 1;
        let id = st.next_listener;
        st.listeners.push(Listener {
            id,
            matcher: matcher.clone(),
            exchange: None,
        });
        Ok(ListenerId(id))
    }

    async fn await_response(&self, listener: ListenerId, timeout: Duration) -> HarnessResult<CapturedExchange> {
        let mut st = self.state.lock();
        let index = st
            .listeners
            .iter()
            .position(|l| l.id == listener.0)
            .ok_or_else(|| HarnessError::Bridge(format!("unknown listener {}", listener.0)))?;
        let armed = st.listeners.remove(index);
        armed
            .exchange
            .ok_or_else(|| Self::timeout(&format!("response for {}", armed.matcher), timeout))
    }

    async fn disarm(&self, listener: ListenerId) -> HarnessResult<()> {
        self.state.lock().listeners.retain(|l| l.id != listener.0);
        Ok(())
    }

    async fn observed_requests(&self) -> HarnessResult<Vec<ObservedRequest>> {
        Ok(self.state.lock().observed.clone())
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> HarnessResult<()> {
        self.state.lock().screenshots += 1;
        std::fs::write(path, b"\x89PNG fake")?;
        Ok(())
    }

    async fn clear_cookies(&self) -> HarnessResult<()> {
        self.state.lock().session = None;
        Ok(())
    }

    async fn clear_storage(&self) -> HarnessResult<()> {
        Ok(())
    }
}

/// Hands out a fresh `FakeApp` per plan, all over one database
pub struct FakeFactory {
    pub db: Database,
    pub bugs: Bugs,
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn create(&self) -> HarnessResult<Box<dyn BrowserDriver>> {
        Ok(Box::new(FakeApp::new(self.db.clone(), self.bugs)))
    }
}

/// Seeded accounts for every role plus one event of each kind
pub fn seeded_database() -> (Database, AccountTable) {
    let db = Database::open_memory().expect("in-memory database");
    let accounts = AccountTable::seeded();
    for role in Role::ALL {
        let credentials = accounts.get(role).expect("seeded role");
        db.insert_user(&TestUserSpec {
            email: credentials.email.clone(),
            password: credentials.password.clone(),
            scene_name: format!("Seeded{}", role.as_str()),
            role,
        })
        .expect("seed user");
    }
    db.insert_event(&NewEvent::upcoming("Rope Basics", EventKind::Ticketed))
        .expect("seed ticketed event");
    db.insert_event(&NewEvent::upcoming("Community Social", EventKind::Rsvp))
        .expect("seed rsvp event");
    (db, accounts)
}

pub fn test_config(results_dir: &Path) -> HarnessConfig {
    HarnessConfig {
        app_url: APP_URL.to_string(),
        api_url: API_URL.to_string(),
        results_dir: results_dir.to_path_buf(),
        timeouts: Timeouts::fast(),
        ..Default::default()
    }
}

/// One fake browser, its database and the services scenarios borrow
pub struct Env {
    pub db: Database,
    pub app: FakeApp,
    pub data: SqliteDataLayer,
    pub accounts: AccountTable,
    pub cleanup: CleanupManager,
    pub config: HarnessConfig,
    pub artifacts: ArtifactStore,
    _results: tempfile::TempDir,
}

impl Env {
    pub fn new(bugs: Bugs) -> Self {
        let (db, accounts) = seeded_database();
        Self::with_database(db, accounts, bugs)
    }

    pub fn with_database(db: Database, accounts: AccountTable, bugs: Bugs) -> Self {
        let results = tempfile::tempdir().expect("results dir");
        let config = test_config(results.path());
        let data = SqliteDataLayer::new(db.clone());
        let shared: Arc<dyn DataLayer> = Arc::new(data.clone());
        Self {
            app: FakeApp::new(db.clone(), bugs),
            cleanup: CleanupManager::new(shared, &config.cleanup_email_prefix),
            artifacts: ArtifactStore::new(results.path()).expect("artifact store"),
            db,
            data,
            accounts,
            config,
            _results: results,
        }
    }

    pub fn ctx(&self) -> ScenarioContext<'_> {
        self.ctx_with(&self.data)
    }

    /// Context reading persisted state through `data`
    pub fn ctx_with<'a>(&'a self, data: &'a dyn DataLayer) -> ScenarioContext<'a> {
        ScenarioContext {
            driver: &self.app,
            data,
            accounts: &self.accounts,
            cleanup: &self.cleanup,
            artifacts: Some(&self.artifacts),
            config: &self.config,
        }
    }

    pub fn user_id(&self, role: Role) -> String {
        let email = &self.accounts.get(role).expect("seeded role").email;
        self.db.user_id_for_email(email).expect("seeded user")
    }

    pub fn event_id(&self, kind: EventKind) -> String {
        self.db.first_event(kind).expect("query").expect("seeded event").id
    }

    pub fn status(&self, user_id: &str, event_id: &str) -> Option<ParticipationStatus> {
        self.db
            .latest_participation(user_id, event_id)
            .expect("query")
            .map(|p| p.status)
    }
}

/// SQLite data layer that refuses some reads, like the HTTP API does
#[derive(Clone)]
pub struct LimitedDataLayer {
    pub inner: SqliteDataLayer,
    pub profile: bool,
    pub audit: bool,
}

impl LimitedDataLayer {
    /// Refuses profile and audit reads
    pub fn api_like(db: &Database) -> Self {
        Self {
            inner: SqliteDataLayer::new(db.clone()),
            profile: false,
            audit: false,
        }
    }
}

fn refused(what: &str) -> HarnessError {
    Error::Unsupported(format!("{what} in this environment")).into()
}

#[async_trait]
impl DataLayer for LimitedDataLayer {
    fn name(&self) -> &'static str {
        "limited"
    }

    async fn user_id_for_email(&self, email: &str) -> HarnessResult<String> {
        self.inner.user_id_for_email(email).await
    }

    async fn profile(&self, user_id: &str) -> HarnessResult<ProfileFields> {
        if !self.profile {
            return Err(refused("profile read"));
        }
        self.inner.profile(user_id).await
    }

    async fn latest_participation(&self, user_id: &str, event_id: &str) -> HarnessResult<Option<ParticipationRecord>> {
        self.inner.latest_participation(user_id, event_id).await
    }

    async fn active_participation_count(&self, user_id: &str, event_id: &str) -> HarnessResult<usize> {
        self.inner.active_participation_count(user_id, event_id).await
    }

    async fn first_event(&self, kind: EventKind) -> HarnessResult<Option<EventSummary>> {
        self.inner.first_event(kind).await
    }

    async fn event(&self, event_id: &str) -> HarnessResult<Option<EventSummary>> {
        self.inner.event(event_id).await
    }

    async fn audit_entries(&self, entity_type: &str, entity_id: &str) -> HarnessResult<Vec<AuditLogEntry>> {
        if !self.audit {
            return Err(refused("audit read"));
        }
        self.inner.audit_entries(entity_type, entity_id).await
    }

    async fn create_user(&self, spec: &TestUserSpec) -> HarnessResult<String> {
        self.inner.create_user(spec).await
    }

    async fn delete_user_by_id(&self, user_id: &str) -> HarnessResult<bool> {
        self.inner.delete_user_by_id(user_id).await
    }

    async fn delete_user_by_email(&self, email: &str) -> HarnessResult<bool> {
        self.inner.delete_user_by_email(email).await
    }

    async fn delete_users_with_email_prefix(&self, prefix: &str) -> HarnessResult<usize> {
        self.inner.delete_users_with_email_prefix(prefix).await
    }
}
