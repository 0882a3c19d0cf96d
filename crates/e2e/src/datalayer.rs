//! Direct, out-of-band reads of persisted state
//!
//! Discovery, cross-checks, audit lookups and cleanup all go through
//! [`DataLayer`] rather than the browser. Two backends exist: a SQLite
//! mirror of the application schema, and the HTTP API (which can answer
//! fewer questions and says so with `Unsupported`).

use async_trait::async_trait;
use chrono::Utc;
use persistcheck_common::{
    AuditLogEntry, Database, Error, EventKind, EventSummary, ParticipationRecord, ProfileFields,
    TestUserSpec,
};

use crate::api::ApiClient;
use crate::error::HarnessResult;

#[async_trait]
pub trait DataLayer: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &'static str;

    async fn user_id_for_email(&self, email: &str) -> HarnessResult<String>;

    async fn profile(&self, user_id: &str) -> HarnessResult<ProfileFields>;

    /// Most recently updated participation of `user_id` in `event_id`
    async fn latest_participation(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> HarnessResult<Option<ParticipationRecord>>;

    /// Participations not in the Cancelled state
    async fn active_participation_count(&self, user_id: &str, event_id: &str) -> HarnessResult<usize>;

    /// Earliest published upcoming event of `kind`
    async fn first_event(&self, kind: EventKind) -> HarnessResult<Option<EventSummary>>;

    async fn event(&self, event_id: &str) -> HarnessResult<Option<EventSummary>>;

    async fn audit_entries(&self, entity_type: &str, entity_id: &str) -> HarnessResult<Vec<AuditLogEntry>>;

    async fn create_user(&self, spec: &TestUserSpec) -> HarnessResult<String>;

    async fn delete_user_by_id(&self, user_id: &str) -> HarnessResult<bool>;

    async fn delete_user_by_email(&self, email: &str) -> HarnessResult<bool>;

    async fn delete_users_with_email_prefix(&self, prefix: &str) -> HarnessResult<usize>;
}

/// Data layer over a SQLite copy of the application schema
#[derive(Clone)]
pub struct SqliteDataLayer {
    db: Database,
}

impl SqliteDataLayer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &std::path::Path) -> HarnessResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl DataLayer for SqliteDataLayer {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn user_id_for_email(&self, email: &str) -> HarnessResult<String> {
        Ok(self.db.user_id_for_email(email)?)
    }

    async fn profile(&self, user_id: &str) -> HarnessResult<ProfileFields> {
        Ok(self.db.profile(user_id)?)
    }

    async fn latest_participation(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> HarnessResult<Option<ParticipationRecord>> {
        Ok(self.db.latest_participation(user_id, event_id)?)
    }

    async fn active_participation_count(&self, user_id: &str, event_id: &str) -> HarnessResult<usize> {
        Ok(self.db.active_participation_count(user_id, event_id)?)
    }

    async fn first_event(&self, kind: EventKind) -> HarnessResult<Option<EventSummary>> {
        Ok(self.db.first_event(kind)?)
    }

    async fn event(&self, event_id: &str) -> HarnessResult<Option<EventSummary>> {
        Ok(self.db.event(event_id)?)
    }

    async fn audit_entries(&self, entity_type: &str, entity_id: &str) -> HarnessResult<Vec<AuditLogEntry>> {
        Ok(self.db.audit_entries(entity_type, entity_id)?)
    }

    async fn create_user(&self, spec: &TestUserSpec) -> HarnessResult<String> {
        Ok(self.db.insert_user(spec)?)
    }

    async fn delete_user_by_id(&self, user_id: &str) -> HarnessResult<bool> {
        Ok(self.db.delete_user(user_id)?)
    }

    async fn delete_user_by_email(&self, email: &str) -> HarnessResult<bool> {
        Ok(self.db.delete_user_by_email(email)?)
    }

    async fn delete_users_with_email_prefix(&self, prefix: &str) -> HarnessResult<usize> {
        Ok(self.db.delete_users_with_email_prefix(prefix)?)
    }
}

/// Data layer over the HTTP API.
///
/// Participation reads use the admin endpoint, so `client` must hold an
/// admin session.
pub struct ApiDataLayer {
    client: ApiClient,
}

impl ApiDataLayer {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

fn unsupported(what: &str) -> crate::error::HarnessError {
    Error::Unsupported(format!("{what} over the HTTP API")).into()
}

#[async_trait]
impl DataLayer for ApiDataLayer {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn user_id_for_email(&self, _email: &str) -> HarnessResult<String> {
        Err(unsupported("user lookup by email"))
    }

    async fn profile(&self, _user_id: &str) -> HarnessResult<ProfileFields> {
        Err(unsupported("profile read"))
    }

    async fn latest_participation(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> HarnessResult<Option<ParticipationRecord>> {
        let rows = self.client.event_participations(event_id).await?;
        Ok(rows
            .into_iter()
            .filter(|p| p.user_id == user_id)
            .max_by_key(|p| p.updated_at))
    }

    async fn active_participation_count(&self, user_id: &str, event_id: &str) -> HarnessResult<usize> {
        let rows = self.client.event_participations(event_id).await?;
        Ok(rows
            .iter()
            .filter(|p| p.user_id == user_id && p.status != persistcheck_common::ParticipationStatus::Cancelled)
            .count())
    }

    async fn first_event(&self, kind: EventKind) -> HarnessResult<Option<EventSummary>> {
        let now = Utc::now();
        Ok(self
            .client
            .events()
            .await?
            .into_iter()
            .filter(|e| e.kind == kind && e.is_published && e.start_date >= now)
            .min_by_key(|e| e.start_date))
    }

    async fn event(&self, event_id: &str) -> HarnessResult<Option<EventSummary>> {
        self.client.event(event_id).await
    }

    async fn audit_entries(&self, entity_type: &str, _entity_id: &str) -> HarnessResult<Vec<AuditLogEntry>> {
        Err(unsupported(&format!("{entity_type} read")))
    }

    async fn create_user(&self, _spec: &TestUserSpec) -> HarnessResult<String> {
        Err(unsupported("user creation"))
    }

    async fn delete_user_by_id(&self, _user_id: &str) -> HarnessResult<bool> {
        Err(unsupported("user deletion"))
    }

    async fn delete_user_by_email(&self, _email: &str) -> HarnessResult<bool> {
        Err(unsupported("user deletion"))
    }

    async fn delete_users_with_email_prefix(&self, _prefix: &str) -> HarnessResult<usize> {
        Err(unsupported("bulk user deletion"))
    }
}
