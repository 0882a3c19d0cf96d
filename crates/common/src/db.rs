//! SQLite mirror of the application data layer
//!
//! Holds the tables the harness reads back after UI actions: users (with
//! profile columns), events, event participations and the participation
//! history. Used as a local fixture and as the backing store of the
//! simulated application in tests.

use crate::types::{
    AuditLogEntry, EventFields, EventKind, EventSummary, ParticipationRecord, ParticipationStatus,
    ParticipationType, ProfileFields, Role, TestUserSpec,
};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Audit table name used for participation transitions
pub const PARTICIPATION_HISTORY: &str = "ParticipationHistory";

/// Database wrapper for the data-layer mirror
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Columns needed to seed an event
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub kind: EventKind,
    pub is_published: bool,
    pub start_date: DateTime<Utc>,
    pub capacity: i64,
}

impl NewEvent {
    pub fn upcoming(title: &str, kind: EventKind) -> Self {
        Self {
            title: title.to_string(),
            kind,
            is_published: true,
            start_date: Utc::now() + chrono::Duration::days(7),
            capacity: 20,
        }
    }
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                role TEXT NOT NULL,
                scene_name TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                bio TEXT,
                pronouns TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                is_published INTEGER NOT NULL DEFAULT 1,
                start_date INTEGER NOT NULL,
                capacity INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, start_date);

            CREATE TABLE IF NOT EXISTS event_participations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                participation_type TEXT NOT NULL,
                status INTEGER NOT NULL,
                cancellation_reason TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_participations_user_event
                ON event_participations(user_id, event_id);

            -- Append-only; rows are never updated
            CREATE TABLE IF NOT EXISTS participation_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                participation_id TEXT NOT NULL,
                action TEXT NOT NULL,
                new_status INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_participation
                ON participation_history(participation_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Insert a user and return its id
    pub fn insert_user(&self, spec: &TestUserSpec) -> Result<String> {
        let conn = self.conn.lock();
        let now = now_millis();
        let id = Uuid::new_v4().to_string();

        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![spec.email],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(Error::AlreadyExists {
                kind: "user".to_string(),
                id: spec.email.clone(),
            });
        }

        conn.execute(
            "INSERT INTO users (id, email, password, role, scene_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                spec.email,
                spec.password,
                spec.role.as_str(),
                spec.scene_name,
                now,
                now
            ],
        )?;

        debug!("Inserted user {} ({})", spec.email, id);
        Ok(id)
    }

    pub fn user_id_for_email(&self, email: &str) -> Result<String> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::not_found("user", email))
    }

    /// Check a password; returns the user id on success
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.and_then(|(id, stored)| (stored == password).then_some(id)))
    }

    pub fn user_email(&self, user_id: &str) -> Result<String> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT email FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::not_found("user", user_id))
    }

    pub fn user_role(&self, user_id: &str) -> Result<Role> {
        let conn = self.conn.lock();
        let role: String = conn
            .query_row(
                "SELECT role FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found("user", user_id))?;
        role.parse()
    }

    pub fn profile(&self, user_id: &str) -> Result<ProfileFields> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT scene_name, first_name, last_name, bio, pronouns FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(ProfileFields {
                    scene_name: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    bio: row.get(3)?,
                    pronouns: row.get(4)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("user", user_id))
    }

    /// Write every provided field; absent fields are left untouched
    pub fn update_profile(&self, user_id: &str, update: &ProfileFields) -> Result<ProfileFields> {
        let mut current = self.profile(user_id)?;
        current.merge(update);

        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE users SET scene_name = ?1, first_name = ?2, last_name = ?3, bio = ?4,
                     pronouns = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    current.scene_name.clone().unwrap_or_default(),
                    current.first_name,
                    current.last_name,
                    current.bio,
                    current.pronouns,
                    now_millis(),
                    user_id
                ],
            )?;
        }

        debug!("Updated profile for {}", user_id);
        Ok(current)
    }

    /// Delete a user and everything hanging off it
    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM participation_history WHERE participation_id IN
                 (SELECT id FROM event_participations WHERE user_id = ?1)",
            params![user_id],
        )?;
        conn.execute(
            "DELETE FROM event_participations WHERE user_id = ?1",
            params![user_id],
        )?;
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(deleted > 0)
    }

    pub fn delete_user_by_email(&self, email: &str) -> Result<bool> {
        match self.user_id_for_email(email) {
            Ok(id) => self.delete_user(&id),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove stragglers left by aborted runs
    pub fn delete_users_with_email_prefix(&self, prefix: &str) -> Result<usize> {
        let ids: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT id FROM users WHERE email LIKE ?1 ESCAPE '\\'")?;
            let pattern = format!("{}%", escape_like(prefix));
            let rows = stmt.query_map(params![pattern], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut removed = 0;
        for id in &ids {
            if self.delete_user(id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn insert_event(&self, event: &NewEvent) -> Result<String> {
        let conn = self.conn.lock();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO events (id, title, kind, is_published, start_date, capacity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                event.title,
                event.kind.as_str(),
                event.is_published,
                event.start_date.timestamp_millis(),
                event.capacity,
                now_millis()
            ],
        )?;
        debug!("Inserted event {} ({})", event.title, id);
        Ok(id)
    }

    pub fn event(&self, event_id: &str) -> Result<Option<EventSummary>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, title, kind, is_published, start_date, capacity FROM events WHERE id = ?1",
                params![event_id],
                event_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Earliest published upcoming event of the given kind
    pub fn first_event(&self, kind: EventKind) -> Result<Option<EventSummary>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, title, kind, is_published, start_date, capacity FROM events
                 WHERE kind = ?1 AND is_published = 1 AND start_date >= ?2
                 ORDER BY start_date ASC LIMIT 1",
                params![kind.as_str(), now_millis()],
                event_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Apply the provided fields and return the stored row
    pub fn update_event(&self, event_id: &str, update: &EventFields) -> Result<EventSummary> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE events SET title = COALESCE(?1, title), capacity = COALESCE(?2, capacity)
             WHERE id = ?3",
            params![update.title, update.capacity, event_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("event", event_id));
        }
        debug!("Updated event {}", event_id);
        Ok(conn.query_row(
            "SELECT id, title, kind, is_published, start_date, capacity FROM events WHERE id = ?1",
            params![event_id],
            event_from_row,
        )?)
    }

    pub fn list_events(&self) -> Result<Vec<EventSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, kind, is_published, start_date, capacity FROM events
             WHERE is_published = 1 ORDER BY start_date ASC",
        )?;
        let rows = stmt.query_map([], event_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    // ========================================================================
    // Participations
    // ========================================================================

    /// Register a participation; one active record per user, event and type
    pub fn create_participation(
        &self,
        user_id: &str,
        event_id: &str,
        participation_type: ParticipationType,
    ) -> Result<ParticipationRecord> {
        if self.event(event_id)?.is_none() {
            return Err(Error::not_found("event", event_id));
        }

        let conn = self.conn.lock();
        let active: Option<String> = conn
            .query_row(
                "SELECT id FROM event_participations
                 WHERE user_id = ?1 AND event_id = ?2 AND participation_type = ?3 AND status = ?4",
                params![
                    user_id,
                    event_id,
                    participation_type.as_str(),
                    ParticipationStatus::Active.code()
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = active {
            return Err(Error::AlreadyExists {
                kind: "participation".to_string(),
                id: existing,
            });
        }

        let now = now_millis();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO event_participations
                 (id, user_id, event_id, participation_type, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user_id,
                event_id,
                participation_type.as_str(),
                ParticipationStatus::Active.code(),
                now,
                now
            ],
        )?;
        append_history(&conn, &id, "Created", Some(ParticipationStatus::Active), now)?;

        debug!("Created {} participation {} for user {}", participation_type, id, user_id);
        read_participation(&conn, &id)
    }

    /// Cancel the most recent active participation (optionally of one type)
    pub fn cancel_participation(
        &self,
        user_id: &str,
        event_id: &str,
        participation_type: Option<ParticipationType>,
        reason: Option<&str>,
    ) -> Result<ParticipationRecord> {
        let conn = self.conn.lock();
        let mut candidates = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, participation_type FROM event_participations
                 WHERE user_id = ?1 AND event_id = ?2 AND status = ?3
                 ORDER BY updated_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map(
                params![user_id, event_id, ParticipationStatus::Active.code()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?;
            for row in rows {
                candidates.push(row?);
            }
        }

        let target = candidates
            .into_iter()
            .find(|(_, kind)| {
                participation_type
                    .map(|t| t.as_str() == kind.as_str())
                    .unwrap_or(true)
            })
            .map(|(id, _)| id)
            .ok_or_else(|| Error::not_found("active participation", format!("{user_id}/{event_id}")))?;

        let now = now_millis();
        conn.execute(
            "UPDATE event_participations SET status = ?1, cancellation_reason = ?2, updated_at = ?3
             WHERE id = ?4",
            params![ParticipationStatus::Cancelled.code(), reason, now, target],
        )?;
        append_history(&conn, &target, "Cancelled", Some(ParticipationStatus::Cancelled), now)?;

        debug!("Cancelled participation {}", target);
        read_participation(&conn, &target)
    }

    /// Overwrite a participation's status without writing history
    pub fn set_participation_status(&self, participation_id: &str, status: ParticipationStatus) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE event_participations SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.code(), now_millis(), participation_id],
        )?;
        if changed == 0 {
            return Err(Error::not_found("participation", participation_id));
        }
        Ok(())
    }

    /// Hard delete; history rows are kept
    pub fn delete_participation(&self, participation_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM event_participations WHERE id = ?1",
            params![participation_id],
        )?;
        Ok(deleted > 0)
    }

    /// Most recently updated participation for a user and event
    pub fn latest_participation(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<ParticipationRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "{PARTICIPATION_SELECT} WHERE user_id = ?1 AND event_id = ?2
                     ORDER BY updated_at DESC, rowid DESC LIMIT 1"
                ),
                params![user_id, event_id],
                participation_from_row,
            )
            .optional()?;
        row.transpose()
    }

    pub fn active_participation_count(&self, user_id: &str, event_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM event_participations
             WHERE user_id = ?1 AND event_id = ?2 AND status != ?3",
            params![user_id, event_id, ParticipationStatus::Cancelled.code()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn participations_for_event(&self, event_id: &str) -> Result<Vec<ParticipationRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{PARTICIPATION_SELECT} WHERE event_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![event_id], participation_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    pub fn audit_entries(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditLogEntry>> {
        if entity_type != PARTICIPATION_HISTORY {
            return Err(Error::Unsupported(format!("audit table {entity_type}")));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT participation_id, action, new_status, created_at FROM participation_history
             WHERE participation_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (participation_id, action, status, at) = row?;
            entries.push(AuditLogEntry {
                entity_type: PARTICIPATION_HISTORY.to_string(),
                entity_id: participation_id,
                action,
                new_status: status.map(ParticipationStatus::from_code).transpose()?,
                timestamp: from_millis(at),
            });
        }
        Ok(entries)
    }
}

const PARTICIPATION_SELECT: &str = "SELECT id, user_id, event_id, participation_type, status,
     cancellation_reason, created_at, updated_at FROM event_participations";

fn append_history(
    conn: &Connection,
    participation_id: &str,
    action: &str,
    status: Option<ParticipationStatus>,
    at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO participation_history (participation_id, action, new_status, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![participation_id, action, status.map(|s| s.code()), at],
    )?;
    Ok(())
}

fn read_participation(conn: &Connection, id: &str) -> Result<ParticipationRecord> {
    conn.query_row(
        &format!("{PARTICIPATION_SELECT} WHERE id = ?1"),
        params![id],
        participation_from_row,
    )?
}

fn participation_from_row(row: &Row<'_>) -> rusqlite::Result<Result<ParticipationRecord>> {
    let kind: String = row.get(3)?;
    let status: i64 = row.get(4)?;
    let record = (|| -> Result<ParticipationRecord> {
        Ok(ParticipationRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            event_id: row.get(2)?,
            participation_type: kind.parse()?,
            status: ParticipationStatus::from_code(status)?,
            cancellation_reason: row.get(5)?,
            created_at: from_millis(row.get(6)?),
            updated_at: from_millis(row.get(7)?),
        })
    })();
    Ok(record)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventSummary> {
    let kind: String = row.get(2)?;
    Ok(EventSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: if kind == EventKind::Rsvp.as_str() {
            EventKind::Rsvp
        } else {
            EventKind::Ticketed
        },
        is_published: row.get(3)?,
        start_date: from_millis(row.get(4)?),
        capacity: row.get(5)?,
    })
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, String, String) {
        let db = Database::open_memory().unwrap();
        let user = db
            .insert_user(&TestUserSpec::unique("pc-", "db"))
            .unwrap();
        let event = db
            .insert_event(&NewEvent::upcoming("Rope Basics", EventKind::Ticketed))
            .unwrap();
        (db, user, event)
    }

    #[test]
    fn test_cancel_writes_status_and_history() {
        let (db, user, event) = seeded();
        let created = db
            .create_participation(&user, &event, ParticipationType::Ticket)
            .unwrap();
        assert_eq!(created.status, ParticipationStatus::Active);

        let cancelled = db
            .cancel_participation(&user, &event, None, Some("schedule conflict"))
            .unwrap();
        assert_eq!(cancelled.id, created.id);
        assert_eq!(cancelled.status, ParticipationStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("schedule conflict"));

        let history = db.audit_entries(PARTICIPATION_HISTORY, &created.id).unwrap();
        let actions: Vec<_> = history.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["Created", "Cancelled"]);
        assert_eq!(db.active_participation_count(&user, &event).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_active_participation_rejected() {
        let (db, user, event) = seeded();
        db.create_participation(&user, &event, ParticipationType::Ticket)
            .unwrap();
        let err = db
            .create_participation(&user, &event, ParticipationType::Ticket)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn test_recreate_after_cancel_is_latest() {
        let (db, user, event) = seeded();
        let first = db
            .create_participation(&user, &event, ParticipationType::Ticket)
            .unwrap();
        db.cancel_participation(&user, &event, None, None).unwrap();
        let second = db
            .create_participation(&user, &event, ParticipationType::Ticket)
            .unwrap();

        assert_ne!(first.id, second.id);
        let latest = db.latest_participation(&user, &event).unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert_eq!(latest.status, ParticipationStatus::Active);
    }

    #[test]
    fn test_update_event_keeps_unset_fields() {
        let (db, _, event) = seeded();
        let updated = db
            .update_event(
                &event,
                &EventFields {
                    capacity: Some(35),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Rope Basics");
        assert_eq!(updated.capacity, 35);
        assert!(db.update_event("missing", &EventFields::default()).is_err());
    }

    #[test]
    fn test_hard_delete_keeps_history() {
        let (db, user, event) = seeded();
        let created = db
            .create_participation(&user, &event, ParticipationType::Ticket)
            .unwrap();
        db.set_participation_status(&created.id, ParticipationStatus::Cancelled)
            .unwrap();
        assert_eq!(db.audit_entries(PARTICIPATION_HISTORY, &created.id).unwrap().len(), 1);

        assert!(db.delete_participation(&created.id).unwrap());
        assert!(db.latest_participation(&user, &event).unwrap().is_none());
        assert_eq!(db.audit_entries(PARTICIPATION_HISTORY, &created.id).unwrap().len(), 1);
    }

    #[test]
    fn test_profile_empty_string_round_trips() {
        let (db, user, _) = seeded();
        let update = ProfileFields {
            bio: Some(String::new()),
            first_name: Some("Ada".to_string()),
            ..Default::default()
        };
        db.update_profile(&user, &update).unwrap();

        let profile = db.profile(&user).unwrap();
        assert_eq!(profile.bio.as_deref(), Some(""));
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.pronouns, None);
    }

    #[test]
    fn test_prefix_cleanup_only_touches_matching_users() {
        let db = Database::open_memory().unwrap();
        db.insert_user(&TestUserSpec::unique("pc-", "a")).unwrap();
        db.insert_user(&TestUserSpec::unique("pc-", "b")).unwrap();
        let keep = TestUserSpec {
            email: "member@witchcityrope.com".to_string(),
            password: "Test123!".to_string(),
            scene_name: "Member".to_string(),
            role: Role::Member,
        };
        db.insert_user(&keep).unwrap();

        assert_eq!(db.delete_users_with_email_prefix("pc-").unwrap(), 2);
        assert!(db.user_id_for_email(&keep.email).is_ok());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("state.db")).unwrap();
        let id = db
            .insert_event(&NewEvent::upcoming("Social", EventKind::Rsvp))
            .unwrap();
        assert_eq!(db.first_event(EventKind::Rsvp).unwrap().unwrap().id, id);
        assert!(db.first_event(EventKind::Ticketed).unwrap().is_none());
    }
}
