//! Core types for persistence verification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Named role from the seeded account table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Vetted,
    Member,
    Guest,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Teacher,
        Role::Vetted,
        Role::Member,
        Role::Guest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Vetted => "vetted",
            Role::Member => "member",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidValue {
                field: "role".to_string(),
                value: s.to_string(),
            })
    }
}

/// Login credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// How a user participates in an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipationType {
    #[serde(rename = "RSVP", alias = "rsvp", alias = "Rsvp")]
    Rsvp,
    #[serde(rename = "Ticket", alias = "ticket")]
    Ticket,
}

impl ParticipationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationType::Rsvp => "RSVP",
            ParticipationType::Ticket => "Ticket",
        }
    }

    /// Query-string form used by `DELETE /api/events/{id}/participation?type=`
    pub fn query_value(&self) -> &'static str {
        match self {
            ParticipationType::Rsvp => "rsvp",
            ParticipationType::Ticket => "ticket",
        }
    }
}

impl fmt::Display for ParticipationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsvp" => Ok(ParticipationType::Rsvp),
            "ticket" => Ok(ParticipationType::Ticket),
            _ => Err(Error::InvalidValue {
                field: "participation_type".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Participation status.
///
/// The backend stores these as an integer enum (1 = Active, 2 = Cancelled,
/// 3 = Refunded, 4 = Waitlisted); older payloads use names such as
/// `Registered` or `Confirmed` for the active state. Both forms deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParticipationStatus {
    Active,
    Cancelled,
    Refunded,
    Waitlisted,
}

impl ParticipationStatus {
    pub fn code(&self) -> i64 {
        match self {
            ParticipationStatus::Active => 1,
            ParticipationStatus::Cancelled => 2,
            ParticipationStatus::Refunded => 3,
            ParticipationStatus::Waitlisted => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(ParticipationStatus::Active),
            2 => Ok(ParticipationStatus::Cancelled),
            3 => Ok(ParticipationStatus::Refunded),
            4 => Ok(ParticipationStatus::Waitlisted),
            other => Err(Error::InvalidValue {
                field: "participation_status".to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipationStatus::Active => "Active",
            ParticipationStatus::Cancelled => "Cancelled",
            ParticipationStatus::Refunded => "Refunded",
            ParticipationStatus::Waitlisted => "Waitlisted",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ParticipationStatus::Active)
    }
}

impl fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<i64>() {
            return Self::from_code(code);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "active" | "registered" | "confirmed" => Ok(ParticipationStatus::Active),
            "cancelled" | "canceled" => Ok(ParticipationStatus::Cancelled),
            "refunded" => Ok(ParticipationStatus::Refunded),
            "waitlisted" => Ok(ParticipationStatus::Waitlisted),
            _ => Err(Error::InvalidValue {
                field: "participation_status".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for ParticipationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(i64),
            Name(String),
        }

        let parsed = match Repr::deserialize(deserializer)? {
            Repr::Code(code) => ParticipationStatus::from_code(code),
            Repr::Name(name) => name.parse(),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// A user's participation in one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipationRecord {
    pub id: String,
    pub user_id: String,
    pub event_id: String,
    pub participation_type: ParticipationType,
    pub status: ParticipationStatus,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of entity a test acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Ticket,
    Rsvp,
}

/// Stable identity of the entity a test acts on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub id: String,
    pub kind: EntityKind,
    pub title: String,
    #[serde(default)]
    pub current_status: Option<String>,
}

/// Ticketed events require a purchase; RSVP events are free
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ticketed,
    Rsvp,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ticketed => "ticketed",
            EventKind::Rsvp => "rsvp",
        }
    }

    /// Classes sell tickets, social events take RSVPs.
    pub fn from_event_type(event_type: &str) -> Self {
        if event_type.eq_ignore_ascii_case("social") {
            EventKind::Rsvp
        } else {
            EventKind::Ticketed
        }
    }

    pub fn participation_type(&self) -> ParticipationType {
        match self {
            EventKind::Ticketed => ParticipationType::Ticket,
            EventKind::Rsvp => ParticipationType::Rsvp,
        }
    }
}

/// Event row as seen by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub kind: EventKind,
    pub is_published: bool,
    pub start_date: DateTime<Utc>,
    pub capacity: i64,
}

impl EventSummary {
    pub fn into_target(self) -> TargetEntity {
        TargetEntity {
            id: self.id,
            kind: EntityKind::Event,
            title: self.title,
            current_status: None,
        }
    }
}

/// Admin-editable event fields. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
}

impl EventFields {
    pub const FIELD_NAMES: [&'static str; 2] = ["title", "capacity"];

    /// The current values of `event`
    pub fn of(event: &EventSummary) -> Self {
        Self {
            title: Some(event.title.clone()),
            capacity: Some(event.capacity),
        }
    }

    /// Provided fields as form text, in a stable order
    pub fn provided(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(title) = &self.title {
            out.push(("title", title.clone()));
        }
        if let Some(capacity) = self.capacity {
            out.push(("capacity", capacity.to_string()));
        }
        out
    }

    /// Form text of `field` on `event`
    pub fn read(event: &EventSummary, field: &str) -> Option<String> {
        match field {
            "title" => Some(event.title.clone()),
            "capacity" => Some(event.capacity.to_string()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.capacity.is_none()
    }
}

/// Append-only history row written by the backend on every transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub new_status: Option<ParticipationStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Editable profile fields.
///
/// `None` means "not set" and is distinct from `Some("")`; a cleared field
/// must round-trip as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pronouns: Option<String>,
}

impl ProfileFields {
    pub const FIELD_NAMES: [&'static str; 5] =
        ["sceneName", "firstName", "lastName", "bio", "pronouns"];

    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            "sceneName" => self.scene_name.as_deref(),
            "firstName" => self.first_name.as_deref(),
            "lastName" => self.last_name.as_deref(),
            "bio" => self.bio.as_deref(),
            "pronouns" => self.pronouns.as_deref(),
            _ => None,
        }
    }

    pub fn set(&mut self, field: &str, value: Option<String>) -> Result<()> {
        let slot = match field {
            "sceneName" => &mut self.scene_name,
            "firstName" => &mut self.first_name,
            "lastName" => &mut self.last_name,
            "bio" => &mut self.bio,
            "pronouns" => &mut self.pronouns,
            other => {
                return Err(Error::InvalidValue {
                    field: "profile_field".to_string(),
                    value: other.to_string(),
                })
            }
        };
        *slot = value;
        Ok(())
    }

    /// Fields explicitly provided, in a stable order
    pub fn provided(&self) -> Vec<(&'static str, &str)> {
        Self::FIELD_NAMES
            .iter()
            .filter_map(|name| self.get(name).map(|v| (*name, v)))
            .collect()
    }

    /// Copy every provided field of `update` onto `self`
    pub fn merge(&mut self, update: &ProfileFields) {
        for (name, value) in update.provided() {
            // FIELD_NAMES only yields known names
            let _ = self.set(name, Some(value.to_string()));
        }
    }
}

/// Request to provision a throwaway user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestUserSpec {
    pub email: String,
    pub password: String,
    pub scene_name: String,
    #[serde(default = "default_test_role")]
    pub role: Role,
}

fn default_test_role() -> Role {
    Role::Member
}

impl TestUserSpec {
    /// Timestamp-suffixed identity so parallel runs never collide
    pub fn unique(prefix: &str, base: &str) -> Self {
        let millis = Utc::now().timestamp_millis();
        let salt = &uuid::Uuid::new_v4().simple().to_string()[..6];
        Self {
            email: format!("{prefix}{base}-{millis}-{salt}@example.com"),
            password: "StrongPass123!".to_string(),
            scene_name: format!("{base}{millis}{salt}"),
            role: Role::Member,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.email, &self.password)
    }
}

/// Response envelope used by every API endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }

    /// Unwrap a successful envelope; a failed one becomes an error carrying
    /// the server's message.
    pub fn into_result(self) -> Result<Option<T>> {
        if self.success {
            Ok(self.data)
        } else {
            Err(Error::Internal(
                self.error
                    .or(self.message)
                    .unwrap_or_else(|| "request failed without an error message".to_string()),
            ))
        }
    }
}
