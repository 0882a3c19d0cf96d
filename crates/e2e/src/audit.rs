//! Audit trail checks
//!
//! Independent of the entity's current status: an implementation that
//! updates the row but skips the history insert still fails here.

use persistcheck_common::{AuditLogEntry, ParticipationStatus};
use tracing::{debug, warn};

use crate::datalayer::DataLayer;
use crate::error::{HarnessError, HarnessResult};

pub struct AuditVerifier<'a> {
    data: &'a dyn DataLayer,
}

impl<'a> AuditVerifier<'a> {
    pub fn new(data: &'a dyn DataLayer) -> Self {
        Self { data }
    }

    /// Is there a history record for `entity_id` whose new status is
    /// `expected_status`
    pub async fn verify_audit_log_exists(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected_status: ParticipationStatus,
    ) -> HarnessResult<bool> {
        let entries = self.data.audit_entries(entity_type, entity_id).await?;
        let found = entries.iter().any(|e| matches_status(e, expected_status));
        debug!(
            "{} {}: {} history record(s), {} with status {}",
            entity_type,
            entity_id,
            entries.len(),
            if found { "one" } else { "none" },
            expected_status
        );
        Ok(found)
    }

    /// Like [`Self::verify_audit_log_exists`], failing with the entries seen
    pub async fn require(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected_status: ParticipationStatus,
    ) -> HarnessResult<()> {
        if self
            .verify_audit_log_exists(entity_type, entity_id, expected_status)
            .await?
        {
            return Ok(());
        }
        warn!("No {} audit record for {} {}", expected_status, entity_type, entity_id);
        Err(HarnessError::AuditMissing {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            status: expected_status.to_string(),
        })
    }
}

fn matches_status(entry: &AuditLogEntry, expected: ParticipationStatus) -> bool {
    match entry.new_status {
        Some(status) => status == expected,
        // Rows without a status column carry it in the action name
        None => entry
            .action
            .to_ascii_lowercase()
            .contains(&expected.as_str().to_ascii_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalayer::SqliteDataLayer;
    use chrono::Utc;
    use persistcheck_common::db::{NewEvent, PARTICIPATION_HISTORY};
    use persistcheck_common::{Database, EventKind, ParticipationType, TestUserSpec};

    fn entry(action: &str, status: Option<ParticipationStatus>) -> AuditLogEntry {
        AuditLogEntry {
            entity_type: PARTICIPATION_HISTORY.into(),
            entity_id: "p1".into(),
            action: action.into(),
            new_status: status,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_status_from_action_name_when_column_missing() {
        assert!(matches_status(
            &entry("ParticipationCancelled", None),
            ParticipationStatus::Cancelled
        ));
        assert!(!matches_status(
            &entry("Created", Some(ParticipationStatus::Active)),
            ParticipationStatus::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_cancellation_leaves_history() {
        let db = Database::open_memory().unwrap();
        let event = db
            .insert_event(&NewEvent::upcoming("Social", EventKind::Rsvp))
            .unwrap();
        let user = db.insert_user(&TestUserSpec::unique("e2e-", "audit")).unwrap();
        let created = db
            .create_participation(&user, &event, ParticipationType::Rsvp)
            .unwrap();

        let layer = SqliteDataLayer::new(db.clone());
        let audit = AuditVerifier::new(&layer);
        assert!(!audit
            .verify_audit_log_exists(PARTICIPATION_HISTORY, &created.id, ParticipationStatus::Cancelled)
            .await
            .unwrap());

        db.cancel_participation(&user, &event, None, Some("done")).unwrap();
        audit
            .require(PARTICIPATION_HISTORY, &created.id, ParticipationStatus::Cancelled)
            .await
            .unwrap();
    }
}
